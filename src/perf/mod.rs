//! Importer for Linux `perf.data` recordings.
//!
//! The tokenizer walks the container format (header, attrs, data section,
//! trailing feature sections) and emits timestamped records into the sorter;
//! the record parser consumes them in timestamp order and materializes
//! threads, mappings, callchains and counters.

use thiserror::Error;

pub mod abi;
pub mod attrs;
pub mod dso;
pub mod features;
pub mod mmap;
pub mod parser;
pub mod record;
pub mod sample;
pub mod session;
pub mod tokenizer;

/// Unrecoverable problems with the structure of the file. Any of these
/// terminates the import; per-record problems are handled with skip counters
/// instead.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Invalid magic string")]
    InvalidMagic,
    #[error("invalid perf file header size: expected {expected}, found {found}")]
    InvalidHeaderSize { expected: u64, found: u64 },
    #[error("invalid attr size: {0}")]
    InvalidAttrSize(u64),
    #[error("attrs section size {section_size} is not a multiple of attr size {attr_size}")]
    InvalidAttrsSection { section_size: u64, attr_size: u64 },
    #[error("invalid id section size: {0}")]
    InvalidIdSectionSize(u64),
    #[error("data section offset {0} points into already consumed data")]
    InvalidDataOffset(u64),
    #[error("Invalid record size: {0}")]
    InvalidRecordSize(u16),
    #[error("no perf_event_attr in file")]
    NoAttrs,
    #[error("duplicate sample id {0}")]
    DuplicateSampleId(u64),
    #[error("multiple perf_event_attr with incompatible sample id layouts")]
    IncompatibleAttrLayouts,
    #[error("record does not carry a sample id")]
    MissingSampleId,
    #[error("no perf_event_attr registered for sample id {0}")]
    UnknownSampleId(u64),
    #[error("unable to determine perf_event_attr for record: {0}")]
    AttrLookup(Box<FormatError>),
    #[error("failed to parse feature section {id}: {reason}")]
    Feature { id: u8, reason: String },
    #[error("Unexpected data")]
    UnexpectedTrailingData,
}
