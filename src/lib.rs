//! perf-ingest library - streaming importer for Linux perf.data recordings.
//!
//! Input bytes can be fed in chunks of any size; the importer reassembles the
//! container format, decodes records according to their event attributes, and
//! materializes threads, memory mappings, callchains and counter series into
//! in-memory storage.
//!
//! # Modules
//!
//! - [`processor`] - top-level pipeline: format detection, routing, draining
//! - [`perf`] - the perf.data tokenizer and record parser
//! - [`buffer`] / [`reader`] - chunked byte buffer and typed readers
//! - trackers ([`process`], [`mapping`], [`stack_profile`], [`clock`]) and
//!   [`storage`] - shared state the parser writes into
//!
//! # Example
//!
//! ```no_run
//! use perf_ingest::TraceProcessor;
//!
//! let data = std::fs::read("perf.data").expect("failed to read input");
//! let mut processor = TraceProcessor::new();
//! processor.parse(data).expect("malformed trace");
//! processor.notify_end_of_file().expect("malformed trace");
//!
//! println!("{} samples", processor.context().storage.perf_samples().len());
//! ```

pub mod buffer;
pub mod clock;
pub mod context;
pub mod mapping;
pub mod perf;
pub mod process;
pub mod processor;
pub mod reader;
pub mod sniffer;
pub mod sorter;
pub mod stack_profile;
pub mod storage;

// Re-export for convenience
pub use context::TraceContext;
pub use processor::TraceProcessor;
pub use sniffer::{guess_trace_type, TraceType};
