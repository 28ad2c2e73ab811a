//! Chunked tokenizer for perf.data files.
//!
//! A perf.data file consists of:
//!
//! ```text
//! [ header ]
//! [ attr section ]
//! [ data section ]
//! [ optional feature sections ]
//! ```
//!
//! where each attr describes one event type recorded in the file. Most file
//! format documentation is outdated or misleading; the authoritative source
//! is `perf_session__do_write_header()` in linux/tools/perf/util/header.c.
//!
//! Input arrives as chunks of arbitrary size. Parsing advances through a
//! sequence of states, each of which either consumes a slice of the buffered
//! bytes, reports that it needs more data and unwinds to the caller, or fails
//! the whole import. Feature sections are processed in descending file-offset
//! order from the back of the section list so the buffer can shed memory
//! incrementally.

use std::mem;
use std::sync::Arc;

use crate::buffer::{ByteBuffer, TraceBlobView};
use crate::clock::{ClockDomain, ClockError};
use crate::context::TraceContext;
use crate::mapping::BuildId;
use crate::perf::abi::*;
use crate::perf::attrs::AttrsSectionReader;
use crate::perf::features;
use crate::perf::record::Record;
use crate::perf::session::PerfSession;
use crate::perf::FormatError;
use crate::reader::RecordReader;
use crate::storage::{IndexedStat, StatCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsingState {
    ParseHeader,
    ParseAttrs,
    SeekRecords,
    ParseRecords,
    ParseFeatureSections,
    ParseFeatures,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsingResult {
    MoreDataNeeded,
    Success,
}

pub struct PerfDataTokenizer {
    state: ParsingState,
    buffer: ByteBuffer,
    header: perf_file_header,
    /// Feature ids present in the header flags bitmap, ascending.
    feature_ids: Vec<u8>,
    feature_headers_section: perf_file_section,
    /// Remaining feature sections, sorted by descending offset so they can be
    /// consumed from the back.
    feature_sections: Vec<(u8, perf_file_section)>,
    session: Option<Arc<PerfSession>>,
    latest_timestamp: i64,
}

impl PerfDataTokenizer {
    pub fn new() -> Self {
        Self {
            state: ParsingState::ParseHeader,
            buffer: ByteBuffer::new(),
            header: perf_file_header::default(),
            feature_ids: Vec::new(),
            feature_headers_section: perf_file_section::default(),
            feature_sections: Vec::new(),
            session: None,
            latest_timestamp: 0,
        }
    }

    pub fn session(&self) -> Option<&Arc<PerfSession>> {
        self.session.as_ref()
    }

    /// Feeds one chunk and advances the state machine as far as the buffered
    /// bytes allow. Returns `Err` only for unrecoverable format problems;
    /// running out of buffered data simply returns until the next chunk.
    pub fn parse(&mut self, ctx: &mut TraceContext, blob: TraceBlobView) -> Result<(), FormatError> {
        self.buffer.push_back(blob);

        while !self.buffer.is_empty() {
            let result = match self.state {
                ParsingState::ParseHeader => self.parse_header(ctx)?,
                ParsingState::ParseAttrs => self.parse_attrs()?,
                ParsingState::SeekRecords => self.seek_records()?,
                ParsingState::ParseRecords => self.parse_records(ctx)?,
                ParsingState::ParseFeatureSections => self.parse_feature_sections()?,
                ParsingState::ParseFeatures => self.parse_features(ctx)?,
                ParsingState::Done => return Err(FormatError::UnexpectedTrailingData),
            };
            if result == ParsingResult::MoreDataNeeded {
                break;
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, ctx: &mut TraceContext) -> Result<ParsingResult, FormatError> {
        let header_size = mem::size_of::<perf_file_header>();
        let Some(view) = self.buffer.slice_off(0, header_size) else {
            return Ok(ParsingResult::MoreDataNeeded);
        };
        let header: perf_file_header = RecordReader::new(view.data())
            .read_pod()
            .expect("header slice is header sized");

        // A byte-swapped magic would mean a big-endian recording; those are
        // rejected along with everything else that is not "PERFILE2".
        if &header.magic != PERF_FILE_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        if header.size != header_size as u64 {
            return Err(FormatError::InvalidHeaderSize {
                expected: header_size as u64,
                found: header.size,
            });
        }

        self.feature_ids = extract_feature_ids(header.flags, &header.flags1);
        self.feature_headers_section = perf_file_section {
            offset: header.data.end(),
            size: (self.feature_ids.len() * mem::size_of::<perf_file_section>()) as u64,
        };
        ctx.clock_tracker.set_trace_time_clock(ClockDomain::Monotonic);

        self.buffer.pop_front_until(header_size as u64);
        self.header = header;
        self.state = ParsingState::ParseAttrs;
        Ok(ParsingResult::Success)
    }

    fn parse_attrs(&mut self) -> Result<ParsingResult, FormatError> {
        let Some(view) = self
            .buffer
            .slice_off(self.header.attrs.offset, self.header.attrs.size as usize)
        else {
            return Ok(ParsingResult::MoreDataNeeded);
        };

        let mut attr_reader = AttrsSectionReader::new(&self.header, view)?;
        let mut builder = PerfSession::builder(0);
        while attr_reader.can_read_next() {
            let entry = attr_reader.read_next()?;
            if entry.ids.size % 8 != 0 {
                return Err(FormatError::InvalidIdSectionSize(entry.ids.size));
            }

            let Some(ids_view) = self
                .buffer
                .slice_off(entry.ids.offset, entry.ids.size as usize)
            else {
                return Ok(ParsingResult::MoreDataNeeded);
            };
            let ids = RecordReader::new(ids_view.data())
                .read_vector_u64(entry.ids.size as usize / 8)
                .expect("ids slice is ids sized");
            builder.add_attr_and_ids(entry.attr, ids);
        }

        self.session = Some(builder.build()?);
        // The buffer is deliberately not advanced: the attrs section may sit
        // anywhere relative to the data section.
        self.state = ParsingState::SeekRecords;
        Ok(ParsingResult::Success)
    }

    fn seek_records(&mut self) -> Result<ParsingResult, FormatError> {
        if self.header.data.offset < self.buffer.start_offset() {
            return Err(FormatError::InvalidDataOffset(self.header.data.offset));
        }
        if !self.buffer.pop_front_until(self.header.data.offset) {
            return Ok(ParsingResult::MoreDataNeeded);
        }
        self.state = ParsingState::ParseRecords;
        Ok(ParsingResult::Success)
    }

    fn parse_records(&mut self, ctx: &mut TraceContext) -> Result<ParsingResult, FormatError> {
        while self.buffer.start_offset() < self.header.data.end() {
            let Some(record) = self.parse_record()? else {
                return Ok(ParsingResult::MoreDataNeeded);
            };

            if !self.push_record(ctx, record) {
                ctx.storage.increment_stats(StatCounter::PerfRecordSkipped);
            }
        }

        self.state = ParsingState::ParseFeatureSections;
        Ok(ParsingResult::Success)
    }

    fn parse_record(&mut self) -> Result<Option<Record>, FormatError> {
        let session = Arc::clone(self.session.as_ref().expect("session built before records"));
        let start = self.buffer.start_offset();
        let header_size = mem::size_of::<perf_event_header>();

        let Some(view) = self.buffer.slice_off(start, header_size) else {
            return Ok(None);
        };
        let header: perf_event_header = RecordReader::new(view.data())
            .read_pod()
            .expect("record header slice is header sized");

        if (header.size as usize) < header_size {
            return Err(FormatError::InvalidRecordSize(header.size));
        }

        let Some(payload) = self
            .buffer
            .slice_off(start + header_size as u64, header.size as usize - header_size)
        else {
            return Ok(None);
        };

        let attr = session.find_attr_for_record(&header, payload.data())?;
        let record = Record {
            session,
            attr: Some(attr),
            header,
            payload,
        };

        self.buffer.pop_front_bytes(header.size as u64);
        Ok(Some(record))
    }

    /// Stamps the record with a trace timestamp and hands it to the sorter.
    /// Returns false if the record had to be dropped instead.
    fn push_record(&mut self, ctx: &mut TraceContext, record: Record) -> bool {
        let mut time = None;
        if !read_time(&record, &mut time) {
            return false;
        }

        let Ok(trace_ts) = self.to_trace_timestamp(ctx, time) else {
            return false;
        };

        match record.header._type {
            PERF_RECORD_AUXTRACE_INFO | PERF_RECORD_AUXTRACE | PERF_RECORD_AUX => {
                // Hardware trace payloads are not interpreted; they never
                // reach the sorter.
            }
            _ => ctx.sorter.push_perf_record(trace_ts, record),
        }
        true
    }

    fn to_trace_timestamp(
        &mut self,
        ctx: &TraceContext,
        time: Option<u64>,
    ) -> Result<i64, ClockError> {
        let trace_ts = match time {
            Some(time) => ctx.clock_tracker.to_trace_time(ClockDomain::Monotonic, time),
            // Records without a timestamp ride at the front of the sorted
            // stream so the sorter's late-arrival invariant holds.
            None => Ok(self.latest_timestamp.max(ctx.sorter.max_timestamp())),
        };

        if let Ok(ts) = trace_ts {
            self.latest_timestamp = self.latest_timestamp.max(ts);
        }
        trace_ts
    }

    fn parse_feature_sections(&mut self) -> Result<ParsingResult, FormatError> {
        debug_assert_eq!(self.buffer.start_offset(), self.header.data.end());
        let Some(view) = self.buffer.slice_off(
            self.feature_headers_section.offset,
            self.feature_headers_section.size as usize,
        ) else {
            return Ok(ParsingResult::MoreDataNeeded);
        };

        let mut reader = RecordReader::new(view.data());
        for &feature_id in &self.feature_ids {
            let section: perf_file_section = reader
                .read_pod()
                .expect("feature index slice is index sized");
            self.feature_sections.push((feature_id, section));
        }

        self.feature_sections
            .sort_by(|a, b| b.1.offset.cmp(&a.1.offset));

        self.buffer
            .pop_front_until(self.feature_headers_section.end());
        self.state = if self.feature_sections.is_empty() {
            ParsingState::Done
        } else {
            ParsingState::ParseFeatures
        };
        Ok(ParsingResult::Success)
    }

    fn parse_features(&mut self, ctx: &mut TraceContext) -> Result<ParsingResult, FormatError> {
        while let Some(&(feature_id, section)) = self.feature_sections.last() {
            let Some(view) = self.buffer.slice_off(section.offset, section.size as usize) else {
                return Ok(ParsingResult::MoreDataNeeded);
            };

            self.parse_feature(ctx, feature_id, view)?;
            self.buffer.pop_front_until(section.end());
            self.feature_sections.pop();
        }

        self.state = ParsingState::Done;
        Ok(ParsingResult::Success)
    }

    fn parse_feature(
        &self,
        ctx: &mut TraceContext,
        feature_id: u8,
        data: TraceBlobView,
    ) -> Result<(), FormatError> {
        let session = self.session.as_ref().expect("session built before features");
        let feature_err = |e: anyhow::Error| FormatError::Feature {
            id: feature_id,
            reason: format!("{e:#}"),
        };

        match feature_id {
            features::ID_CMD_LINE => {
                let args = features::parse_cmdline(data.data()).map_err(feature_err)?;
                session.set_cmdline(args);
            }

            features::ID_EVENT_DESC => {
                features::parse_event_desc(data.data(), |desc| {
                    for id in &desc.ids {
                        session.set_event_name(*id, desc.event_string.clone());
                    }
                })
                .map_err(feature_err)?;
            }

            features::ID_BUILD_ID => {
                features::parse_build_ids(data.data(), |entry| {
                    session.add_build_id(
                        entry.pid,
                        entry.filename,
                        BuildId::from_raw(&entry.build_id),
                    );
                })
                .map_err(feature_err)?;
            }

            features::ID_GROUP_DESC => {
                // TODO: attach groupings to events once a consumer exists.
                features::parse_group_desc(data.data()).map_err(feature_err)?;
            }

            features::ID_SIMPLEPERF_META_INFO => {
                let meta = features::parse_simpleperf_meta_info(data.data())
                    .map_err(feature_err)?;
                for ((event_type, config), name) in &meta.event_type_info {
                    session.set_event_name_for_config(*event_type, *config, name);
                }
            }

            features::ID_SIMPLEPERF_FILE2 => {
                features::parse_simpleperf_file2(&data, |blob| {
                    ctx.dso_tracker.add_simpleperf_file2(blob);
                })
                .map_err(feature_err)?;
            }

            _ => {
                log::debug!("skipping unsupported perf feature {feature_id}");
                ctx.storage
                    .increment_indexed_stats(IndexedStat::PerfFeaturesSkipped, feature_id as u64);
            }
        }

        Ok(())
    }
}

impl Default for PerfDataTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn add_ids(id_offset: u8, mut flags: u64, feature_ids: &mut Vec<u8>) {
    for i in 0u8..64 {
        if flags & 1 != 0 {
            feature_ids.push(id_offset + i);
        }
        flags >>= 1;
    }
}

fn extract_feature_ids(flags: u64, flags1: &[u64; 3]) -> Vec<u8> {
    let mut feature_ids = Vec::new();
    add_ids(0, flags, &mut feature_ids);
    add_ids(64, flags1[0], &mut feature_ids);
    add_ids(128, flags1[1], &mut feature_ids);
    add_ids(192, flags1[2], &mut feature_ids);
    feature_ids
}

/// Extracts the perf timestamp of a record, if its attr says it has one.
/// Returns false if the record is too small to hold the promised fields.
fn read_time(record: &Record, time: &mut Option<u64>) -> bool {
    let Some(attr) = &record.attr else {
        *time = None;
        return true;
    };
    let mut reader = RecordReader::new(record.payload.data());

    if record.header._type != PERF_RECORD_SAMPLE {
        let Some(offset) = attr.time_offset_from_end() else {
            *time = None;
            return true;
        };
        if offset > reader.size_left() {
            return false;
        }
        let skip = reader.size_left() - offset;
        if reader.skip(skip).is_none() {
            return false;
        }
        *time = reader.read_optional_u64();
        return true;
    }

    let Some(offset) = attr.time_offset_from_start() else {
        *time = None;
        return true;
    };
    if reader.skip(offset).is_none() {
        return false;
    }
    *time = reader.read_optional_u64();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_feature_ids() {
        assert!(extract_feature_ids(0, &[0, 0, 0]).is_empty());
        assert_eq!(extract_feature_ids(0b101, &[0, 0, 0]), vec![0, 2]);
        assert_eq!(extract_feature_ids(0, &[1, 0, 0]), vec![64]);
        assert_eq!(extract_feature_ids(0, &[0, 1 << 1, 0]), vec![129]);
        assert_eq!(extract_feature_ids(0, &[0, 0, 1 << 63]), vec![255]);
        assert_eq!(
            extract_feature_ids(1 << 11, &[0, (1 << 1) | (1 << 4), 0]),
            vec![11, 129, 132]
        );
    }
}
