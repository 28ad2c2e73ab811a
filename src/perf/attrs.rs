//! `perf_event_attr` handling: the immutable descriptor of one recorded
//! event type, its derived field offsets, and the reader iterating the file's
//! attrs section.
//!
//! The byte layout of every record in the data section depends on the
//! `sample_type` bitmask of the attr it belongs to. SAMPLE records carry the
//! selected fields front-to-back in a fixed canonical order; all other record
//! types carry a trailing `sample_id` suffix with a subset of the same fields
//! when `sample_id_all` is set. The offsets of the TIME and ID fields inside
//! both encodings are fully determined by the mask and cached here.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard};

use crate::buffer::TraceBlobView;
use crate::perf::abi::*;
use crate::perf::FormatError;
use crate::reader::RecordReader;

fn time_offset_from_start(sample_type: u64) -> Option<usize> {
    if sample_type & PERF_SAMPLE_TIME == 0 {
        return None;
    }
    let mut offset = 0;
    for bit in [PERF_SAMPLE_IDENTIFIER, PERF_SAMPLE_IP, PERF_SAMPLE_TID] {
        if sample_type & bit != 0 {
            offset += 8;
        }
    }
    Some(offset)
}

fn time_offset_from_end(sample_type: u64, sample_id_all: bool) -> Option<usize> {
    if !sample_id_all || sample_type & PERF_SAMPLE_TIME == 0 {
        return None;
    }
    // The time field itself plus everything after it in the suffix.
    let mut offset = 8;
    for bit in [
        PERF_SAMPLE_ID,
        PERF_SAMPLE_STREAM_ID,
        PERF_SAMPLE_CPU,
        PERF_SAMPLE_IDENTIFIER,
    ] {
        if sample_type & bit != 0 {
            offset += 8;
        }
    }
    Some(offset)
}

fn id_offset_from_start(sample_type: u64) -> Option<usize> {
    if sample_type & PERF_SAMPLE_IDENTIFIER != 0 {
        return Some(0);
    }
    if sample_type & PERF_SAMPLE_ID == 0 {
        return None;
    }
    let mut offset = 0;
    for bit in [
        PERF_SAMPLE_IP,
        PERF_SAMPLE_TID,
        PERF_SAMPLE_TIME,
        PERF_SAMPLE_ADDR,
    ] {
        if sample_type & bit != 0 {
            offset += 8;
        }
    }
    Some(offset)
}

fn id_offset_from_end(sample_type: u64, sample_id_all: bool) -> Option<usize> {
    if !sample_id_all {
        return None;
    }
    if sample_type & PERF_SAMPLE_IDENTIFIER != 0 {
        return Some(8);
    }
    if sample_type & PERF_SAMPLE_ID == 0 {
        return None;
    }
    let mut offset = 8;
    for bit in [PERF_SAMPLE_STREAM_ID, PERF_SAMPLE_CPU] {
        if sample_type & bit != 0 {
            offset += 8;
        }
    }
    Some(offset)
}

/// One monotonically accumulated counter series.
#[derive(Debug, Default, Clone)]
pub struct PerfCounter {
    last_count: f64,
    series: Vec<(i64, f64)>,
}

impl PerfCounter {
    pub fn add_delta(&mut self, trace_ts: i64, delta: f64) {
        self.last_count += delta;
        self.series.push((trace_ts, self.last_count));
    }

    pub fn add_count(&mut self, trace_ts: i64, count: f64) {
        self.last_count = count;
        self.series.push((trace_ts, self.last_count));
    }

    pub fn series(&self) -> &[(i64, f64)] {
        &self.series
    }
}

#[derive(Default)]
struct AttrState {
    event_name: Option<String>,
    counters: HashMap<u32, PerfCounter>,
}

/// Write access to one per-CPU counter, held while the attr state is locked.
pub struct CounterHandle<'a> {
    state: MutexGuard<'a, AttrState>,
    cpu: u32,
}

impl CounterHandle<'_> {
    fn counter(&mut self) -> &mut PerfCounter {
        self.state
            .counters
            .get_mut(&self.cpu)
            .expect("counter created before handle is handed out")
    }

    pub fn add_delta(&mut self, trace_ts: i64, delta: f64) {
        self.counter().add_delta(trace_ts, delta);
    }

    pub fn add_count(&mut self, trace_ts: i64, count: f64) {
        self.counter().add_count(trace_ts, count);
    }
}

/// Immutable descriptor of one event type, shared by every record bound to
/// it. Only the event name and the per-CPU counters mutate after
/// construction, both behind one lock.
pub struct PerfEventAttr {
    attr: perf_event_attr,
    time_offset_from_start: Option<usize>,
    time_offset_from_end: Option<usize>,
    id_offset_from_start: Option<usize>,
    id_offset_from_end: Option<usize>,
    state: Mutex<AttrState>,
}

impl PerfEventAttr {
    pub fn new(attr: perf_event_attr) -> Self {
        let sample_type = attr.sample_type;
        let sample_id_all = attr.flags.sample_id_all() != 0;
        Self {
            attr,
            time_offset_from_start: time_offset_from_start(sample_type),
            time_offset_from_end: time_offset_from_end(sample_type, sample_id_all),
            id_offset_from_start: id_offset_from_start(sample_type),
            id_offset_from_end: id_offset_from_end(sample_type, sample_id_all),
            state: Mutex::new(AttrState::default()),
        }
    }

    pub fn event_type(&self) -> u32 {
        self.attr._type
    }

    pub fn config(&self) -> u64 {
        self.attr.config
    }

    pub fn sample_type(&self) -> u64 {
        self.attr.sample_type
    }

    pub fn read_format(&self) -> u64 {
        self.attr.read_format
    }

    pub fn sample_id_all(&self) -> bool {
        self.attr.flags.sample_id_all() != 0
    }

    /// The configured sampling period; absent in frequency mode, where the
    /// kernel adjusts the period dynamically and reports it per sample.
    pub fn sample_period(&self) -> Option<u64> {
        if self.attr.flags.freq() != 0 {
            None
        } else {
            Some(self.attr.sample_period_or_freq)
        }
    }

    /// Offset of the time field from the start of a SAMPLE payload.
    pub fn time_offset_from_start(&self) -> Option<usize> {
        self.time_offset_from_start
    }

    /// Offset of the time field from the end of a non-SAMPLE record.
    pub fn time_offset_from_end(&self) -> Option<usize> {
        self.time_offset_from_end
    }

    pub fn id_offset_from_start(&self) -> Option<usize> {
        self.id_offset_from_start
    }

    pub fn id_offset_from_end(&self) -> Option<usize> {
        self.id_offset_from_end
    }

    pub fn set_event_name(&self, name: String) {
        self.state.lock().expect("attr state poisoned").event_name = Some(name);
    }

    pub fn event_name(&self) -> Option<String> {
        self.state
            .lock()
            .expect("attr state poisoned")
            .event_name
            .clone()
    }

    pub fn get_or_create_counter(&self, cpu: u32) -> CounterHandle<'_> {
        let mut state = self.state.lock().expect("attr state poisoned");
        state.counters.entry(cpu).or_default();
        CounterHandle { state, cpu }
    }

    pub fn counter_series(&self, cpu: u32) -> Option<Vec<(i64, f64)>> {
        self.state
            .lock()
            .expect("attr state poisoned")
            .counters
            .get(&cpu)
            .map(|c| c.series().to_vec())
    }
}

/// One entry of the attrs section: the attr plus the location of its list of
/// sample ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttrsEntry {
    pub attr: perf_event_attr,
    pub ids: perf_file_section,
}

/// Iterates the attrs section. The stride is the `attr_size` the file header
/// declares; files written with an older or newer attr revision than ours are
/// read as the common prefix, with unknown trailing bytes skipped.
pub struct AttrsSectionReader {
    section: TraceBlobView,
    offset: usize,
    attr_stride: usize,
}

impl AttrsSectionReader {
    pub fn new(header: &perf_file_header, section: TraceBlobView) -> Result<Self, FormatError> {
        let attr_stride = header.attr_size as usize;
        if attr_stride <= mem::size_of::<perf_file_section>() {
            return Err(FormatError::InvalidAttrSize(header.attr_size));
        }
        if section.len() % attr_stride != 0 {
            return Err(FormatError::InvalidAttrsSection {
                section_size: section.len() as u64,
                attr_size: header.attr_size,
            });
        }
        Ok(Self {
            section,
            offset: 0,
            attr_stride,
        })
    }

    pub fn can_read_next(&self) -> bool {
        self.offset < self.section.len()
    }

    pub fn read_next(&mut self) -> Result<AttrsEntry, FormatError> {
        let bytes = &self.section.data()[self.offset..self.offset + self.attr_stride];
        self.offset += self.attr_stride;

        let attr_size = self.attr_stride - mem::size_of::<perf_file_section>();
        let mut reader = RecordReader::new(bytes);
        let attr: perf_event_attr = reader
            .read_pod_prefix(attr_size)
            .expect("stride-sized entry slice");
        if attr_size > mem::size_of::<perf_event_attr>() {
            reader
                .skip(attr_size - mem::size_of::<perf_event_attr>())
                .expect("stride-sized entry slice");
        }
        let ids: perf_file_section = reader.read_pod().expect("stride-sized entry slice");
        Ok(AttrsEntry { attr, ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr_with(sample_type: u64, sample_id_all: bool) -> PerfEventAttr {
        let mut attr = perf_event_attr::default();
        attr.sample_type = sample_type;
        attr.flags.set_sample_id_all(sample_id_all as u64);
        PerfEventAttr::new(attr)
    }

    #[test]
    fn test_time_offset_from_start() {
        let attr = attr_with(PERF_SAMPLE_TID | PERF_SAMPLE_TIME, true);
        assert_eq!(attr.time_offset_from_start(), Some(8));

        let attr = attr_with(
            PERF_SAMPLE_IDENTIFIER | PERF_SAMPLE_IP | PERF_SAMPLE_TID | PERF_SAMPLE_TIME,
            true,
        );
        assert_eq!(attr.time_offset_from_start(), Some(24));

        let attr = attr_with(PERF_SAMPLE_TID, true);
        assert_eq!(attr.time_offset_from_start(), None);
    }

    #[test]
    fn test_time_offset_from_end() {
        let attr = attr_with(PERF_SAMPLE_TID | PERF_SAMPLE_TIME, true);
        assert_eq!(attr.time_offset_from_end(), Some(8));

        let attr = attr_with(
            PERF_SAMPLE_TIME | PERF_SAMPLE_ID | PERF_SAMPLE_CPU,
            true,
        );
        assert_eq!(attr.time_offset_from_end(), Some(24));

        // Without sample_id_all there is no suffix on non-SAMPLE records.
        let attr = attr_with(PERF_SAMPLE_TIME, false);
        assert_eq!(attr.time_offset_from_end(), None);
    }

    #[test]
    fn test_id_offsets() {
        let attr = attr_with(
            PERF_SAMPLE_TID | PERF_SAMPLE_TIME | PERF_SAMPLE_CPU | PERF_SAMPLE_ID,
            true,
        );
        // SAMPLE: tid(8) + time(8) precede id.
        assert_eq!(attr.id_offset_from_start(), Some(16));
        // Suffix: id(8) then cpu(8) follow before the end.
        assert_eq!(attr.id_offset_from_end(), Some(16));

        let attr = attr_with(PERF_SAMPLE_IDENTIFIER | PERF_SAMPLE_TID, true);
        assert_eq!(attr.id_offset_from_start(), Some(0));
        assert_eq!(attr.id_offset_from_end(), Some(8));

        let attr = attr_with(PERF_SAMPLE_TID, true);
        assert_eq!(attr.id_offset_from_start(), None);
        assert_eq!(attr.id_offset_from_end(), None);
    }

    #[test]
    fn test_sample_period_absent_in_freq_mode() {
        let mut attr = perf_event_attr::default();
        attr.sample_period_or_freq = 4000;
        attr.flags.set_freq(1);
        assert_eq!(PerfEventAttr::new(attr).sample_period(), None);

        let mut attr = perf_event_attr::default();
        attr.sample_period_or_freq = 1000;
        assert_eq!(PerfEventAttr::new(attr).sample_period(), Some(1000));
    }

    #[test]
    fn test_counters_accumulate() {
        let attr = attr_with(0, false);
        attr.get_or_create_counter(0).add_delta(10, 5.0);
        attr.get_or_create_counter(0).add_delta(20, 3.0);
        attr.get_or_create_counter(1).add_count(30, 100.0);
        assert_eq!(
            attr.counter_series(0),
            Some(vec![(10, 5.0), (20, 8.0)])
        );
        assert_eq!(attr.counter_series(1), Some(vec![(30, 100.0)]));
        assert_eq!(attr.counter_series(2), None);
    }

    fn header_with_attr_size(attr_size: u64) -> perf_file_header {
        perf_file_header {
            attr_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_attrs_section_reader_native_stride() {
        let mut attr = perf_event_attr::default();
        attr.sample_type = PERF_SAMPLE_TIME;
        attr.size = mem::size_of::<perf_event_attr>() as u32;
        let mut bytes = unsafe { plain::as_bytes(&attr) }.to_vec();
        bytes.extend_from_slice(unsafe { plain::as_bytes(&perf_file_section {
            offset: 0x100,
            size: 16,
        }) });

        let stride = bytes.len() as u64;
        let header = header_with_attr_size(stride);
        let mut reader =
            AttrsSectionReader::new(&header, TraceBlobView::new(bytes)).unwrap();
        assert!(reader.can_read_next());
        let entry = reader.read_next().unwrap();
        assert_eq!(entry.attr.sample_type, PERF_SAMPLE_TIME);
        assert_eq!(entry.ids.offset, 0x100);
        assert_eq!(entry.ids.size, 16);
        assert!(!reader.can_read_next());
    }

    #[test]
    fn test_attrs_section_reader_short_attr() {
        // A VER0-sized attr: only the first 64 bytes are present.
        let mut attr = perf_event_attr::default();
        attr.sample_type = PERF_SAMPLE_IP;
        let mut bytes = unsafe { plain::as_bytes(&attr) }[..64].to_vec();
        bytes.extend_from_slice(unsafe { plain::as_bytes(&perf_file_section {
            offset: 0x40,
            size: 8,
        }) });

        let header = header_with_attr_size(bytes.len() as u64);
        let mut reader =
            AttrsSectionReader::new(&header, TraceBlobView::new(bytes)).unwrap();
        let entry = reader.read_next().unwrap();
        assert_eq!(entry.attr.sample_type, PERF_SAMPLE_IP);
        assert_eq!(entry.ids.offset, 0x40);
    }

    #[test]
    fn test_attrs_section_reader_rejects_misaligned_section() {
        let header = header_with_attr_size(128);
        let err = AttrsSectionReader::new(&header, TraceBlobView::new(vec![0; 100]));
        assert!(err.is_err());
    }
}
