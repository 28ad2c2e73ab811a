//! Staging area ordering records by trace timestamp before parsing.
//!
//! The tokenizer emits records in file order; drains happen in timestamp
//! order, with file order preserved between equal timestamps.

use crate::perf::record::Record;

#[derive(Default)]
pub struct Sorter {
    queue: Vec<(i64, Record)>,
    max_ts: i64,
}

impl Sorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_perf_record(&mut self, trace_ts: i64, record: Record) {
        self.max_ts = self.max_ts.max(trace_ts);
        self.queue.push((trace_ts, record));
    }

    /// Largest timestamp pushed so far, 0 before the first push.
    pub fn max_timestamp(&self) -> i64 {
        self.max_ts
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain_sorted(&mut self) -> Vec<(i64, Record)> {
        let mut queue = std::mem::take(&mut self.queue);
        queue.sort_by_key(|(ts, _)| *ts);
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TraceBlobView;
    use crate::perf::abi::{perf_event_attr, perf_event_header};
    use crate::perf::session::PerfSession;

    fn record_with_misc(misc: u16) -> Record {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(perf_event_attr::default(), Vec::new());
        let session = builder.build().unwrap();
        Record {
            session,
            attr: None,
            header: perf_event_header {
                _type: 0,
                misc,
                size: 8,
            },
            payload: TraceBlobView::new(Vec::new()),
        }
    }

    #[test]
    fn test_max_timestamp_tracks_pushes() {
        let mut sorter = Sorter::new();
        assert_eq!(sorter.max_timestamp(), 0);
        sorter.push_perf_record(50, record_with_misc(0));
        sorter.push_perf_record(20, record_with_misc(0));
        assert_eq!(sorter.max_timestamp(), 50);
    }

    #[test]
    fn test_drain_sorts_by_timestamp() {
        let mut sorter = Sorter::new();
        sorter.push_perf_record(30, record_with_misc(0));
        sorter.push_perf_record(10, record_with_misc(0));
        sorter.push_perf_record(20, record_with_misc(0));
        let ts: Vec<i64> = sorter.drain_sorted().iter().map(|(ts, _)| *ts).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert!(sorter.is_empty());
    }

    #[test]
    fn test_drain_is_stable_for_equal_timestamps() {
        let mut sorter = Sorter::new();
        sorter.push_perf_record(10, record_with_misc(1));
        sorter.push_perf_record(10, record_with_misc(2));
        let drained = sorter.drain_sorted();
        assert_eq!(drained[0].1.header.misc, 1);
        assert_eq!(drained[1].1.header.misc, 2);
    }
}
