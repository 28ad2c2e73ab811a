//! Sink for simpleperf DSO descriptions (SIMPLEPERF_FILE2 blobs).
//!
//! The blobs are serialized protobufs describing symbol tables of the
//! binaries seen during recording. Symbolization is out of scope here, so
//! they are retained opaquely for downstream consumers.

use crate::buffer::TraceBlobView;

#[derive(Default)]
pub struct DsoTracker {
    simpleperf_files: Vec<TraceBlobView>,
}

impl DsoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_simpleperf_file2(&mut self, blob: TraceBlobView) {
        self.simpleperf_files.push(blob);
    }

    pub fn simpleperf_file_count(&self) -> usize {
        self.simpleperf_files.len()
    }

    pub fn simpleperf_files(&self) -> &[TraceBlobView] {
        &self.simpleperf_files
    }
}
