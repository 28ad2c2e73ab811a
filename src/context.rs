//! Shared state of one import: storage plus the trackers the tokenizer and
//! record parser write into. Single-threaded; the pipeline is the only
//! writer.

use crate::clock::ClockTracker;
use crate::mapping::MappingTracker;
use crate::perf::dso::DsoTracker;
use crate::process::ProcessTracker;
use crate::sorter::Sorter;
use crate::stack_profile::StackProfileTracker;
use crate::storage::TraceStorage;

#[derive(Default)]
pub struct TraceContext {
    pub storage: TraceStorage,
    pub clock_tracker: ClockTracker,
    pub process_tracker: ProcessTracker,
    pub mapping_tracker: MappingTracker,
    pub stack_profile_tracker: StackProfileTracker,
    pub dso_tracker: DsoTracker,
    pub sorter: Sorter,
}

impl TraceContext {
    pub fn new() -> Self {
        Self::default()
    }
}
