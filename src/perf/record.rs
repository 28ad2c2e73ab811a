//! A single record from the data section, bound to its session and attr.

use std::sync::Arc;

use crate::buffer::TraceBlobView;
use crate::perf::abi::*;
use crate::perf::attrs::PerfEventAttr;
use crate::perf::session::PerfSession;

/// Execution context a record was captured in, from the low bits of the
/// header's misc field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Unknown,
    Kernel,
    User,
    Hypervisor,
    GuestKernel,
    GuestUser,
}

impl CpuMode {
    pub fn from_misc(misc: u16) -> Self {
        match misc & PERF_RECORD_MISC_CPUMODE_MASK {
            PERF_RECORD_MISC_KERNEL => CpuMode::Kernel,
            PERF_RECORD_MISC_USER => CpuMode::User,
            PERF_RECORD_MISC_HYPERVISOR => CpuMode::Hypervisor,
            PERF_RECORD_MISC_GUEST_KERNEL => CpuMode::GuestKernel,
            PERF_RECORD_MISC_GUEST_USER => CpuMode::GuestUser,
            _ => CpuMode::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CpuMode::Unknown => "unknown",
            CpuMode::Kernel => "kernel",
            CpuMode::User => "user",
            CpuMode::Hypervisor => "hypervisor",
            CpuMode::GuestKernel => "guest_kernel",
            CpuMode::GuestUser => "guest_user",
        }
    }
}

#[derive(Clone)]
pub struct Record {
    pub session: Arc<PerfSession>,
    pub attr: Option<Arc<PerfEventAttr>>,
    pub header: perf_event_header,
    /// Record bytes after the 8-byte header.
    pub payload: TraceBlobView,
}

impl Record {
    pub fn cpu_mode(&self) -> CpuMode {
        CpuMode::from_misc(self.header.misc)
    }
}
