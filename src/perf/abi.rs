//! On-disk ABI of perf.data files: file header, `perf_event_attr`, record
//! headers and the constants controlling sample layout.
//!
//! Struct names and field order mirror the kernel's `perf_event.h` and
//! `tools/perf` file writer; everything is little-endian. The unions of the
//! kernel struct are flattened to their first member since this crate only
//! reads files and never calls `perf_event_open`.

use bitfield::bitfield;
use plain::Plain;

pub const PERF_FILE_MAGIC: &[u8; 8] = b"PERFILE2";

/// Byte range `[offset, offset + size)` in the file.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct perf_file_section {
    pub offset: u64,
    pub size: u64,
}

impl perf_file_section {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct perf_file_header {
    pub magic: [u8; 8],
    pub size: u64,
    /// Stride of one entry in the attrs section, ids sub-section included.
    pub attr_size: u64,
    pub attrs: perf_file_section,
    pub data: perf_file_section,
    pub event_types: perf_file_section,
    /// With `flags1`, a 256-bit bitmap of feature sections present after the
    /// data section.
    pub flags: u64,
    pub flags1: [u64; 3],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct perf_event_header {
    pub _type: u32,
    pub misc: u16,
    /// Total record size, header included.
    pub size: u16,
}

bitfield! {
    #[derive(Default, Clone, Copy)]
    #[allow(non_camel_case_types)]
    pub struct perf_event_attr_flags(u64);
    impl Debug;
    pub disabled, set_disabled: 0, 0;
    pub inherit, set_inherit: 1, 1;
    pub pinned, set_pinned: 2, 2;
    pub exclusive, set_exclusive: 3, 3;
    pub exclude_user, set_exclude_user: 4, 4;
    pub exclude_kernel, set_exclude_kernel: 5, 5;
    pub exclude_hv, set_exclude_hv: 6, 6;
    pub exclude_idle, set_exclude_idle: 7, 7;
    pub mmap, set_mmap: 8, 8;
    pub comm, set_comm: 9, 9;
    pub freq, set_freq: 10, 10;
    pub inherit_stat, set_inherit_stat: 11, 11;
    pub enable_on_exec, set_enable_on_exec: 12, 12;
    pub task, set_task: 13, 13;
    pub watermark, set_watermark: 14, 14;
    pub precise_ip, set_precise_ip: 15, 16;
    pub mmap_data, set_mmap_data: 17, 17;
    pub sample_id_all, set_sample_id_all: 18, 18;
    pub exclude_host, set_exclude_host: 19, 19;
    pub exclude_guest, set_exclude_guest: 20, 20;
    pub exclude_callchain_kernel, set_exclude_callchain_kernel: 21, 21;
    pub exclude_callchain_user, set_exclude_callchain_user: 22, 22;
    pub mmap2, set_mmap2: 23, 23;
    pub comm_exec, set_comm_exec: 24, 24;
    pub use_clockid, set_use_clockid: 25, 25;
    pub context_switch, set_context_switch: 26, 26;
    pub write_backward, set_write_backward: 27, 27;
    pub namespaces, set_namespaces: 28, 28;
    pub ksymbol, set_ksymbol: 29, 29;
    pub bpf_event, set_bpf_event: 30, 30;
    pub aux_output, set_aux_output: 31, 31;
    pub cgroup, set_cgroup: 32, 32;
    pub text_poke, set_text_poke: 33, 33;
    pub build_id, set_build_id: 34, 34;
    pub inherit_thread, set_inherit_thread: 35, 35;
    pub remove_on_exec, set_remove_on_exec: 36, 36;
    pub sigtrap, set_sigtrap: 37, 37;
    pub __reserved_1, _: 38, 63;
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct perf_event_attr {
    pub _type: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: perf_event_attr_flags,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub __reserved_2: u16,
    pub aux_sample_size: u32,
    pub __reserved_3: u32,
}

unsafe impl Plain for perf_file_section {}
unsafe impl Plain for perf_file_header {}
unsafe impl Plain for perf_event_header {}
unsafe impl Plain for perf_event_attr {}

// perf_event_type values found in the data section.
pub const PERF_RECORD_MMAP: u32 = 1;
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_COMM: u32 = 3;
pub const PERF_RECORD_EXIT: u32 = 4;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_FORK: u32 = 7;
pub const PERF_RECORD_READ: u32 = 8;
pub const PERF_RECORD_SAMPLE: u32 = 9;
pub const PERF_RECORD_MMAP2: u32 = 10;
pub const PERF_RECORD_AUX: u32 = 11;
pub const PERF_RECORD_ITRACE_START: u32 = 12;
pub const PERF_RECORD_LOST_SAMPLES: u32 = 13;
pub const PERF_RECORD_SWITCH: u32 = 14;
pub const PERF_RECORD_SWITCH_CPU_WIDE: u32 = 15;
pub const PERF_RECORD_NAMESPACES: u32 = 16;
pub const PERF_RECORD_KSYMBOL: u32 = 17;
pub const PERF_RECORD_BPF_EVENT: u32 = 18;
pub const PERF_RECORD_CGROUP: u32 = 19;
pub const PERF_RECORD_TEXT_POKE: u32 = 20;

// Synthetic record types written by the perf tool rather than the kernel.
pub const PERF_RECORD_USER_TYPE_START: u32 = 64;
pub const PERF_RECORD_AUXTRACE_INFO: u32 = 70;
pub const PERF_RECORD_AUXTRACE: u32 = 71;
pub const PERF_RECORD_AUXTRACE_ERROR: u32 = 72;
pub const PERF_RECORD_TIME_CONV: u32 = 79;

// perf_event_sample_format bits. Order here is the order the corresponding
// fields appear in a SAMPLE record.
pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_ADDR: u64 = 1 << 3;
pub const PERF_SAMPLE_READ: u64 = 1 << 4;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const PERF_SAMPLE_ID: u64 = 1 << 6;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_SAMPLE_BRANCH_STACK: u64 = 1 << 11;
pub const PERF_SAMPLE_REGS_USER: u64 = 1 << 12;
pub const PERF_SAMPLE_STACK_USER: u64 = 1 << 13;
pub const PERF_SAMPLE_WEIGHT: u64 = 1 << 14;
pub const PERF_SAMPLE_DATA_SRC: u64 = 1 << 15;
pub const PERF_SAMPLE_IDENTIFIER: u64 = 1 << 16;
pub const PERF_SAMPLE_TRANSACTION: u64 = 1 << 17;
pub const PERF_SAMPLE_REGS_INTR: u64 = 1 << 18;
pub const PERF_SAMPLE_PHYS_ADDR: u64 = 1 << 19;

// perf_event_read_format bits.
pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;
pub const PERF_FORMAT_ID: u64 = 1 << 2;
pub const PERF_FORMAT_GROUP: u64 = 1 << 3;
pub const PERF_FORMAT_LOST: u64 = 1 << 4;

// perf_event_header.misc bits.
pub const PERF_RECORD_MISC_CPUMODE_MASK: u16 = 7;
pub const PERF_RECORD_MISC_CPUMODE_UNKNOWN: u16 = 0;
pub const PERF_RECORD_MISC_KERNEL: u16 = 1;
pub const PERF_RECORD_MISC_USER: u16 = 2;
pub const PERF_RECORD_MISC_HYPERVISOR: u16 = 3;
pub const PERF_RECORD_MISC_GUEST_KERNEL: u16 = 4;
pub const PERF_RECORD_MISC_GUEST_USER: u16 = 5;
pub const PERF_RECORD_MISC_MMAP_BUILD_ID: u16 = 1 << 14;

// Callchain entries above this value are context markers, not addresses.
pub const PERF_CONTEXT_HV: u64 = -32i64 as u64;
pub const PERF_CONTEXT_KERNEL: u64 = -128i64 as u64;
pub const PERF_CONTEXT_USER: u64 = -512i64 as u64;
pub const PERF_CONTEXT_GUEST: u64 = -2048i64 as u64;
pub const PERF_CONTEXT_GUEST_KERNEL: u64 = -2176i64 as u64;
pub const PERF_CONTEXT_GUEST_USER: u64 = -2560i64 as u64;
pub const PERF_CONTEXT_MAX: u64 = -4095i64 as u64;
