//! Virtual memory mappings created from MMAP/MMAP2 records.
//!
//! Kernel mappings are global; user mappings belong to a process (upid).
//! Address lookups resolve a pc to the most recently created mapping covering
//! it, mirroring how later mmaps shadow earlier ones at the same address.
//! The dummy mapping backs frames whose address no mapping covers, e.g.
//! JITted code for which simpleperf emits no mmap events.

use std::collections::HashMap;
use std::fmt;

use crate::process::Upid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingId(pub u32);

/// Raw build id bytes as found in the trace.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BuildId(Vec<u8>);

impl BuildId {
    pub fn from_raw(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn raw(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildId({})", self.to_hex())
    }
}

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn from_start_and_size(start: u64, size: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(size),
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

#[derive(Debug, Clone)]
pub struct CreateMappingParams {
    pub address_range: AddressRange,
    /// File offset the mapping starts at (pgoff).
    pub exact_offset: u64,
    /// Offset of the ELF header within the mapped file; 0 for file mappings.
    pub start_offset: u64,
    pub load_bias: u64,
    pub filename: String,
    pub build_id: Option<BuildId>,
}

#[derive(Debug)]
pub struct Mapping {
    pub id: MappingId,
    pub address_range: AddressRange,
    pub exact_offset: u64,
    pub start_offset: u64,
    pub load_bias: u64,
    pub filename: String,
    pub build_id: Option<BuildId>,
}

impl Mapping {
    /// Converts an absolute pc into a file-relative one.
    pub fn to_relative_pc(&self, ip: u64) -> u64 {
        ip.wrapping_sub(self.address_range.start)
            .wrapping_add(self.exact_offset)
    }
}

pub struct MappingTracker {
    mappings: Vec<Mapping>,
    kernel: Vec<MappingId>,
    user: HashMap<Upid, Vec<MappingId>>,
    dummy: MappingId,
}

impl MappingTracker {
    pub fn new() -> Self {
        let dummy = Mapping {
            id: MappingId(0),
            address_range: AddressRange { start: 0, end: 0 },
            exact_offset: 0,
            start_offset: 0,
            load_bias: 0,
            filename: String::new(),
            build_id: None,
        };
        Self {
            mappings: vec![dummy],
            kernel: Vec::new(),
            user: HashMap::new(),
            dummy: MappingId(0),
        }
    }

    fn insert(&mut self, params: CreateMappingParams) -> MappingId {
        let id = MappingId(self.mappings.len() as u32);
        self.mappings.push(Mapping {
            id,
            address_range: params.address_range,
            exact_offset: params.exact_offset,
            start_offset: params.start_offset,
            load_bias: params.load_bias,
            filename: params.filename,
            build_id: params.build_id,
        });
        id
    }

    pub fn create_kernel_mapping(&mut self, params: CreateMappingParams) -> MappingId {
        let id = self.insert(params);
        self.kernel.push(id);
        id
    }

    pub fn create_user_mapping(&mut self, upid: Upid, params: CreateMappingParams) -> MappingId {
        let id = self.insert(params);
        self.user.entry(upid).or_default().push(id);
        id
    }

    pub fn find_kernel_mapping_for_address(&self, ip: u64) -> Option<MappingId> {
        self.find_in(&self.kernel, ip)
    }

    pub fn find_user_mapping_for_address(&self, upid: Upid, ip: u64) -> Option<MappingId> {
        self.find_in(self.user.get(&upid)?, ip)
    }

    fn find_in(&self, ids: &[MappingId], ip: u64) -> Option<MappingId> {
        ids.iter()
            .rev()
            .copied()
            .find(|id| self.mapping(*id).address_range.contains(ip))
    }

    pub fn get_dummy_mapping(&self) -> MappingId {
        self.dummy
    }

    pub fn mapping(&self, id: MappingId) -> &Mapping {
        &self.mappings[id.0 as usize]
    }

    /// Number of real (non-dummy) mappings.
    pub fn mapping_count(&self) -> usize {
        self.mappings.len() - 1
    }
}

impl Default for MappingTracker {
    fn default() -> Self {
        Self::new()
    }
}
