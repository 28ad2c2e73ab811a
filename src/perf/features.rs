//! Parsers for the optional feature sections trailing the data section.
//!
//! Which sections exist is encoded in the 256-bit flags bitmap of the file
//! header; each set bit owns one entry of the section index that follows the
//! data section. Numeric ids below 128 are defined by the perf tool, the
//! simpleperf ids live above 128.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use crate::buffer::TraceBlobView;
use crate::perf::abi::perf_event_attr;
use crate::perf::abi::perf_event_header;
use crate::reader::RecordReader;

pub const ID_TRACING_DATA: u8 = 1;
pub const ID_BUILD_ID: u8 = 2;
pub const ID_HOSTNAME: u8 = 3;
pub const ID_OSRELEASE: u8 = 4;
pub const ID_VERSION: u8 = 5;
pub const ID_ARCH: u8 = 6;
pub const ID_NRCPUS: u8 = 7;
pub const ID_CPUDESC: u8 = 8;
pub const ID_CPUID: u8 = 9;
pub const ID_TOTAL_MEM: u8 = 10;
pub const ID_CMD_LINE: u8 = 11;
pub const ID_EVENT_DESC: u8 = 12;
pub const ID_CPU_TOPOLOGY: u8 = 13;
pub const ID_NUMA_TOPOLOGY: u8 = 14;
pub const ID_BRANCH_STACK: u8 = 15;
pub const ID_PMU_MAPPINGS: u8 = 16;
pub const ID_GROUP_DESC: u8 = 17;
pub const ID_AUXTRACE: u8 = 18;
pub const ID_SIMPLEPERF_META_INFO: u8 = 129;
pub const ID_SIMPLEPERF_FILE2: u8 = 132;

/// Length-prefixed string as written by the perf tool: u32 length, then that
/// many bytes with a NUL terminator (and padding) inside.
fn read_perf_string(reader: &mut RecordReader) -> Option<String> {
    let len = reader.read_u32()? as usize;
    let bytes = reader.read_bytes(len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// CMD_LINE: the argv the file was recorded with.
pub fn parse_cmdline(data: &[u8]) -> Result<Vec<String>> {
    let mut reader = RecordReader::new(data);
    let argc = reader.read_u32().context("truncated cmdline")? as usize;
    let mut args = Vec::with_capacity(argc.min(data.len()));
    for _ in 0..argc {
        args.push(read_perf_string(&mut reader).context("truncated cmdline entry")?);
    }
    Ok(args)
}

pub struct EventDescription {
    pub attr: perf_event_attr,
    pub ids: Vec<u64>,
    pub event_string: String,
}

/// EVENT_DESC: human-readable event names bound to sample ids.
pub fn parse_event_desc(data: &[u8], mut callback: impl FnMut(EventDescription)) -> Result<()> {
    let mut reader = RecordReader::new(data);
    let nr = reader.read_u32().context("truncated event desc header")?;
    let attr_size = reader.read_u32().context("truncated event desc header")? as usize;
    if attr_size == 0 {
        bail!("invalid attr size in event desc: 0");
    }
    for _ in 0..nr {
        let attr: perf_event_attr = reader
            .read_pod_prefix(attr_size)
            .context("truncated event desc attr")?;
        if attr_size > std::mem::size_of::<perf_event_attr>() {
            reader
                .skip(attr_size - std::mem::size_of::<perf_event_attr>())
                .context("truncated event desc attr")?;
        }
        let nr_ids = reader.read_u32().context("truncated event desc")? as usize;
        let event_string =
            read_perf_string(&mut reader).context("truncated event desc name")?;
        let ids = reader
            .read_vector_u64(nr_ids)
            .context("truncated event desc ids")?;
        callback(EventDescription {
            attr,
            ids,
            event_string,
        });
    }
    Ok(())
}

pub struct BuildIdEntry {
    pub pid: i32,
    pub build_id: Vec<u8>,
    pub filename: String,
}

// The on-disk entry reserves 24 bytes for the build id; only the first 20
// are id bytes.
const BUILD_ID_FIELD_SIZE: usize = 24;
const BUILD_ID_SIZE: usize = 20;

/// BUILD_ID: `(pid, filename) -> build id` for every file mapped during the
/// recording.
pub fn parse_build_ids(data: &[u8], mut callback: impl FnMut(BuildIdEntry)) -> Result<()> {
    let mut reader = RecordReader::new(data);
    while reader.size_left() != 0 {
        let header: perf_event_header = reader
            .read_pod()
            .context("truncated build id entry header")?;
        let fixed = std::mem::size_of::<perf_event_header>() + 4 + BUILD_ID_FIELD_SIZE;
        let Some(filename_len) = (header.size as usize).checked_sub(fixed) else {
            bail!("invalid build id entry size: {}", header.size);
        };
        let pid = reader.read_i32().context("truncated build id entry")?;
        let build_id = reader
            .read_bytes(BUILD_ID_FIELD_SIZE)
            .context("truncated build id entry")?[..BUILD_ID_SIZE]
            .to_vec();
        let raw_filename = reader
            .read_bytes(filename_len)
            .context("truncated build id filename")?;
        let end = raw_filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_filename.len());
        callback(BuildIdEntry {
            pid,
            build_id,
            filename: String::from_utf8_lossy(&raw_filename[..end]).into_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub struct GroupDescEntry {
    pub name: String,
    pub leader_idx: u32,
    pub nr_members: u32,
}

#[derive(Debug, Default)]
pub struct HeaderGroupDesc {
    pub entries: Vec<GroupDescEntry>,
}

/// GROUP_DESC: event grouping metadata. Validated but not consumed anywhere
/// yet.
pub fn parse_group_desc(data: &[u8]) -> Result<HeaderGroupDesc> {
    let mut reader = RecordReader::new(data);
    let nr = reader.read_u32().context("truncated group desc")?;
    let mut desc = HeaderGroupDesc::default();
    for _ in 0..nr {
        let name = read_perf_string(&mut reader).context("truncated group desc name")?;
        let leader_idx = reader.read_u32().context("truncated group desc")?;
        let nr_members = reader.read_u32().context("truncated group desc")?;
        desc.entries.push(GroupDescEntry {
            name,
            leader_idx,
            nr_members,
        });
    }
    Ok(desc)
}

#[derive(Debug, Default)]
pub struct SimpleperfMetaInfo {
    pub entries: HashMap<String, String>,
    /// `(event type, config) -> event name`, from the event_type_info key.
    pub event_type_info: Vec<((u32, u64), String)>,
}

/// SIMPLEPERF_META_INFO: NUL-separated key/value pairs written by simpleperf.
pub fn parse_simpleperf_meta_info(data: &[u8]) -> Result<SimpleperfMetaInfo> {
    let mut meta = SimpleperfMetaInfo::default();
    let mut parts = data.split(|&b| b == 0);
    loop {
        let Some(key) = parts.next() else { break };
        if key.is_empty() {
            break;
        }
        let value = parts.next().context("meta info key without value")?;
        let key = String::from_utf8_lossy(key).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        if key == "event_type_info" {
            for line in value.lines() {
                let mut fields = line.split(',');
                let (Some(name), Some(ty), Some(config)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    bail!("malformed event_type_info line: {line}");
                };
                let ty: u32 = ty.trim().parse().context("malformed event type")?;
                let config: u64 = config.trim().parse().context("malformed event config")?;
                meta.event_type_info.push(((ty, config), name.to_string()));
            }
        }
        meta.entries.insert(key, value);
    }
    Ok(meta)
}

/// SIMPLEPERF_FILE2: length-prefixed protobuf blobs describing DSOs. The
/// blobs are forwarded opaquely.
pub fn parse_simpleperf_file2(
    data: &TraceBlobView,
    mut callback: impl FnMut(TraceBlobView),
) -> Result<()> {
    let mut offset = 0;
    let bytes = data.data();
    while offset < bytes.len() {
        let mut reader = RecordReader::new(&bytes[offset..]);
        let len = reader.read_u32().context("truncated file2 length")? as usize;
        if len > reader.size_left() {
            bail!("file2 blob length {len} exceeds section size");
        }
        callback(data.slice(offset + 4, len));
        offset += 4 + len;
    }
    Ok(())
}
