//! Decoders for MMAP, MMAP2 and COMM record payloads.

use anyhow::{bail, Context, Result};

use crate::mapping::BuildId;
use crate::perf::abi::*;
use crate::perf::record::{CpuMode, Record};
use crate::reader::RecordReader;

pub const MAX_BUILD_ID_SIZE: usize = 20;

/// Fields shared by MMAP and MMAP2.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonMmapFields {
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
}

#[derive(Debug)]
pub struct MmapRecord {
    pub common: CommonMmapFields,
    pub filename: String,
    pub cpu_mode: CpuMode,
}

impl MmapRecord {
    pub fn parse(record: &Record) -> Result<MmapRecord> {
        let mut reader = RecordReader::new(record.payload.data());
        let common = read_common_fields(&mut reader)?;
        let filename = reader
            .read_c_string()
            .context("failed to parse PERF_RECORD_MMAP filename")?;
        Ok(MmapRecord {
            common,
            filename,
            cpu_mode: record.cpu_mode(),
        })
    }
}

#[derive(Debug)]
pub struct Mmap2Record {
    pub common: CommonMmapFields,
    pub prot: u32,
    pub flags: u32,
    pub filename: String,
    pub cpu_mode: CpuMode,
    build_id: Option<BuildId>,
}

impl Mmap2Record {
    pub fn parse(record: &Record) -> Result<Mmap2Record> {
        let mut reader = RecordReader::new(record.payload.data());
        let common = read_common_fields(&mut reader)?;

        // The misc bit selects which union variant follows the common fields:
        // either device/inode info or an inline build id.
        let mut build_id = None;
        if record.header.misc & PERF_RECORD_MISC_MMAP_BUILD_ID != 0 {
            let build_id_size = reader
                .read_u8()
                .context("truncated PERF_RECORD_MMAP2 build id")? as usize;
            if build_id_size > MAX_BUILD_ID_SIZE {
                bail!("invalid build id size: {build_id_size}");
            }
            reader
                .skip(3) // __reserved_1, __reserved_2
                .context("truncated PERF_RECORD_MMAP2 build id")?;
            let bytes = reader
                .read_bytes(MAX_BUILD_ID_SIZE)
                .context("truncated PERF_RECORD_MMAP2 build id")?;
            build_id = Some(BuildId::from_raw(&bytes[..build_id_size]));
        } else {
            // maj, min, ino, ino_generation
            reader
                .skip(4 + 4 + 8 + 8)
                .context("truncated PERF_RECORD_MMAP2")?;
        }

        let prot = reader.read_u32().context("truncated PERF_RECORD_MMAP2")?;
        let flags = reader.read_u32().context("truncated PERF_RECORD_MMAP2")?;
        let filename = reader
            .read_c_string()
            .context("failed to parse PERF_RECORD_MMAP2 filename")?;

        Ok(Mmap2Record {
            common,
            prot,
            flags,
            filename,
            cpu_mode: record.cpu_mode(),
            build_id,
        })
    }

    /// Build id embedded in the record itself, if the file was recorded with
    /// build-id mmap events.
    pub fn build_id(&self) -> Option<BuildId> {
        self.build_id.clone()
    }
}

#[derive(Debug)]
pub struct CommRecord {
    pub pid: u32,
    pub tid: u32,
    pub comm: String,
}

impl CommRecord {
    pub fn parse(record: &Record) -> Result<CommRecord> {
        let mut reader = RecordReader::new(record.payload.data());
        let (pid, tid, comm) = (|| {
            let pid = reader.read_u32()?;
            let tid = reader.read_u32()?;
            let comm = reader.read_c_string()?;
            Some((pid, tid, comm))
        })()
        .context("failed to parse PERF_RECORD_COMM")?;
        Ok(CommRecord { pid, tid, comm })
    }
}

fn read_common_fields(reader: &mut RecordReader) -> Result<CommonMmapFields> {
    (|| {
        Some(CommonMmapFields {
            pid: reader.read_u32()?,
            tid: reader.read_u32()?,
            addr: reader.read_u64()?,
            len: reader.read_u64()?,
            pgoff: reader.read_u64()?,
        })
    })()
    .context("truncated mmap record")
}
