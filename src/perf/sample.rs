//! Decoding of SAMPLE records.
//!
//! Which fields a SAMPLE record carries, and in what order, is dictated by
//! the `sample_type` bitmask of its attr. The decoder walks the mask in the
//! canonical field order and materializes only what is present.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::perf::abi::*;
use crate::perf::attrs::PerfEventAttr;
use crate::perf::record::{CpuMode, Record};
use crate::perf::session::PerfSession;
use crate::reader::RecordReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidTid {
    pub pid: u32,
    pub tid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFrame {
    pub cpu_mode: CpuMode,
    pub ip: u64,
}

/// One entry of a PERF_FORMAT_GROUP read: the counter value of one event in
/// the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadGroup {
    pub event_id: Option<u64>,
    pub value: u64,
}

pub struct Sample {
    pub perf_session: Arc<PerfSession>,
    pub attr: Arc<PerfEventAttr>,
    pub trace_ts: i64,
    pub cpu_mode: CpuMode,

    pub ip: Option<u64>,
    pub pid_tid: Option<PidTid>,
    pub time: Option<u64>,
    pub addr: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub period: Option<u64>,
    pub read_groups: Vec<ReadGroup>,
    pub callchain: Vec<SampleFrame>,
}

impl Sample {
    pub fn parse(trace_ts: i64, record: &Record) -> Result<Sample> {
        let attr = record
            .attr
            .clone()
            .context("no perf_event_attr for sample")?;
        let sample_type = attr.sample_type();
        let mut reader = RecordReader::new(record.payload.data());

        let mut sample = Sample {
            perf_session: Arc::clone(&record.session),
            attr: Arc::clone(&attr),
            trace_ts,
            cpu_mode: record.cpu_mode(),
            ip: None,
            pid_tid: None,
            time: None,
            addr: None,
            id: None,
            stream_id: None,
            cpu: None,
            period: None,
            read_groups: Vec::new(),
            callchain: Vec::new(),
        };

        if sample_type & PERF_SAMPLE_IDENTIFIER != 0 {
            sample.id = Some(reader.read_u64().context("truncated PERF_SAMPLE_IDENTIFIER")?);
        }
        if sample_type & PERF_SAMPLE_IP != 0 {
            sample.ip = Some(reader.read_u64().context("truncated PERF_SAMPLE_IP")?);
        }
        if sample_type & PERF_SAMPLE_TID != 0 {
            let pid = reader.read_u32().context("truncated PERF_SAMPLE_TID")?;
            let tid = reader.read_u32().context("truncated PERF_SAMPLE_TID")?;
            sample.pid_tid = Some(PidTid { pid, tid });
        }
        if sample_type & PERF_SAMPLE_TIME != 0 {
            sample.time = Some(reader.read_u64().context("truncated PERF_SAMPLE_TIME")?);
        }
        if sample_type & PERF_SAMPLE_ADDR != 0 {
            sample.addr = Some(reader.read_u64().context("truncated PERF_SAMPLE_ADDR")?);
        }
        if sample_type & PERF_SAMPLE_ID != 0 {
            sample.id = Some(reader.read_u64().context("truncated PERF_SAMPLE_ID")?);
        }
        if sample_type & PERF_SAMPLE_STREAM_ID != 0 {
            sample.stream_id = Some(reader.read_u64().context("truncated PERF_SAMPLE_STREAM_ID")?);
        }
        if sample_type & PERF_SAMPLE_CPU != 0 {
            sample.cpu = Some(reader.read_u32().context("truncated PERF_SAMPLE_CPU")?);
            reader.skip(4).context("truncated PERF_SAMPLE_CPU")?;
        }
        if sample_type & PERF_SAMPLE_PERIOD != 0 {
            sample.period = Some(reader.read_u64().context("truncated PERF_SAMPLE_PERIOD")?);
        }
        if sample_type & PERF_SAMPLE_READ != 0 {
            sample.read_groups = parse_read_format(&mut reader, attr.read_format())?;
        }
        if sample_type & PERF_SAMPLE_CALLCHAIN != 0 {
            sample.callchain = parse_callchain(&mut reader, sample.cpu_mode)?;
        }

        Ok(sample)
    }
}

fn parse_read_format(reader: &mut RecordReader, read_format: u64) -> Result<Vec<ReadGroup>> {
    let mut groups = Vec::new();
    if read_format & PERF_FORMAT_GROUP != 0 {
        let nr = reader.read_u64().context("truncated read group count")?;
        if nr as usize > reader.size_left() / 8 {
            bail!("read group count {nr} exceeds record size");
        }
        if read_format & PERF_FORMAT_TOTAL_TIME_ENABLED != 0 {
            reader.skip(8).context("truncated time_enabled")?;
        }
        if read_format & PERF_FORMAT_TOTAL_TIME_RUNNING != 0 {
            reader.skip(8).context("truncated time_running")?;
        }
        for _ in 0..nr {
            let value = reader.read_u64().context("truncated read group value")?;
            let event_id = if read_format & PERF_FORMAT_ID != 0 {
                Some(reader.read_u64().context("truncated read group id")?)
            } else {
                None
            };
            if read_format & PERF_FORMAT_LOST != 0 {
                reader.skip(8).context("truncated read group lost count")?;
            }
            groups.push(ReadGroup { event_id, value });
        }
    } else {
        // Single-event read: consumed but not materialized, counter updates
        // for these samples come from the period instead.
        reader.skip(8).context("truncated read value")?;
        for bit in [
            PERF_FORMAT_TOTAL_TIME_ENABLED,
            PERF_FORMAT_TOTAL_TIME_RUNNING,
            PERF_FORMAT_ID,
            PERF_FORMAT_LOST,
        ] {
            if read_format & bit != 0 {
                reader.skip(8).context("truncated read format field")?;
            }
        }
    }
    Ok(groups)
}

fn parse_callchain(reader: &mut RecordReader, initial_mode: CpuMode) -> Result<Vec<SampleFrame>> {
    let nr = reader.read_u64().context("truncated callchain length")?;
    if nr as usize > reader.size_left() / 8 {
        bail!("callchain length {nr} exceeds record size");
    }
    let mut frames = Vec::with_capacity(nr as usize);
    let mut cpu_mode = initial_mode;
    for _ in 0..nr {
        let ip = reader.read_u64().context("truncated callchain entry")?;
        if ip >= PERF_CONTEXT_MAX {
            // Marker switching the context of the following frames.
            cpu_mode = match ip {
                PERF_CONTEXT_KERNEL => CpuMode::Kernel,
                PERF_CONTEXT_USER => CpuMode::User,
                PERF_CONTEXT_HV => CpuMode::Hypervisor,
                PERF_CONTEXT_GUEST_KERNEL => CpuMode::GuestKernel,
                PERF_CONTEXT_GUEST_USER | PERF_CONTEXT_GUEST => CpuMode::GuestUser,
                _ => CpuMode::Unknown,
            };
            continue;
        }
        frames.push(SampleFrame { cpu_mode, ip });
    }
    Ok(frames)
}
