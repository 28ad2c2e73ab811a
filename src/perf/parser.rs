//! Consumes timestamp-ordered records from the sorter and materializes
//! threads, memory mappings, callchains, samples and counter values.

use anyhow::{bail, Context, Result};

use crate::context::TraceContext;
use crate::mapping::{AddressRange, CreateMappingParams, MappingId};
use crate::perf::abi::*;
use crate::perf::mmap::{CommRecord, CommonMmapFields, Mmap2Record, MmapRecord};
use crate::perf::record::{CpuMode, Record};
use crate::perf::sample::{Sample, SampleFrame};
use crate::process::{ThreadNamePriority, Upid};
use crate::stack_profile::CallsiteId;
use crate::storage::{IndexedStat, PerfSampleRow, StatCounter};

fn is_in_kernel(cpu_mode: CpuMode) -> Result<bool> {
    match cpu_mode {
        CpuMode::Kernel | CpuMode::GuestKernel => Ok(true),
        CpuMode::User | CpuMode::Hypervisor | CpuMode::GuestUser => Ok(false),
        CpuMode::Unknown => bail!("unknown cpu mode"),
    }
}

fn build_create_mapping_params(
    fields: &CommonMmapFields,
    filename: String,
    build_id: Option<crate::mapping::BuildId>,
) -> CreateMappingParams {
    CreateMappingParams {
        address_range: AddressRange::from_start_and_size(fields.addr, fields.len),
        exact_offset: fields.pgoff,
        // The offset of the ELF header inside the file; file mappings are
        // assumed to map the file from the start.
        start_offset: 0,
        // The real load bias lives in the ELF file, which is not available
        // here. Symbolization can compensate for a mismatch later.
        load_bias: 0,
        filename,
        build_id,
    }
}

#[derive(Default)]
pub struct RecordParser;

impl RecordParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses one record, converting any per-record failure into a skip
    /// counter. Never fails the import.
    pub fn parse_perf_record(&self, ctx: &mut TraceContext, trace_ts: i64, record: Record) {
        let record_type = record.header._type;
        if let Err(err) = self.parse_record(ctx, trace_ts, record) {
            log::debug!("skipping perf record of type {record_type}: {err:#}");
            ctx.storage.increment_stats(if record_type == PERF_RECORD_SAMPLE {
                StatCounter::PerfSamplesSkipped
            } else {
                StatCounter::PerfRecordSkipped
            });
        }
    }

    fn parse_record(&self, ctx: &mut TraceContext, trace_ts: i64, record: Record) -> Result<()> {
        match record.header._type {
            PERF_RECORD_COMM => self.parse_comm(ctx, record),
            PERF_RECORD_SAMPLE => self.parse_sample(ctx, trace_ts, record),
            PERF_RECORD_MMAP => self.parse_mmap(ctx, record),
            PERF_RECORD_MMAP2 => self.parse_mmap2(ctx, record),

            PERF_RECORD_AUX | PERF_RECORD_AUXTRACE | PERF_RECORD_AUXTRACE_INFO => {
                unreachable!("AUX record reached the parser; these are dropped at tokenization")
            }

            record_type => {
                ctx.storage
                    .increment_indexed_stats(IndexedStat::PerfUnknownRecordType, record_type as u64);
                bail!("unknown PERF_RECORD with type {record_type}")
            }
        }
    }

    fn parse_sample(&self, ctx: &mut TraceContext, trace_ts: i64, record: Record) -> Result<()> {
        let mut sample = Sample::parse(trace_ts, &record)?;
        if sample.period.is_none() {
            sample.period = sample.attr.sample_period();
        }
        self.intern_sample(ctx, sample)
    }

    fn intern_sample(&self, ctx: &mut TraceContext, mut sample: Sample) -> Result<()> {
        // The perf-clock value itself is unused (trace_ts was derived from it
        // at tokenization time), but samples without one would get an
        // estimated timestamp, which is too imprecise for profiling.
        if sample.time.is_none() {
            bail!("can not parse samples with no PERF_SAMPLE_TIME field");
        }
        let pid_tid = sample
            .pid_tid
            .context("can not parse samples with no PERF_SAMPLE_TID field")?;
        let cpu = sample
            .cpu
            .context("can not parse samples with no PERF_SAMPLE_CPU field")?;

        let utid = ctx.process_tracker.update_thread(pid_tid.tid, pid_tid.pid);
        let upid = ctx
            .process_tracker
            .upid_for_utid(utid)
            .expect("update_thread assigns a upid");

        if sample.callchain.is_empty() {
            if let Some(ip) = sample.ip {
                sample.callchain.push(SampleFrame {
                    cpu_mode: sample.cpu_mode,
                    ip,
                });
            }
        }
        let callsite_id = self.intern_callchain(ctx, upid, &sample.callchain)?;

        let cpu_mode = ctx.storage.intern_string(sample.cpu_mode.name());
        ctx.storage.push_perf_sample(PerfSampleRow {
            ts: sample.trace_ts,
            utid,
            cpu,
            cpu_mode,
            callsite_id,
            perf_session_id: sample.perf_session.perf_session_id(),
        });

        self.update_counters(&sample)
    }

    /// Interns the callchain bottom-up: the deepest frame becomes the root
    /// callsite at depth 0 and the sampled pc ends up as the leaf.
    fn intern_callchain(
        &self,
        ctx: &mut TraceContext,
        upid: Upid,
        callchain: &[SampleFrame],
    ) -> Result<Option<CallsiteId>> {
        let mut parent: Option<CallsiteId> = None;
        for (depth, frame) in callchain.iter().rev().enumerate() {
            let found = if is_in_kernel(frame.cpu_mode)? {
                ctx.mapping_tracker.find_kernel_mapping_for_address(frame.ip)
            } else {
                ctx.mapping_tracker
                    .find_user_mapping_for_address(upid, frame.ip)
            };

            let mapping: MappingId = match found {
                Some(mapping) => mapping,
                None => {
                    // Simpleperf emits no mmap events for anonymous
                    // executable mappings (JITted code); those frames land in
                    // the dummy mapping.
                    ctx.storage.increment_stats(StatCounter::PerfDummyMappingUsed);
                    ctx.mapping_tracker.get_dummy_mapping()
                }
            };

            let rel_pc = ctx.mapping_tracker.mapping(mapping).to_relative_pc(frame.ip);
            let frame_id = ctx.stack_profile_tracker.intern_frame(mapping, rel_pc);
            parent = Some(
                ctx.stack_profile_tracker
                    .intern_callsite(parent, frame_id, depth as u32),
            );
        }
        Ok(parent)
    }

    fn parse_comm(&self, ctx: &mut TraceContext, record: Record) -> Result<()> {
        let comm = CommRecord::parse(&record)?;
        ctx.process_tracker.update_thread(comm.tid, comm.pid);
        let name = ctx.storage.intern_string(&comm.comm);
        ctx.process_tracker
            .update_thread_name(comm.tid, name, ThreadNamePriority::Ftrace);
        Ok(())
    }

    fn parse_mmap(&self, ctx: &mut TraceContext, record: Record) -> Result<()> {
        let mmap = MmapRecord::parse(&record)?;
        let build_id = record
            .session
            .lookup_build_id(mmap.common.pid, &mmap.filename);
        let params = build_create_mapping_params(&mmap.common, mmap.filename, build_id);
        if is_in_kernel(mmap.cpu_mode)? {
            ctx.mapping_tracker.create_kernel_mapping(params);
        } else {
            let upid = self.get_upid(ctx, &mmap.common);
            ctx.mapping_tracker.create_user_mapping(upid, params);
        }
        Ok(())
    }

    fn parse_mmap2(&self, ctx: &mut TraceContext, record: Record) -> Result<()> {
        let mmap2 = Mmap2Record::parse(&record)?;
        // A build id carried by the record itself wins over the session-level
        // build id table.
        let build_id = mmap2.build_id().or_else(|| {
            record
                .session
                .lookup_build_id(mmap2.common.pid, &mmap2.filename)
        });
        let params = build_create_mapping_params(&mmap2.common, mmap2.filename.clone(), build_id);
        if is_in_kernel(mmap2.cpu_mode)? {
            ctx.mapping_tracker.create_kernel_mapping(params);
        } else {
            let upid = self.get_upid(ctx, &mmap2.common);
            ctx.mapping_tracker.create_user_mapping(upid, params);
        }
        Ok(())
    }

    fn get_upid(&self, ctx: &mut TraceContext, fields: &CommonMmapFields) -> Upid {
        let utid = ctx.process_tracker.update_thread(fields.tid, fields.pid);
        ctx.process_tracker
            .upid_for_utid(utid)
            .expect("update_thread assigns a upid")
    }

    fn update_counters(&self, sample: &Sample) -> Result<()> {
        if !sample.read_groups.is_empty() {
            return self.update_counters_in_read_groups(sample);
        }

        let period = sample
            .period
            .or_else(|| sample.attr.sample_period())
            .context("no period for sample")?;
        let cpu = sample.cpu.context("no cpu for sample")?;
        sample
            .attr
            .get_or_create_counter(cpu)
            .add_delta(sample.trace_ts, period as f64);
        Ok(())
    }

    fn update_counters_in_read_groups(&self, sample: &Sample) -> Result<()> {
        let cpu = sample.cpu.context("no cpu for sample")?;

        for entry in &sample.read_groups {
            let event_id = entry.event_id.context("read group entry without id")?;
            let attr = sample
                .perf_session
                .find_attr_for_event_id(event_id)
                .with_context(|| format!("no perf_event_attr for id {event_id}"))?;
            attr.get_or_create_counter(cpu)
                .add_count(sample.trace_ts, entry.value as f64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TraceBlobView;
    use crate::perf::session::PerfSession as Session;

    fn make_record(record_type: u32, misc: u16, payload: Vec<u8>) -> Record {
        let mut attr = perf_event_attr::default();
        attr.sample_type = PERF_SAMPLE_IP
            | PERF_SAMPLE_TID
            | PERF_SAMPLE_TIME
            | PERF_SAMPLE_CPU
            | PERF_SAMPLE_PERIOD
            | PERF_SAMPLE_CALLCHAIN;
        let mut builder = Session::builder(0);
        builder.add_attr_and_ids(attr, Vec::new());
        let session = builder.build().unwrap();
        let attr = session.attrs()[0].clone();
        Record {
            session,
            attr: Some(attr),
            header: perf_event_header {
                _type: record_type,
                misc,
                size: (8 + payload.len()) as u16,
            },
            payload: TraceBlobView::new(payload),
        }
    }

    fn sample_payload(callchain: &[u64]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x1000u64.to_le_bytes()); // ip
        payload.extend_from_slice(&7u32.to_le_bytes()); // pid
        payload.extend_from_slice(&8u32.to_le_bytes()); // tid
        payload.extend_from_slice(&100u64.to_le_bytes()); // time
        payload.extend_from_slice(&2u32.to_le_bytes()); // cpu
        payload.extend_from_slice(&0u32.to_le_bytes()); // res
        payload.extend_from_slice(&5u64.to_le_bytes()); // period
        payload.extend_from_slice(&(callchain.len() as u64).to_le_bytes());
        for ip in callchain {
            payload.extend_from_slice(&ip.to_le_bytes());
        }
        payload
    }

    #[test]
    fn test_sample_inserts_row_and_counter() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let record = make_record(
            PERF_RECORD_SAMPLE,
            PERF_RECORD_MISC_USER,
            sample_payload(&[]),
        );
        let attr = record.attr.clone().unwrap();

        parser.parse_perf_record(&mut ctx, 100, record);

        assert_eq!(ctx.storage.perf_samples().len(), 1);
        let row = &ctx.storage.perf_samples()[0];
        assert_eq!(row.ts, 100);
        assert_eq!(row.cpu, 2);
        assert_eq!(ctx.storage.string(row.cpu_mode), "user");
        // Synthesized single-frame callchain from the sample ip.
        assert!(row.callsite_id.is_some());
        assert_eq!(ctx.stack_profile_tracker.callsite_count(), 1);
        assert_eq!(attr.counter_series(2), Some(vec![(100, 5.0)]));
        assert_eq!(ctx.storage.stat(StatCounter::PerfSamplesSkipped), 0);
    }

    #[test]
    fn test_callchain_interned_bottom_up() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let record = make_record(
            PERF_RECORD_SAMPLE,
            PERF_RECORD_MISC_USER,
            sample_payload(&[0x1000, 0x2000, 0x3000]),
        );
        parser.parse_perf_record(&mut ctx, 50, record);

        let row = &ctx.storage.perf_samples()[0];
        let leaf = ctx.stack_profile_tracker.callsite(row.callsite_id.unwrap());
        assert_eq!(leaf.depth, 2);
        // The leaf callsite holds the first (deepest-in-vector) frame.
        let leaf_frame = ctx.stack_profile_tracker.frame(leaf.frame);
        assert_eq!(leaf_frame.rel_pc, 0x1000);
        let parent = ctx.stack_profile_tracker.callsite(leaf.parent.unwrap());
        assert_eq!(parent.depth, 1);
        let root = ctx.stack_profile_tracker.callsite(parent.parent.unwrap());
        assert_eq!(root.depth, 0);
        assert!(root.parent.is_none());
        assert_eq!(ctx.stack_profile_tracker.callsite_count(), 3);
        // No mappings exist, so every frame used the dummy mapping.
        assert_eq!(ctx.storage.stat(StatCounter::PerfDummyMappingUsed), 3);
    }

    #[test]
    fn test_unknown_record_type_is_counted() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let record = make_record(PERF_RECORD_LOST, 0, vec![0; 16]);
        parser.parse_perf_record(&mut ctx, 0, record);
        assert_eq!(
            ctx.storage
                .indexed_stat(IndexedStat::PerfUnknownRecordType, PERF_RECORD_LOST as u64),
            1
        );
        assert_eq!(ctx.storage.stat(StatCounter::PerfRecordSkipped), 1);
    }

    #[test]
    fn test_comm_updates_thread_name() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.extend_from_slice(b"init\0\0\0\0");
        parser.parse_perf_record(&mut ctx, 0, make_record(PERF_RECORD_COMM, 0, payload));

        let utid = ctx.process_tracker.utid_for_tid(42).unwrap();
        let name = ctx.process_tracker.thread(utid).name.unwrap();
        assert_eq!(ctx.storage.string(name), "init");
    }

    #[test]
    fn test_mmap_creates_user_mapping() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_le_bytes()); // pid
        payload.extend_from_slice(&7u32.to_le_bytes()); // tid
        payload.extend_from_slice(&0x4000u64.to_le_bytes()); // addr
        payload.extend_from_slice(&0x1000u64.to_le_bytes()); // len
        payload.extend_from_slice(&0u64.to_le_bytes()); // pgoff
        payload.extend_from_slice(b"/bin/true\0\0\0\0\0\0\0");
        parser.parse_perf_record(
            &mut ctx,
            0,
            make_record(PERF_RECORD_MMAP, PERF_RECORD_MISC_USER, payload),
        );

        let utid = ctx.process_tracker.utid_for_tid(7).unwrap();
        let upid = ctx.process_tracker.upid_for_utid(utid).unwrap();
        let mapping = ctx
            .mapping_tracker
            .find_user_mapping_for_address(upid, 0x4800)
            .unwrap();
        assert_eq!(ctx.mapping_tracker.mapping(mapping).filename, "/bin/true");
        assert!(ctx.mapping_tracker.find_kernel_mapping_for_address(0x4800).is_none());
    }

    #[test]
    fn test_mmap_kernel_mode_creates_kernel_mapping() {
        let mut ctx = TraceContext::new();
        let parser = RecordParser::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&u32::MAX.to_le_bytes()); // pid -1
        payload.extend_from_slice(&0u32.to_le_bytes()); // tid
        payload.extend_from_slice(&0xffff_8000u64.to_le_bytes()); // addr
        payload.extend_from_slice(&0x1000u64.to_le_bytes()); // len
        payload.extend_from_slice(&0u64.to_le_bytes()); // pgoff
        payload.extend_from_slice(b"[kernel.kallsyms]_text\0\0");
        parser.parse_perf_record(
            &mut ctx,
            0,
            make_record(PERF_RECORD_MMAP, PERF_RECORD_MISC_KERNEL, payload),
        );

        assert!(ctx
            .mapping_tracker
            .find_kernel_mapping_for_address(0xffff_8800)
            .is_some());
    }
}
