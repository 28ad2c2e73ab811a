use anyhow::{Context, Result};
use clap::Parser;

use perf_ingest::storage::{IndexedStat, StatCounter};
use perf_ingest::TraceProcessor;

/// Import a perf.data recording and print an import summary.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// input file name
    #[arg(short, long, default_value = "perf.data")]
    input: String,

    /// feed the importer in chunks of this many bytes
    #[arg(short, long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// print skip counters even when they are zero
    #[arg(short, long)]
    stats: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let data = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input))?;

    let mut processor = TraceProcessor::new();
    for chunk in data.chunks(args.chunk_size.max(1)) {
        processor.parse(chunk.to_vec())?;
    }
    processor.notify_end_of_file()?;

    let ctx = processor.context();
    if let Some(trace_type) = processor.trace_type() {
        println!("trace type:    {trace_type}");
    }
    println!("threads:       {}", ctx.process_tracker.thread_count());
    println!("processes:     {}", ctx.process_tracker.process_count());
    println!("mappings:      {}", ctx.mapping_tracker.mapping_count());
    println!("samples:       {}", ctx.storage.perf_samples().len());
    println!("frames:        {}", ctx.stack_profile_tracker.frame_count());
    println!("callsites:     {}", ctx.stack_profile_tracker.callsite_count());

    let counters = [
        StatCounter::PerfRecordSkipped,
        StatCounter::PerfSamplesSkipped,
        StatCounter::PerfDummyMappingUsed,
    ];
    for counter in counters {
        let value = ctx.storage.stat(counter);
        if value != 0 || args.stats {
            println!("{}: {value}", counter.name());
        }
    }
    for stat in [
        IndexedStat::PerfUnknownRecordType,
        IndexedStat::PerfFeaturesSkipped,
    ] {
        for (key, value) in ctx.storage.indexed_stats(stat) {
            println!("{}[{key}]: {value}", stat.name());
        }
    }

    Ok(())
}
