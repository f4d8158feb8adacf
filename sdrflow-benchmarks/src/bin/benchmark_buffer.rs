use anyhow::Result;
use clap::Parser;
use rand::prelude::*;
use sdrflow::buffers::{Buffer, BufferKind};
use sdrflow_benchmarks::{
    affinity::pin_cpu,
    logging,
    report::{print_header, print_rate},
};
use std::time::{Duration, Instant};

/// Single-threaded writer and reader throughput of each buffer storage.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Buffer size (bytes).
    #[arg(long, default_value_t = 65536)]
    buffer_size: usize,
    /// Number of f32 items written and read.
    #[arg(long, default_value_t = 1_000_000_000)]
    items: u64,
    /// Maximum number of items per write.
    #[arg(long, default_value_t = 3000)]
    chunk: usize,
    /// Do not pin the benchmark to a CPU.
    #[arg(long)]
    no_pin: bool,
}

fn run(args: &Args, kind: BufferKind) -> Result<Duration> {
    let mut buffer = Buffer::allocate_with(args.buffer_size, size_of::<f32>(), kind)?;
    let mut reader = buffer.add_reader(0)?;
    let value = rand::rng().random::<f32>().to_ne_bytes();
    let mut checksum = 0.0f32;
    let mut written = 0;

    let start = Instant::now();
    while written < args.items {
        let slot = buffer.write_slot();
        let remaining = usize::try_from(args.items - written).unwrap_or(usize::MAX);
        let n = slot.items.min(args.chunk).min(remaining);
        for item in slot.bytes.chunks_exact_mut(size_of::<f32>()).take(n) {
            item.copy_from_slice(&value);
        }
        buffer.commit_write(n)?;
        written += n as u64;

        let available = reader.available_items();
        for item in reader.read_slot().chunks_exact(size_of::<f32>()).take(available) {
            checksum += f32::from_ne_bytes(item.try_into()?);
        }
        reader.consume(available)?;
    }
    std::hint::black_box(checksum);
    Ok(start.elapsed())
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    if !args.no_pin {
        pin_cpu()?;
    }
    print_header(&format!("buffer: {} bytes", args.buffer_size));
    for kind in [BufferKind::Heap, BufferKind::DoubleMapped] {
        match run(&args, kind) {
            Ok(elapsed) => print_rate(&kind.to_string(), args.items, elapsed),
            Err(err) => tracing::warn!("{kind} buffer not available: {err:#}"),
        }
    }
    Ok(())
}
