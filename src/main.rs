use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use simplecache::sim::{Harness, Setup};
use simplecache::trace::read_trace;
use simplecache::*;

/// Blocking cache timing model driven by instruction traces.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// cycles taken on a hit or to resolve a miss
    #[arg(long, default_value_t = 1)]
    latency: u64,
    /// cache size, e.g. 16kB
    #[arg(long, default_value = "16kB")]
    size: String,
    /// cache line size in bytes
    #[arg(long, default_value_t = 64)]
    block_size: u32,
    /// memory round trip in cycles
    #[arg(long, default_value_t = 100)]
    mem_lat: u64,
    /// cycles between a completion and the next instruction
    #[arg(long, default_value_t = 1)]
    think: u64,
    /// give up after this many cycles
    #[arg(long, default_value_t = 10_000_000)]
    max_cycles: u64,
    /// one trace file per processor; a small built-in demo runs without any
    traces: Vec<PathBuf>,
}

fn demo_traces() -> Vec<Insts> {
    // two processors sharing a block, the second one streaming past capacity
    let a = Addr(0x1000);
    vec![
        vec![
            Instr::Write(a, vec![0xde, 0xad, 0xbe, 0xef]),
            Instr::Read(a, 4),
            Instr::Other(20),
            Instr::Read(Addr(a.0 + 4), 4),
        ],
        (0..8).map(|i| Instr::Read(Addr(0x8000 + i * 64), 8)).collect(),
    ]
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let setup = Setup {
        params: CacheParams {
            latency: args.latency,
            size: parse_mem_size(&args.size)?,
        },
        system: SystemSpec {
            block_size: args.block_size,
            mem_lat: args.mem_lat,
        },
        think: args.think,
        ..Default::default()
    };
    let traces = if args.traces.is_empty() {
        info!("no traces given, running the demo");
        demo_traces()
    } else {
        args.traces.iter().map(read_trace).collect::<Result<Vec<_>, _>>()?
    };

    let mut harness = Harness::new(&setup, traces)?;
    let t0 = Instant::now();
    let cycles = harness.run(args.max_cycles)?;
    let t1 = Instant::now();

    println!("finished simulation in {} cycles", cycles);
    println!("{}", harness.stats());
    for i in 0..harness.num_procs() {
        let log = harness.log(i);
        println!(
            "processor {}: {} accesses, {} refusals, {} retries",
            i,
            log.completions.len(),
            log.refusals,
            log.retries
        );
    }
    info!("execution time {:?}", t1 - t0);
    Ok(())
}

fn main() -> ExitCode {
    // logging
    let env = Env::default()
        .filter_or("SIMPLECACHE_LOG", "info")
        .write_style_or("SIMPLECACHE_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
