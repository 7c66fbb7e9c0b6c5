//! rankmesh - collective communication for a fixed group of processes
//!
//! Command-line front end: joins a group from configuration and runs a
//! self-check, benchmarks all-reduce over an in-process loopback group, and
//! manages configuration files.

mod cli;

use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use rankmesh::config::{self, split_peer_list, MeshConfig};
use rankmesh::{
    facade, logging, version, Error, ProcessGroup, Rank, ReduceOp, Result, StaticRendezvous,
    TensorDescriptor, TransportConfig,
};

use crate::cli::{Cli, Commands, ConfigSubcommand};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Run {
            config,
            rank,
            peers,
            json,
        } => {
            let mut cfg = MeshConfig::load(config.as_deref())?;
            if let Some(rank) = rank {
                cfg.group.rank = Some(rank);
            }
            if let Some(peers) = peers {
                cfg.group.peers = split_peer_list(&peers);
            }
            cfg.validate()?;

            let _log_guards = logging::init_logging(&cfg.logging, cli.verbose, cli.quiet)?;
            log_startup();
            run_self_check(&cfg, json)
        }
        Commands::Local {
            world_size,
            elements,
            iterations,
            json,
        } => {
            let cfg = MeshConfig::load(None)?;
            let _log_guards = logging::init_logging(&cfg.logging, cli.verbose, cli.quiet)?;
            log_startup();
            run_local(&cfg, world_size, elements, iterations, json)
        }
    }
}

fn log_startup() {
    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting rankmesh"
    );
}

// ─────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────

/// Join, all-reduce `rank + 1` from every rank, barrier, leave
fn run_self_check(cfg: &MeshConfig, json: bool) -> Result<()> {
    let rendezvous = StaticRendezvous::from_config(cfg)?;
    let transport = TransportConfig::from(&cfg.transport);

    let (rank, size) = facade::join(&rendezvous, &transport)?;
    let outcome = self_check(rank, size);
    let stats = facade::stats();
    facade::leave()?;

    let sum = outcome?;
    if json {
        println!("{}", to_json(&stats?)?);
    } else {
        println!("rank {} of {}: all-reduce sum = {} (ok)", rank, size, sum);
    }
    Ok(())
}

fn self_check(rank: Rank, size: u32) -> Result<i64> {
    let mut values = vec![i64::from(rank) + 1; 4];
    facade::all_reduce(&mut TensorDescriptor::new(&mut values), ReduceOp::Sum)?;

    let expected = i64::from(size) * (i64::from(size) + 1) / 2;
    if let Some(bad) = values.iter().find(|&&v| v != expected) {
        return Err(Error::Internal(format!(
            "all-reduce self-check produced {}, expected {}",
            bad, expected
        )));
    }

    facade::barrier()?;
    info!(rank, size, sum = expected, "Self-check passed");
    Ok(expected)
}

// ─────────────────────────────────────────────────────────────────
// local
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct LocalReport {
    world_size: u32,
    elements: usize,
    iterations: u32,
    bytes_per_rank: usize,
    total_ms: f64,
    mean_ms: f64,
    /// Buffer bytes reduced per second, per rank
    algbw_gbps: f64,
}

fn run_local(
    cfg: &MeshConfig,
    world_size: u32,
    elements: usize,
    iterations: u32,
    json: bool,
) -> Result<()> {
    if world_size == 0 || elements == 0 || iterations == 0 {
        return Err(Error::InvalidArgument(
            "world size, elements and iterations must all be positive".into(),
        ));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
    let transport = TransportConfig::from(&cfg.transport);

    let elapsed = runtime.block_on(async {
        let groups = ProcessGroup::bootstrap_local(world_size, &transport).await?;
        info!(world_size, elements, iterations, "Local group formed");

        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| tokio::spawn(all_reduce_rounds(group, elements, iterations)))
            .collect();

        let mut slowest = Duration::ZERO;
        for handle in handles {
            let elapsed = handle
                .await
                .map_err(|e| Error::Internal(format!("rank task failed: {}", e)))??;
            slowest = slowest.max(elapsed);
        }
        Ok::<_, Error>(slowest)
    })?;

    let bytes = elements * std::mem::size_of::<f32>();
    let total_ms = elapsed.as_secs_f64() * 1e3;
    let mean_ms = total_ms / f64::from(iterations);
    let report = LocalReport {
        world_size,
        elements,
        iterations,
        bytes_per_rank: bytes,
        total_ms,
        mean_ms,
        algbw_gbps: if mean_ms > 0.0 {
            bytes as f64 / (mean_ms / 1e3) / 1e9
        } else {
            0.0
        },
    };

    if json {
        println!("{}", to_json(&report)?);
    } else {
        println!();
        println!("All-reduce over {} local ranks:", report.world_size);
        println!("  Elements:      {} x f32 ({} bytes)", report.elements, report.bytes_per_rank);
        println!("  Iterations:    {}", report.iterations);
        println!("  Total:         {:.2} ms", report.total_ms);
        println!("  Mean:          {:.3} ms", report.mean_ms);
        println!("  Bandwidth:     {:.3} GB/s", report.algbw_gbps);
        println!("  Verification:  ok");
    }
    Ok(())
}

/// One rank's share of the local benchmark. Round `i` contributes
/// `(rank + 1) * (i + 1)` from every rank, so the sum is known up front.
async fn all_reduce_rounds(group: ProcessGroup, elements: usize, iterations: u32) -> Result<Duration> {
    let size = group.size();
    let triangle = f64::from(size) * (f64::from(size) + 1.0) / 2.0;
    let mut buffer = vec![0f32; elements];

    group.barrier().await?;
    let start = Instant::now();

    for round in 0..iterations {
        let contribution = (f64::from(group.rank()) + 1.0) * f64::from(round + 1);
        buffer.fill(contribution as f32);

        let mut desc = TensorDescriptor::new(&mut buffer);
        group.all_reduce(&mut desc, ReduceOp::Sum).await?;

        let expected = (triangle * f64::from(round + 1)) as f32;
        if buffer.iter().any(|&v| v != expected) {
            return Err(Error::Internal(format!(
                "rank {} round {}: all-reduce result differs from {}",
                group.rank(),
                round,
                expected
            )));
        }
    }

    let elapsed = start.elapsed();
    group.barrier().await?;
    group.leave().await;
    Ok(elapsed)
}

// ─────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = MeshConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            MeshConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to encode JSON: {}", e)))
}
