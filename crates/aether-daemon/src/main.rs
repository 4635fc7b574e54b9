//! aetherflowd — the aetherflow agent supervisor daemon.

use clap::Parser;
use tracing::{error, info};

/// Agent supervisor daemon: watches the task queue, runs agents, serves RPC.
#[derive(Debug, Parser)]
#[command(name = "aetherflowd", version, about)]
struct Args {
    /// Work-source project to supervise
    #[arg(long)]
    project: Option<String>,

    /// Unix socket path for the RPC surface
    #[arg(long)]
    socket_path: Option<std::path::PathBuf>,

    /// Seconds between ready-task polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum concurrently running pool agents
    #[arg(long)]
    pool_size: Option<usize>,

    /// Command template agents are launched with
    #[arg(long)]
    spawn_cmd: Option<String>,

    /// Crashes tolerated per task before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Prompt template directory (empty: embedded defaults)
    #[arg(long)]
    prompt_dir: Option<String>,

    /// Solo mode: land instructions say merge instead of open-PR
    #[arg(long)]
    solo: bool,

    /// Directory for per-task agent logs
    #[arg(long)]
    log_dir: Option<std::path::PathBuf>,

    /// Seconds between reconciler passes
    #[arg(long)]
    reconcile_interval: Option<u64>,

    /// Managed-server URL agents attach to
    #[arg(long)]
    server_url: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

fn main() {
    let args = Args::parse();
    aether_core::init_logging(args.json_logs);
    info!(event = "daemon.start_requested", pid = std::process::id());

    let exit_code = match run(args) {
        Ok(()) => 0,
        Err(e) => {
            error!(event = "daemon.start_failed", error = %e);
            eprintln!("aetherflowd: {e}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = aether_config::CliOverrides {
        socket_path: args.socket_path,
        project: args.project,
        poll_interval_secs: args.poll_interval,
        pool_size: args.pool_size,
        spawn_cmd: args.spawn_cmd,
        max_retries: args.max_retries,
        prompt_dir: args.prompt_dir,
        solo: args.solo.then_some(true),
        log_dir: args.log_dir,
        reconcile_interval_secs: args.reconcile_interval,
        server_url: args.server_url,
    };
    let config = aether_config::load(overrides)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(aether_daemon::run_daemon(config))?;
    Ok(())
}
