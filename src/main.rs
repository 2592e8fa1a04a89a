use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use prefork::{AppHooks, Role, Supervisor, SupervisorConfig};

/// Demo daemon for the prefork supervisor: one master, N workers that
/// heartbeat until stopped. SIGTERM stops, SIGUSR1 restarts the pool,
/// SIGUSR2 prints process info.
#[derive(Parser, Debug)]
#[command(name = "prefork", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "prefork.toml")]
    config: PathBuf,

    /// Number of workers (overrides config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Master process title (overrides config)
    #[arg(long)]
    master_title: Option<String>,

    /// Worker process title (overrides config)
    #[arg(long)]
    worker_title: Option<String>,

    /// Uid to drop privileges to (overrides config)
    #[arg(long)]
    uid: Option<u32>,

    /// Gid to drop privileges to (overrides config)
    #[arg(long)]
    gid: Option<u32>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-worker bookkeeping, grace timers)
    #[arg(short, long)]
    verbose: bool,
}

/// Role hooks for the demo: workers emit a heartbeat so supervision is
/// visible in the logs.
struct DemoHooks;

impl AppHooks for DemoHooks {
    fn init_master(&mut self) {
        tracing::info!("master ready, send SIGUSR2 for status");
    }

    fn start_worker(&mut self) {
        tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                tracing::info!("worker heartbeat");
            }
        });
    }
}

fn resolve_config(cli: &Cli) -> Result<SupervisorConfig, prefork::config::ConfigError> {
    let mut config = if cli.config.exists() {
        SupervisorConfig::load(&cli.config)?
    } else {
        SupervisorConfig::default()
    };

    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if cli.master_title.is_some() {
        config.master_title = cli.master_title.clone();
    }
    if cli.worker_title.is_some() {
        config.worker_title = cli.worker_title.clone();
    }
    if cli.uid.is_some() {
        config.uid = cli.uid;
    }
    if cli.gid.is_some() {
        config.gid = cli.gid;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let role = Role::from_env();
    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("role: {}", role);
        println!("workers: {}", config.worker_count);
        println!("grace period: {} ms", config.grace_period_ms);
        println!(
            "titles: master={:?} worker={:?}",
            config.master_title, config.worker_title
        );
        println!("identity: uid={:?} gid={:?}", config.uid, config.gid);
        return;
    }

    tracing::info!(%role, workers = config.worker_count, "prefork starting");

    let supervisor = Supervisor::new(role, config, DemoHooks);
    match supervisor.run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "supervisor failed");
            std::process::exit(1);
        }
    }
}
