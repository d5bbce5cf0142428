//! Tributary - demonstrations for the pull-based stream engine

mod config;
mod demos;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tributary_core::stream::MergePolicy;

use config::DemoConfig;
use demos::Output;

/// Run the stream engine demonstrations
#[derive(Parser, Debug)]
#[command(name = "tributary", version, about)]
struct Cli {
    /// TOML file with demo settings; flags override it
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// filter, map and take over a paced array, plus a resilient fallible stage
    Compose {
        #[arg(long)]
        count: Option<u32>,
        #[arg(long)]
        delay_ms: Option<u64>,
        #[arg(long)]
        take: Option<usize>,
        #[arg(long)]
        fail_every: Option<u32>,
    },
    /// Merge several paced sources behind a per-pull timeout
    FanIn {
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Per-item delay of each source, one value per source
        #[arg(long = "source-delay-ms", value_delimiter = ',')]
        source_delays_ms: Vec<u64>,
        #[arg(long)]
        items_per_source: Option<u32>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// A pausable stream driven by a scripted controller
    Controllable {
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        delay_ms: Option<u64>,
        #[arg(long)]
        pause_after_ms: Option<u64>,
        #[arg(long)]
        resume_after_ms: Option<u64>,
        #[arg(long)]
        stop_after_ms: Option<u64>,
        /// Run without the scripted pause/resume/stop controller
        #[arg(long)]
        no_script: bool,
        /// Restart once after the first terminal signal
        #[arg(long)]
        restart: bool,
    },
    /// A producer that slows down until it misses its deadline
    Timeout {
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        delay_ms: Option<u64>,
        #[arg(long)]
        count: Option<u32>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Race,
    RoundRobin,
}

impl From<PolicyArg> for MergePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Race => MergePolicy::Race,
            PolicyArg::RoundRobin => MergePolicy::RoundRobin,
        }
    }
}

impl Command {
    /// Layer flag values over the file configuration
    fn apply(&self, config: &mut DemoConfig) {
        match self {
            Command::Compose {
                count,
                delay_ms,
                take,
                fail_every,
            } => {
                let c = &mut config.compose;
                c.count = count.unwrap_or(c.count);
                c.delay_ms = delay_ms.unwrap_or(c.delay_ms);
                c.take = take.unwrap_or(c.take);
                c.fail_every = fail_every.unwrap_or(c.fail_every);
            }
            Command::FanIn {
                policy,
                source_delays_ms,
                items_per_source,
                timeout_ms,
            } => {
                let c = &mut config.fan_in;
                if let Some(policy) = policy {
                    c.policy = (*policy).into();
                }
                if !source_delays_ms.is_empty() {
                    c.source_delays_ms = source_delays_ms.clone();
                }
                c.items_per_source = items_per_source.unwrap_or(c.items_per_source);
                c.timeout_ms = timeout_ms.unwrap_or(c.timeout_ms);
            }
            Command::Controllable {
                chunk_size,
                delay_ms,
                pause_after_ms,
                resume_after_ms,
                stop_after_ms,
                no_script,
                restart,
            } => {
                let c = &mut config.controllable;
                c.chunk_size = chunk_size.unwrap_or(c.chunk_size);
                c.delay_ms = delay_ms.unwrap_or(c.delay_ms);
                c.pause_after_ms = pause_after_ms.or(c.pause_after_ms);
                c.resume_after_ms = resume_after_ms.or(c.resume_after_ms);
                c.stop_after_ms = stop_after_ms.or(c.stop_after_ms);
                if *no_script {
                    c.scripted = false;
                }
                c.restart |= *restart;
            }
            Command::Timeout {
                timeout_ms,
                delay_ms,
                count,
            } => {
                let c = &mut config.timeout;
                c.timeout_ms = timeout_ms.unwrap_or(c.timeout_ms);
                c.delay_ms = delay_ms.unwrap_or(c.delay_ms);
                c.count = count.unwrap_or(c.count);
            }
            Command::Config => {}
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = DemoConfig::load(cli.config.as_deref())?;
    cli.command.apply(&mut config);
    let out = Output::new(cli.json);

    info!(command = ?cli.command, "tributary: starting");
    match cli.command {
        Command::Compose { .. } => demos::compose(&config.compose, out).await,
        Command::FanIn { .. } => demos::fan_in(&config.fan_in, out).await,
        Command::Controllable { .. } => demos::controllable(&config.controllable, out).await,
        Command::Timeout { .. } => demos::timeout(&config.timeout, out).await,
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}
