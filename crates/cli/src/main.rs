//! Connector CLI - drive a work manager and inspect runtime capabilities.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use connector_bootstrap::{BootstrapConfig, BootstrapContext, RuntimeBootstrapContext};
use connector_core::{ContextKind, StartDelay, StartTimeout};
use connector_work::{work_fn, SubmitOptions, Work, WorkError, WorkManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "connector")]
#[command(about = "Resource adapter work runtime", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "connector_work=debug"
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch of synthetic work and print statistics
    Run {
        /// Number of items
        #[arg(long, default_value = "10")]
        count: usize,
        /// Submission mode
        #[arg(long, value_enum, default_value = "do")]
        mode: Mode,
        /// Start timeout in milliseconds (0 = immediate, omit for indefinite)
        #[arg(long)]
        start_timeout_ms: Option<i64>,
        /// How long each item runs, in milliseconds
        #[arg(long, default_value = "50")]
        work_ms: u64,
        /// Make every K-th item fail
        #[arg(long)]
        fail_every: Option<usize>,
    },
    /// Ask whether context kinds are supported
    Probe {
        /// Context kinds, e.g. transaction, hint, security
        #[arg(required = true)]
        kinds: Vec<ContextKind>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Wait for completion
    Do,
    /// Wait for start
    Start,
    /// Return after acceptance
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).context("invalid --log-level")?)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => BootstrapConfig::from_json_file(path)?,
        None => BootstrapConfig::default(),
    };

    match cli.command {
        Commands::Run {
            count,
            mode,
            start_timeout_ms,
            work_ms,
            fail_every,
        } => {
            let start_timeout = match start_timeout_ms {
                Some(ms) => StartTimeout::from_millis(ms)?,
                None => StartTimeout::Indefinite,
            };
            let ctx = RuntimeBootstrapContext::new(config);
            run_batch(&ctx, count, mode, start_timeout, work_ms, fail_every).await?;

            if !ctx.shutdown().await {
                warn!("Some work did not finish within the shutdown grace period");
            }
            let stats = ctx.pooled_work_manager().stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Probe { kinds } => {
            let ctx = RuntimeBootstrapContext::new(config);
            for kind in kinds {
                let answer = if ctx.is_context_supported(&kind) {
                    "supported"
                } else {
                    "unsupported"
                };
                println!("{}: {}", kind, answer);
            }
        }
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
        }
    }

    Ok(())
}

async fn run_batch(
    ctx: &RuntimeBootstrapContext,
    count: usize,
    mode: Mode,
    start_timeout: StartTimeout,
    work_ms: u64,
    fail_every: Option<usize>,
) -> Result<()> {
    info!("Submitting {} items ({:?}, start timeout {})", count, mode, start_timeout);

    let wm = ctx.work_manager();
    let mut submissions = JoinSet::new();
    for n in 1..=count {
        let wm = Arc::clone(&wm);
        let work = synthetic(n, work_ms, fail_every);
        let options = SubmitOptions::new().with_start_timeout(start_timeout);
        submissions.spawn(async move { (n, submit(wm.as_ref(), mode, work, options).await) });
    }

    while let Some(joined) = submissions.join_next().await {
        let (n, outcome) = joined.context("submission task failed")?;
        match outcome {
            Ok(detail) => info!("Item {}: {}", n, detail),
            Err(e) => warn!("Item {}: {} (code {})", n, e, e.code()),
        }
    }

    let pool = ctx.pooled_work_manager();
    while pool.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

async fn submit(
    wm: &dyn WorkManager,
    mode: Mode,
    work: Arc<dyn Work>,
    options: SubmitOptions,
) -> Result<String, WorkError> {
    match mode {
        Mode::Do => wm.do_work(work, options).await.map(|()| "completed".to_string()),
        Mode::Start => wm.start_work(work, options).await.map(|delay| match delay {
            StartDelay::Known(d) => format!("started after {:?}", d),
            StartDelay::Unknown => "started".to_string(),
        }),
        Mode::Schedule => wm
            .schedule_work(work, options)
            .await
            .map(|id| format!("scheduled as {}", id)),
    }
}

fn synthetic(n: usize, work_ms: u64, fail_every: Option<usize>) -> Arc<dyn Work> {
    let fails = fail_every.is_some_and(|k| k > 0 && n % k == 0);
    work_fn(format!("synthetic-{}", n), move |ctx| async move {
        tokio::select! {
            _ = ctx.released() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(work_ms)) => {}
        }
        if fails {
            anyhow::bail!("synthetic failure of item {}", n);
        }
        Ok(())
    })
}
