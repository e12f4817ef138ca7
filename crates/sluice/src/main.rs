//! Sluice - programmable TCP stream proxy engine
//!
//! Loads a TOML configuration describing listeners, tasks, readers, and
//! pipelines of filters, then runs one single-threaded worker until
//! interrupted.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use sluice_config::{Config, LogFormat, LogOutput};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "sluice", version, about = "Programmable TCP stream proxy engine")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "sluice.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check {
        println!("configuration OK: {}", args.config.display());
        return Ok(());
    }

    init_logging(&config)?;
    tracing::info!(config = %args.config.display(), "sluice starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let cancel = CancellationToken::new();
    runtime.block_on(async {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let signal_cancel = cancel.clone();
                tokio::task::spawn_local(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received, shutting down");
                        signal_cancel.cancel();
                    }
                });

                sluice_engine::run_worker(config, cancel.clone()).await
            })
            .await
    })?;

    tracing::info!("sluice stopped");
    Ok(())
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log.level.as_str()));

    macro_rules! init {
        ($builder:expr) => {{
            match config.log.format {
                LogFormat::Console => $builder.init(),
                LogFormat::Json => $builder.json().init(),
            }
        }};
    }

    match &config.log.output {
        LogOutput::Stdout => {
            init!(tracing_subscriber::fmt().with_env_filter(filter));
        }
        LogOutput::Stderr => {
            init!(tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr));
        }
        LogOutput::File(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("opening log file '{path}'"))?;
            init!(tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)));
        }
    }
    Ok(())
}
