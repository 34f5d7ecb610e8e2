mod cli;
mod commands;
mod worker;

use anyhow::Result;
use clap::Parser;

// mimalloc keeps memory flat under many concurrent fetches; glibc malloc
// does not release it back.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use placecrawl_core::AppConfig;

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Worker {
            workers,
            batch_size,
        } => {
            worker::run_workers(config, workers, batch_size).await?;
        }
        Commands::Scheduler {
            sleep_seconds,
            batch_size,
        } => {
            commands::scheduler::run(config, sleep_seconds, batch_size).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
        Commands::Enqueue {
            place_ids,
            mode,
            priority,
        } => {
            commands::enqueue::run(config, place_ids, mode, priority).await?;
        }
    }

    Ok(())
}
