use anyhow::Result;
use tracing::info;

use placecrawl_api::AppState;
use placecrawl_core::AppConfig;
use placecrawl_storage::Storage;

use crate::commands::shutdown_signal;

pub async fn run(config: AppConfig, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.api.bind.clone());

    let storage = Storage::new(&config.database.url).await?;
    storage.run_migrations().await?;

    placecrawl_api::run(AppState { storage }, &bind, shutdown_signal()).await?;
    info!("api stopped");
    Ok(())
}
