use std::str::FromStr;

use anyhow::Result;

use placecrawl_core::{AppConfig, JobMode};
use placecrawl_storage::Storage;

pub async fn run(
    config: AppConfig,
    place_ids: Vec<String>,
    mode: String,
    priority: i32,
) -> Result<()> {
    let mode = JobMode::from_str(&mode).map_err(anyhow::Error::msg)?;

    let storage = Storage::new(&config.database.url).await?;
    storage.run_migrations().await?;

    for place_id in &place_ids {
        let job_id = storage.enqueue(place_id, mode, priority).await?;
        println!("{place_id}: job {job_id}");
    }
    Ok(())
}
