use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use placecrawl_core::{AppConfig, JobMode};
use placecrawl_enrich::freshness;
use placecrawl_storage::Storage;

use crate::commands::shutdown_signal;

/// Background scheduler: each cycle resets stuck jobs, picks venues whose
/// required fields are missing or stale (always including the top
/// popularity tier), and enqueues background crawls for them.
pub async fn run(
    config: AppConfig,
    sleep_seconds: Option<u64>,
    batch_size: Option<i64>,
) -> Result<()> {
    let sleep_seconds = sleep_seconds.unwrap_or(config.scheduler.sleep_seconds).max(1);
    let batch_size = batch_size.unwrap_or(config.scheduler.batch_size).max(1);

    let storage = Storage::new(&config.database.url).await?;
    storage.run_migrations().await?;

    info!(sleep_seconds, batch_size, "scheduler started");
    let mut cycles: u64 = 0;
    let mut total_enqueued: u64 = 0;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        match run_cycle(&storage, &config, batch_size).await {
            Ok(enqueued) => {
                cycles += 1;
                total_enqueued += enqueued as u64;
                if cycles % 10 == 0 {
                    info!(cycles, total_enqueued, "scheduler stats");
                }
            }
            Err(e) => error!("scheduling cycle failed: {e:#}"),
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(Duration::from_secs(sleep_seconds)) => {}
        }
    }

    info!(cycles, total_enqueued, "scheduler stopped");
    Ok(())
}

async fn run_cycle(storage: &Storage, config: &AppConfig, batch_size: i64) -> Result<usize> {
    // A worker that died mid-job left its row in running; recover first so
    // the venue becomes schedulable again.
    storage
        .prune_stuck(config.scheduler.max_running_minutes)
        .await?;

    let candidates = storage
        .select_refresh_candidates(
            batch_size,
            config.scheduler.top_percentile,
            config.freshness.hours_days,
            config.freshness.menu_contact_price_days,
            config.freshness.desc_features_days,
        )
        .await?;
    let threshold = storage
        .popularity_threshold(config.scheduler.top_percentile)
        .await?;

    let now = Utc::now();
    let mut enqueued = 0usize;
    for venue in &candidates {
        let enrichment = storage.get_enrichment(&venue.place_id).await?;
        let report = freshness(venue, enrichment.as_ref(), &config.freshness, now);

        let is_top_popularity = match (threshold, venue.popularity_confidence) {
            (Some(t), Some(p)) => p >= t,
            _ => false,
        };
        if !report.needs_refresh() && !is_top_popularity {
            continue;
        }

        let job_id = storage
            .enqueue(&venue.place_id, JobMode::Background, 5)
            .await?;
        enqueued += 1;
        debug!(
            place_id = %venue.place_id,
            job_id,
            group = report.category_group.as_str(),
            missing = ?report.missing,
            stale = ?report.stale,
            "background job enqueued"
        );
    }

    let depth = storage.queue_depth().await?;
    let pending = depth.get("pending").copied().unwrap_or(0);
    let running = depth.get("running").copied().unwrap_or(0);
    info!(
        considered = candidates.len(),
        enqueued, pending, running, "scheduling cycle done"
    );
    if pending > 100 {
        warn!(pending, "queue depth is high, consider adding workers");
    }
    if running == 0 && pending > 0 {
        warn!("jobs are pending but nothing is running, is a worker up?");
    }

    Ok(enqueued)
}
