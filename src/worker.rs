use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info, warn};

use placecrawl_core::{AppConfig, ExtractedFacts, JobClaim};
use placecrawl_downloader::Downloader;
use placecrawl_enrich::build_enrichment;
use placecrawl_parser::parse_schema_org;
use placecrawl_pipeline::{CrawlPipeline, DEFAULT_MAX_TARGETS};
use placecrawl_storage::Storage;

use crate::commands::shutdown_signal;

/// Per-loop processing counters, logged every few jobs.
#[derive(Default)]
struct WorkerStats {
    jobs_processed: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    total_crawl_ms: u64,
}

impl WorkerStats {
    fn add(&mut self, success: bool, crawl_ms: u64) {
        self.jobs_processed += 1;
        if success {
            self.jobs_succeeded += 1;
        } else {
            self.jobs_failed += 1;
        }
        self.total_crawl_ms += crawl_ms;
    }

    fn avg_crawl_ms(&self) -> u64 {
        if self.jobs_processed == 0 {
            0
        } else {
            self.total_crawl_ms / self.jobs_processed
        }
    }
}

/// Spawn `workers` claim loops against the shared queue and run until a
/// shutdown signal arrives. Every claimed job reaches a terminal state
/// here; a crash instead leaves it for prune_stuck.
pub async fn run_workers(config: AppConfig, workers: usize, batch_size: Option<i64>) -> Result<()> {
    let workers = workers.max(1);
    let batch_size = batch_size.unwrap_or(config.worker.batch_size).max(1);

    // Pool sized to the worker count plus headroom for the API and CLI.
    let pool_size = (workers as u32 * 2 + 4).max(10);
    let storage = Storage::with_pool_size(&config.database.url, pool_size).await?;
    storage.run_migrations().await?;

    let downloader = Arc::new(Downloader::new(config.crawl.clone())?);
    let pipeline = Arc::new(CrawlPipeline::new(
        downloader,
        config.crawl.clone(),
        config.freshness.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::with_capacity(workers);

    info!(workers, batch_size, "spawning workers");
    for worker_id in 0..workers {
        let storage = storage.clone();
        let pipeline = Arc::clone(&pipeline);
        let config = config.clone();
        let mut shutdown = shutdown_tx.subscribe();

        handles.push(tokio::spawn(async move {
            let mut stats = WorkerStats::default();
            info!(worker_id, "worker started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(worker_id, jobs = stats.jobs_processed, "worker shutting down");
                        break;
                    }
                    _ = work_cycle(worker_id, &storage, &pipeline, &config, batch_size, &mut stats) => {}
                }
            }
        }));
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    info!("all workers stopped");
    Ok(())
}

async fn work_cycle(
    worker_id: usize,
    storage: &Storage,
    pipeline: &CrawlPipeline,
    config: &AppConfig,
    batch_size: i64,
    stats: &mut WorkerStats,
) {
    let claims = match storage
        .claim_batch(batch_size, config.crawl.per_host_concurrency)
        .await
    {
        Ok(claims) => claims,
        Err(e) => {
            error!(worker_id, "claim failed: {e:#}");
            tokio::time::sleep(Duration::from_secs(config.worker.sleep_seconds.max(1))).await;
            return;
        }
    };

    if claims.is_empty() {
        tokio::time::sleep(Duration::from_secs(config.worker.sleep_seconds.max(1))).await;
        return;
    }

    info!(worker_id, count = claims.len(), "jobs claimed");
    for claim in claims {
        let job_id = claim.job_id;
        let started = Instant::now();
        let success = match process_job(storage, pipeline, config, &claim).await {
            Ok(success) => success,
            Err(e) => {
                // Internal errors fail the job, never the worker.
                let msg = format!("{e:#}");
                error!(worker_id, job_id, "job errored: {msg}");
                if let Err(e2) = storage.finish_fail(job_id, Some(&msg)).await {
                    error!(worker_id, job_id, "finish_fail also errored: {e2:#}");
                }
                false
            }
        };

        stats.add(success, started.elapsed().as_millis() as u64);
        if stats.jobs_processed % 10 == 0 {
            info!(
                worker_id,
                processed = stats.jobs_processed,
                succeeded = stats.jobs_succeeded,
                failed = stats.jobs_failed,
                avg_crawl_ms = stats.avg_crawl_ms(),
                "worker stats"
            );
        }
    }
}

/// One claimed job end to end. Always leaves the job terminal on the Ok
/// path; an Err is translated into finish_fail by the caller.
async fn process_job(
    storage: &Storage,
    pipeline: &CrawlPipeline,
    config: &AppConfig,
    claim: &JobClaim,
) -> Result<bool> {
    let place_id = &claim.place_id;
    info!(job_id = claim.job_id, place_id, mode = claim.mode.as_str(), "processing job");

    let venue = storage.get_venue(place_id).await?;
    let website = claim
        .base_url
        .clone()
        .or_else(|| venue.and_then(|v| v.website));
    let Some(base_url) = website.filter(|w| !w.trim().is_empty()) else {
        warn!(job_id = claim.job_id, place_id, "venue has no website");
        storage.finish_fail(claim.job_id, Some("no_website")).await?;
        return Ok(false);
    };

    let result = pipeline
        .crawl_site(&base_url, Some(place_id), None, DEFAULT_MAX_TARGETS)
        .await;
    storage
        .write_scraped_pages(&result.pages, config.crawl.store_raw_html)
        .await?;

    // Structured metadata per page; raw HTML only exists on pages that
    // passed the quality gate.
    let mut schema_by_url: HashMap<String, ExtractedFacts> = HashMap::new();
    for page in &result.pages {
        if let Some(html) = &page.raw_html {
            let facts = parse_schema_org(html);
            if !facts.is_empty() {
                schema_by_url.insert(page.url.clone(), facts);
            }
        }
    }

    let (enrichment, updated) = build_enrichment(place_id, &result.pages, &schema_by_url, Utc::now());
    if updated.is_empty() {
        storage
            .finish_fail(claim.job_id, Some("no_enrichment"))
            .await?;
        info!(job_id = claim.job_id, place_id, "no fields extracted");
        return Ok(false);
    }

    storage.upsert_enrichment(&enrichment).await?;
    storage.touch_last_enriched(place_id).await?;
    storage.finish_success(claim.job_id).await?;
    info!(
        job_id = claim.job_id,
        place_id,
        fields = ?updated,
        pages = result.pages.len(),
        duration_ms = result.duration_ms,
        "job succeeded"
    );
    Ok(true)
}
