use std::collections::HashMap;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use placecrawl_core::{Enrichment, JobClaim, JobMode, JobStatus, PageRecord, Venue};

mod enrichment;
mod pages;
mod queue;
mod venues;

/// Postgres-backed durable state: the job queue, venue lookups, scraped
/// page audit rows and the enrichment table. One pool shared by every
/// component in the process.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 20).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- job queue ---

    pub async fn enqueue(&self, place_id: &str, mode: JobMode, priority: i32) -> Result<i64> {
        queue::enqueue(&self.pool, place_id, mode, priority).await
    }

    pub async fn enqueue_many(&self, items: &[(String, JobMode, i32)]) -> Result<Vec<i64>> {
        queue::enqueue_many(&self.pool, items).await
    }

    pub async fn claim_batch(&self, limit: i64, per_host_cap: i64) -> Result<Vec<JobClaim>> {
        queue::claim_batch(&self.pool, limit, per_host_cap).await
    }

    pub async fn finish_success(&self, job_id: i64) -> Result<()> {
        queue::finish_success(&self.pool, job_id).await
    }

    pub async fn finish_fail(&self, job_id: i64, error: Option<&str>) -> Result<()> {
        queue::finish_fail(&self.pool, job_id, error).await
    }

    pub async fn get_job_status(&self, job_id: i64) -> Result<Option<JobStatus>> {
        queue::get_status(&self.pool, job_id).await
    }

    pub async fn queue_depth(&self) -> Result<HashMap<String, i64>> {
        queue::depth(&self.pool).await
    }

    pub async fn prune_stuck(&self, max_running_minutes: i64) -> Result<u64> {
        queue::prune_stuck(&self.pool, max_running_minutes).await
    }

    pub async fn recent_failures(&self, limit: i64) -> Result<Vec<JobStatus>> {
        queue::recent_failures(&self.pool, limit).await
    }

    // --- venues ---

    pub async fn get_venue(&self, place_id: &str) -> Result<Option<Venue>> {
        venues::get_venue(&self.pool, place_id).await
    }

    pub async fn touch_last_enriched(&self, place_id: &str) -> Result<()> {
        venues::touch_last_enriched(&self.pool, place_id).await
    }

    pub async fn popularity_threshold(&self, percentile: f64) -> Result<Option<f64>> {
        venues::popularity_threshold(&self.pool, percentile).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn select_refresh_candidates(
        &self,
        limit: i64,
        top_percentile: f64,
        hours_days: i64,
        menu_contact_price_days: i64,
        desc_features_days: i64,
    ) -> Result<Vec<Venue>> {
        venues::select_refresh_candidates(
            &self.pool,
            limit,
            top_percentile,
            hours_days,
            menu_contact_price_days,
            desc_features_days,
        )
        .await
    }

    // --- enrichment ---

    pub async fn get_enrichment(&self, place_id: &str) -> Result<Option<Enrichment>> {
        enrichment::get_enrichment(&self.pool, place_id).await
    }

    pub async fn upsert_enrichment(&self, e: &Enrichment) -> Result<()> {
        enrichment::upsert_enrichment(&self.pool, e).await
    }

    // --- scraped pages & counts ---

    pub async fn write_scraped_pages(
        &self,
        pages: &[PageRecord],
        store_raw_html: bool,
    ) -> Result<Vec<i64>> {
        pages::write_scraped_pages(&self.pool, pages, store_raw_html).await
    }

    pub async fn count_pages(&self) -> Result<i64> {
        pages::count_pages(&self.pool).await
    }

    pub async fn count_enriched(&self) -> Result<i64> {
        pages::count_enriched(&self.pool).await
    }

    pub async fn count_venues(&self) -> Result<i64> {
        pages::count_venues(&self.pool).await
    }
}
