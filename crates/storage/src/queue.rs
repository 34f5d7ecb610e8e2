use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use placecrawl_core::{truncate_error, JobClaim, JobMode, JobState, JobStatus};

// Host of a venue website as used by the per-host cap: scheme stripped,
// leading www. stripped, port and path stripped, lowercased. www.x.com and
// x.com share one cap bucket.
const HOST_EXPR: &str =
    r"lower(split_part(split_part(regexp_replace(v.website, '^https?://(www\.)?', ''), '/', 1), ':', 1))";

/// Create a pending job. Dedupe: if a pending job for the same
/// (place_id, mode) already exists, its id is returned instead. The
/// partial unique index makes this safe under concurrent enqueuers.
pub async fn enqueue(pool: &PgPool, place_id: &str, mode: JobMode, priority: i32) -> Result<i64> {
    let place_id = place_id.trim();
    if place_id.is_empty() {
        anyhow::bail!("enqueue called without place_id");
    }

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO crawl_jobs (place_id, mode, priority, state)
        VALUES ($1, $2, $3, 'pending')
        ON CONFLICT (place_id, mode) WHERE state = 'pending' DO NOTHING
        RETURNING job_id
        "#,
    )
    .bind(place_id)
    .bind(mode.as_str())
    .bind(priority.clamp(0, 10))
    .fetch_optional(pool)
    .await?;

    if let Some((job_id,)) = inserted {
        debug!(job_id, place_id, mode = mode.as_str(), "job enqueued");
        return Ok(job_id);
    }

    let existing: (i64,) = sqlx::query_as(
        r#"
        SELECT job_id FROM crawl_jobs
        WHERE place_id = $1 AND mode = $2 AND state = 'pending'
        ORDER BY priority DESC, job_id ASC
        LIMIT 1
        "#,
    )
    .bind(place_id)
    .bind(mode.as_str())
    .fetch_one(pool)
    .await
    .context("pending job vanished between insert and lookup")?;
    Ok(existing.0)
}

pub async fn enqueue_many(
    pool: &PgPool,
    items: &[(String, JobMode, i32)],
) -> Result<Vec<i64>> {
    let mut job_ids = Vec::with_capacity(items.len());
    for (place_id, mode, priority) in items {
        job_ids.push(enqueue(pool, place_id, *mode, *priority).await?);
    }
    Ok(job_ids)
}

/// Atomically claim up to `limit` eligible pending jobs and mark them
/// running. Eligibility respects the per-host cap: a pending job whose
/// venue host already has `per_host_cap` running jobs is passed over. The
/// locking SELECT and the UPDATE range over the same CTE, with SKIP LOCKED
/// so concurrent claimers never block or double-claim.
pub async fn claim_batch(pool: &PgPool, limit: i64, per_host_cap: i64) -> Result<Vec<JobClaim>> {
    let sql = format!(
        r#"
        WITH running_counts AS (
            SELECT {host} AS host, COUNT(*) AS running_now
            FROM crawl_jobs cj
            JOIN venues v USING (place_id)
            WHERE cj.state = 'running' AND v.website IS NOT NULL
            GROUP BY 1
        ),
        eligible AS (
            SELECT cj.job_id, cj.place_id, cj.mode, cj.priority, v.website, {host} AS host
            FROM crawl_jobs cj
            LEFT JOIN venues v USING (place_id)
            LEFT JOIN running_counts r ON r.host = {host}
            WHERE cj.state = 'pending'
              AND (v.website IS NULL OR COALESCE(r.running_now, 0) < $1)
            ORDER BY cj.priority DESC, cj.job_id ASC
            LIMIT $2
            FOR UPDATE OF cj SKIP LOCKED
        )
        UPDATE crawl_jobs cj
        SET state = 'running', started_at = NOW(), error = NULL
        FROM eligible e
        WHERE cj.job_id = e.job_id
        RETURNING cj.job_id, e.place_id, e.mode, e.priority, e.website, e.host, cj.started_at
        "#,
        host = HOST_EXPR
    );

    let rows: Vec<(
        i64,
        String,
        String,
        i32,
        Option<String>,
        Option<String>,
        DateTime<Utc>,
    )> = sqlx::query_as(&sql)
        .bind(per_host_cap.max(1))
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;

    let mut claims = Vec::with_capacity(rows.len());
    for (job_id, place_id, mode, priority, website, host, started_at) in rows {
        claims.push(JobClaim {
            job_id,
            place_id,
            mode: JobMode::from_str(&mode).map_err(anyhow::Error::msg)?,
            priority,
            base_url: website,
            host: host.filter(|h| !h.is_empty()),
            started_at,
        });
    }
    if !claims.is_empty() {
        debug!(count = claims.len(), "jobs claimed");
    }
    Ok(claims)
}

/// running -> success. Guarded: a job in any other state is untouched.
pub async fn finish_success(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs SET state = 'success', finished_at = NOW(), error = NULL
         WHERE job_id = $1 AND state = 'running'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// running -> fail, with a truncated error string.
pub async fn finish_fail(pool: &PgPool, job_id: i64, error: Option<&str>) -> Result<()> {
    let err = error.map(truncate_error).filter(|e| !e.is_empty());
    sqlx::query(
        "UPDATE crawl_jobs SET state = 'fail', finished_at = NOW(), error = $2
         WHERE job_id = $1 AND state = 'running'",
    )
    .bind(job_id)
    .bind(err)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_status(pool: &PgPool, job_id: i64) -> Result<Option<JobStatus>> {
    let row: Option<(
        i64,
        String,
        String,
        i32,
        String,
        Option<DateTime<Utc>>,
        Option<DateTime<Utc>>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT job_id, place_id, mode, priority, state, started_at, finished_at, error
         FROM crawl_jobs WHERE job_id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some((job_id, place_id, mode, priority, state, started_at, finished_at, error)) = row
    else {
        return Ok(None);
    };
    Ok(Some(JobStatus {
        job_id,
        place_id,
        mode: JobMode::from_str(&mode).map_err(anyhow::Error::msg)?,
        priority,
        state: JobState::from_str(&state).map_err(anyhow::Error::msg)?,
        started_at,
        finished_at,
        error,
    }))
}

/// Queue depth by state, for monitoring.
pub async fn depth(pool: &PgPool) -> Result<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM crawl_jobs GROUP BY state")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

/// Reset jobs stuck in running longer than the threshold back to pending.
/// A worker crash between claim and finish is the expected cause.
pub async fn prune_stuck(pool: &PgPool, max_running_minutes: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE crawl_jobs
         SET state = 'pending', started_at = NULL, finished_at = NULL, error = 'reset_stuck'
         WHERE state = 'running'
           AND started_at < NOW() - make_interval(mins => $1)",
    )
    .bind(max_running_minutes as i32)
    .execute(pool)
    .await?;
    let reset = result.rows_affected();
    if reset > 0 {
        info!(reset, "stuck jobs reset to pending");
    }
    Ok(reset)
}

/// Most recent failed jobs, newest first. Operator tooling.
pub async fn recent_failures(pool: &PgPool, limit: i64) -> Result<Vec<JobStatus>> {
    let rows: Vec<(
        i64,
        String,
        String,
        i32,
        Option<DateTime<Utc>>,
        Option<DateTime<Utc>>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT job_id, place_id, mode, priority, started_at, finished_at, error
         FROM crawl_jobs
         WHERE state = 'fail'
         ORDER BY finished_at DESC NULLS LAST, job_id DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for (job_id, place_id, mode, priority, started_at, finished_at, error) in rows {
        out.push(JobStatus {
            job_id,
            place_id,
            mode: JobMode::from_str(&mode).map_err(anyhow::Error::msg)?,
            priority,
            state: JobState::Fail,
            started_at,
            finished_at,
            error,
        });
    }
    Ok(out)
}
