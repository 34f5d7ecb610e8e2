use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

use placecrawl_core::PageRecord;

/// Persist one row per fetch attempt. Raw HTML is stored only when the
/// operator opted in; the audit value of these rows is the reason code,
/// hashes and timings, not the bytes.
pub async fn write_scraped_pages(
    pool: &PgPool,
    pages: &[PageRecord],
    store_raw_html: bool,
) -> Result<Vec<i64>> {
    let mut page_ids = Vec::with_capacity(pages.len());
    for page in pages {
        let redirect_chain = serde_json::to_value(&page.redirect_chain)?;
        let raw_html = if store_raw_html {
            page.raw_html.as_deref()
        } else {
            None
        };
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scraped_pages (
                place_id, url, final_url, page_type, fetched_at, valid_until,
                http_status, content_type, content_hash, cleaned_text, raw_html,
                source_method, redirect_chain, reason, size_bytes, duration_ms, first_byte_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING page_id
            "#,
        )
        .bind(&page.place_id)
        .bind(&page.url)
        .bind(&page.final_url)
        .bind(page.page_type.as_str())
        .bind(page.fetched_at)
        .bind(page.valid_until)
        .bind(page.http_status as i32)
        .bind(&page.content_type)
        .bind(&page.content_hash)
        .bind(&page.cleaned_text)
        .bind(raw_html)
        .bind(page.source_method.as_str())
        .bind(redirect_chain)
        .bind(page.reason.as_str())
        .bind(page.size_bytes as i64)
        .bind(page.duration_ms as i64)
        .bind(page.first_byte_ms as i64)
        .fetch_one(pool)
        .await?;
        page_ids.push(row.0);
    }
    debug!(count = page_ids.len(), "scraped pages written");
    Ok(page_ids)
}

pub async fn count_pages(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scraped_pages")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn count_enriched(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrichment")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn count_venues(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM venues")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
