use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use placecrawl_core::Venue;

type VenueRow = (
    String,
    String,
    Option<String>,
    f64,
    f64,
    Option<f64>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<String>,
);

fn venue_from_row(row: VenueRow) -> Venue {
    let (
        place_id,
        name,
        category_name,
        latitude,
        longitude,
        popularity_confidence,
        last_enriched_at,
        website,
        address,
    ) = row;
    Venue {
        place_id,
        name,
        category_name,
        latitude,
        longitude,
        popularity_confidence,
        last_enriched_at,
        website,
        address,
    }
}

const VENUE_COLS: &str = "place_id, name, category_name, latitude, longitude, \
     popularity_confidence, last_enriched_at, website, address";

pub async fn get_venue(pool: &PgPool, place_id: &str) -> Result<Option<Venue>> {
    let sql = format!("SELECT {VENUE_COLS} FROM venues WHERE place_id = $1");
    let row: Option<VenueRow> = sqlx::query_as(&sql).bind(place_id).fetch_optional(pool).await?;
    Ok(row.map(venue_from_row))
}

pub async fn touch_last_enriched(pool: &PgPool, place_id: &str) -> Result<()> {
    sqlx::query("UPDATE venues SET last_enriched_at = NOW() WHERE place_id = $1")
        .bind(place_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Popularity value at the given percentile, e.g. 0.9 for the top-10%
/// cutoff. None when no venue carries a popularity confidence.
pub async fn popularity_threshold(pool: &PgPool, percentile: f64) -> Result<Option<f64>> {
    let row: (Option<f64>,) = sqlx::query_as(
        "SELECT percentile_disc($1) WITHIN GROUP (ORDER BY popularity_confidence)
         FROM venues WHERE popularity_confidence IS NOT NULL",
    )
    .bind(percentile)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Coarse candidate selection for the background scheduler: venues with a
/// website and no active job whose enrichment is absent or has any
/// timestamp past its window, plus every venue in the top popularity
/// percentile. The pure freshness evaluator makes the final call on each
/// candidate; this query only has to over-approximate cheaply.
pub async fn select_refresh_candidates(
    pool: &PgPool,
    limit: i64,
    top_percentile: f64,
    hours_days: i64,
    menu_contact_price_days: i64,
    desc_features_days: i64,
) -> Result<Vec<Venue>> {
    let sql = format!(
        r#"
        WITH pop AS (
            SELECT percentile_disc($2) WITHIN GROUP (ORDER BY popularity_confidence) AS threshold
            FROM venues
            WHERE popularity_confidence IS NOT NULL
        )
        SELECT {VENUE_COLS}
        FROM venues v
        LEFT JOIN enrichment e USING (place_id)
        CROSS JOIN pop
        WHERE v.website IS NOT NULL AND v.website <> ''
          AND NOT EXISTS (
              SELECT 1 FROM crawl_jobs cj
              WHERE cj.place_id = v.place_id AND cj.state IN ('pending', 'running')
          )
          AND (
              e.place_id IS NULL
              OR e.hours_last_updated IS NULL
              OR e.hours_last_updated < NOW() - make_interval(days => $3)
              OR e.contact_last_updated IS NULL
              OR e.contact_last_updated < NOW() - make_interval(days => $4)
              OR e.description_last_updated IS NULL
              OR e.description_last_updated < NOW() - make_interval(days => $5)
              OR (pop.threshold IS NOT NULL AND v.popularity_confidence >= pop.threshold)
          )
        ORDER BY (e.place_id IS NULL) DESC,
                 e.hours_last_updated ASC NULLS FIRST,
                 v.popularity_confidence DESC NULLS LAST
        LIMIT $1
        "#
    );

    let rows: Vec<VenueRow> = sqlx::query_as(&sql)
        .bind(limit)
        .bind(top_percentile)
        .bind(hours_days as i32)
        .bind(menu_contact_price_days as i32)
        .bind(desc_features_days as i32)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(venue_from_row).collect())
}
