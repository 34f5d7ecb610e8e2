use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use placecrawl_core::{ContactDetails, Enrichment, HoursMap};

type EnrichmentRow = (
    String,
    Option<Value>,
    Option<DateTime<Utc>>,
    Option<Value>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<Value>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<Value>,
    Option<String>,
    Option<Value>,
);

fn string_list(v: Option<Value>) -> Vec<String> {
    v.and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default()
}

pub async fn get_enrichment(pool: &PgPool, place_id: &str) -> Result<Option<Enrichment>> {
    let row: Option<EnrichmentRow> = sqlx::query_as(
        "SELECT place_id, hours, hours_last_updated,
                contact_details, contact_last_updated,
                description, description_last_updated,
                features, features_last_updated,
                menu_url, menu_last_updated,
                price_range, price_last_updated,
                amenities, fees, sources
         FROM enrichment WHERE place_id = $1",
    )
    .bind(place_id)
    .fetch_optional(pool)
    .await?;

    let Some((
        place_id,
        hours,
        hours_last_updated,
        contact_details,
        contact_last_updated,
        description,
        description_last_updated,
        features,
        features_last_updated,
        menu_url,
        menu_last_updated,
        price_range,
        price_last_updated,
        amenities,
        fees,
        sources,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(Enrichment {
        place_id,
        hours: hours.and_then(|v| serde_json::from_value::<HoursMap>(v).ok()),
        hours_last_updated,
        contact_details: contact_details
            .and_then(|v| serde_json::from_value::<ContactDetails>(v).ok()),
        contact_last_updated,
        description,
        description_last_updated,
        features: string_list(features),
        features_last_updated,
        menu_url,
        menu_last_updated,
        price_range,
        price_last_updated,
        amenities: string_list(amenities),
        fees,
        sources: string_list(sources),
    }))
}

/// Upsert the merged record. Only fields the merge produced overwrite the
/// stored row; everything else keeps its previous value and timestamp, so
/// a crawl that finds less than the last one never erases facts.
pub async fn upsert_enrichment(pool: &PgPool, e: &Enrichment) -> Result<()> {
    let hours = e.hours.as_ref().and_then(|h| serde_json::to_value(h).ok());
    let contact = e
        .contact_details
        .as_ref()
        .and_then(|c| serde_json::to_value(c).ok());
    let features = (!e.features.is_empty())
        .then(|| serde_json::to_value(&e.features).ok())
        .flatten();
    let amenities = (!e.amenities.is_empty())
        .then(|| serde_json::to_value(&e.amenities).ok())
        .flatten();
    let sources = (!e.sources.is_empty())
        .then(|| serde_json::to_value(&e.sources).ok())
        .flatten();

    sqlx::query(
        r#"
        INSERT INTO enrichment (
            place_id,
            hours, hours_last_updated,
            contact_details, contact_last_updated,
            description, description_last_updated,
            features, features_last_updated,
            menu_url, menu_last_updated,
            price_range, price_last_updated,
            amenities, fees, sources
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (place_id) DO UPDATE SET
            hours = COALESCE(EXCLUDED.hours, enrichment.hours),
            hours_last_updated = COALESCE(EXCLUDED.hours_last_updated, enrichment.hours_last_updated),
            contact_details = COALESCE(EXCLUDED.contact_details, enrichment.contact_details),
            contact_last_updated = COALESCE(EXCLUDED.contact_last_updated, enrichment.contact_last_updated),
            description = COALESCE(EXCLUDED.description, enrichment.description),
            description_last_updated = COALESCE(EXCLUDED.description_last_updated, enrichment.description_last_updated),
            features = COALESCE(EXCLUDED.features, enrichment.features),
            features_last_updated = COALESCE(EXCLUDED.features_last_updated, enrichment.features_last_updated),
            menu_url = COALESCE(EXCLUDED.menu_url, enrichment.menu_url),
            menu_last_updated = COALESCE(EXCLUDED.menu_last_updated, enrichment.menu_last_updated),
            price_range = COALESCE(EXCLUDED.price_range, enrichment.price_range),
            price_last_updated = COALESCE(EXCLUDED.price_last_updated, enrichment.price_last_updated),
            amenities = COALESCE(EXCLUDED.amenities, enrichment.amenities),
            fees = COALESCE(EXCLUDED.fees, enrichment.fees),
            sources = COALESCE(EXCLUDED.sources, enrichment.sources)
        "#,
    )
    .bind(&e.place_id)
    .bind(hours)
    .bind(e.hours_last_updated)
    .bind(contact)
    .bind(e.contact_last_updated)
    .bind(&e.description)
    .bind(e.description_last_updated)
    .bind(features)
    .bind(e.features_last_updated)
    .bind(&e.menu_url)
    .bind(e.menu_last_updated)
    .bind(&e.price_range)
    .bind(e.price_last_updated)
    .bind(amenities)
    .bind(&e.fees)
    .bind(sources)
    .execute(pool)
    .await?;

    debug!(place_id = %e.place_id, "enrichment upserted");
    Ok(())
}
