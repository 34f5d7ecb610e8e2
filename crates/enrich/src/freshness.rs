use chrono::{DateTime, Duration, Utc};

use placecrawl_core::config::FreshnessConfig;
use placecrawl_core::{Enrichment, Venue};

/// Venue grouping that decides which enrichment fields are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryGroup {
    Restaurant,
    Accommodation,
    Attraction,
    General,
}

impl CategoryGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryGroup::Restaurant => "restaurant",
            CategoryGroup::Accommodation => "accommodation",
            CategoryGroup::Attraction => "attraction",
            CategoryGroup::General => "general",
        }
    }
}

const RESTAURANT_KW: &[&str] = &[
    "restaurant", "café", "cafe", "bar", "pub", "diner", "bistro", "pizzeria", "coffee", "bakery",
];
const ACCOMMODATION_KW: &[&str] = &[
    "hotel",
    "hostel",
    "motel",
    "guest house",
    "guesthouse",
    "bnb",
    "b&b",
    "lodge",
    "resort",
    "campground",
];
const ATTRACTION_KW: &[&str] = &[
    "attraction",
    "museum",
    "gallery",
    "sight",
    "landmark",
    "monument",
    "zoo",
    "aquarium",
    "park",
    "castle",
    "cathedral",
];

/// Map a free-text category label onto a group by keyword match.
pub fn categorize(category_name: Option<&str>) -> CategoryGroup {
    let Some(name) = category_name else {
        return CategoryGroup::General;
    };
    let c = name.to_lowercase();
    if RESTAURANT_KW.iter().any(|k| c.contains(k)) {
        return CategoryGroup::Restaurant;
    }
    if ACCOMMODATION_KW.iter().any(|k| c.contains(k)) {
        return CategoryGroup::Accommodation;
    }
    if ATTRACTION_KW.iter().any(|k| c.contains(k)) {
        return CategoryGroup::Attraction;
    }
    CategoryGroup::General
}

/// Per-venue field freshness: which required fields are missing entirely,
/// which are past their window, and which are still good.
#[derive(Debug, Clone)]
pub struct FreshnessReport {
    pub place_id: String,
    pub category_group: CategoryGroup,
    pub required_fields: Vec<&'static str>,
    pub missing: Vec<&'static str>,
    pub stale: Vec<&'static str>,
    pub fresh: Vec<&'static str>,
}

impl FreshnessReport {
    /// A venue needs a crawl when any required field is missing or stale.
    pub fn needs_refresh(&self) -> bool {
        !self.missing.is_empty() || !self.stale.is_empty()
    }
}

fn required_for(group: CategoryGroup) -> Vec<&'static str> {
    let mut required = vec!["address", "contact_details", "opening_hours", "description"];
    match group {
        CategoryGroup::Restaurant => required.extend(["menu", "price_range"]),
        CategoryGroup::Accommodation => required.extend(["price_range", "amenities"]),
        CategoryGroup::Attraction => required.extend(["features", "fees"]),
        CategoryGroup::General => {}
    }
    required
}

fn is_stale(ts: Option<DateTime<Utc>>, window_days: i64, now: DateTime<Utc>) -> bool {
    match ts {
        None => true,
        Some(ts) => now - ts > Duration::days(window_days),
    }
}

#[allow(clippy::too_many_arguments)]
fn mark(
    missing: &mut Vec<&'static str>,
    stale: &mut Vec<&'static str>,
    fresh: &mut Vec<&'static str>,
    field: &'static str,
    present: bool,
    ts: Option<DateTime<Utc>>,
    window_days: i64,
    now: DateTime<Utc>,
) {
    if !present {
        missing.push(field);
    } else if is_stale(ts, window_days, now) {
        stale.push(field);
    } else {
        fresh.push(field);
    }
}

/// Pure evaluation of a venue against its enrichment row. The address is
/// judged from the venue record itself; everything else from the
/// enrichment row and its per-field timestamps.
pub fn freshness(
    venue: &Venue,
    enrichment: Option<&Enrichment>,
    windows: &FreshnessConfig,
    now: DateTime<Utc>,
) -> FreshnessReport {
    let group = categorize(venue.category_name.as_deref());
    let required = required_for(group);

    let mut missing: Vec<&'static str> = Vec::new();
    let mut stale: Vec<&'static str> = Vec::new();
    let mut fresh: Vec<&'static str> = Vec::new();

    for field in &required {
        match *field {
            "address" => {
                // Venue-level fact, not enrichment; no window applies.
                if venue.address.as_deref().unwrap_or("").is_empty() {
                    missing.push("address");
                } else {
                    fresh.push("address");
                }
            }
            "opening_hours" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "opening_hours",
                enrichment.is_some_and(|e| e.hours.as_ref().is_some_and(|h| !h.is_empty())),
                enrichment.and_then(|e| e.hours_last_updated),
                windows.hours_days,
                now,
            ),
            "contact_details" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "contact_details",
                enrichment
                    .is_some_and(|e| e.contact_details.as_ref().is_some_and(|c| !c.is_empty())),
                enrichment.and_then(|e| e.contact_last_updated),
                windows.menu_contact_price_days,
                now,
            ),
            "description" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "description",
                enrichment.is_some_and(|e| e.description.is_some()),
                enrichment.and_then(|e| e.description_last_updated),
                windows.desc_features_days,
                now,
            ),
            "menu" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "menu",
                enrichment.is_some_and(|e| e.menu_url.is_some()),
                enrichment.and_then(|e| e.menu_last_updated),
                windows.menu_contact_price_days,
                now,
            ),
            "price_range" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "price_range",
                enrichment.is_some_and(|e| e.price_range.is_some()),
                enrichment.and_then(|e| e.price_last_updated),
                windows.menu_contact_price_days,
                now,
            ),
            "amenities" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "amenities",
                enrichment.is_some_and(|e| !e.amenities.is_empty()),
                enrichment.and_then(|e| e.features_last_updated),
                windows.desc_features_days,
                now,
            ),
            "features" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "features",
                enrichment.is_some_and(|e| !e.features.is_empty()),
                enrichment.and_then(|e| e.features_last_updated),
                windows.desc_features_days,
                now,
            ),
            "fees" => mark(
                &mut missing,
                &mut stale,
                &mut fresh,
                "fees",
                enrichment.is_some_and(|e| e.fees.is_some()),
                enrichment.and_then(|e| e.features_last_updated),
                windows.desc_features_days,
                now,
            ),
            _ => {}
        }
    }

    FreshnessReport {
        place_id: venue.place_id.clone(),
        category_group: group,
        required_fields: required,
        missing,
        stale,
        fresh,
    }
}
