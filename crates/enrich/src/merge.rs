use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use placecrawl_core::{
    ContactDetails, Enrichment, ExtractedFacts, HoursMap, PageRecord, PageType,
};
use placecrawl_parser::extract_facts;

// Merge precedence: dedicated pages beat structured metadata, which beats
// homepage/about copy. Within the heuristic pass, dedicated page types go
// first.
fn page_priority(page_type: PageType) -> u8 {
    match page_type {
        PageType::Hours => 0,
        PageType::Menu => 1,
        PageType::Contact => 2,
        PageType::Fees => 3,
        PageType::About => 4,
        PageType::Homepage => 5,
        PageType::Other => 9,
    }
}

#[derive(Default)]
struct Accumulator {
    hours: Option<HoursMap>,
    contact_details: Option<ContactDetails>,
    description: Option<String>,
    features: Vec<String>,
    amenities: Vec<String>,
    menu_url: Option<String>,
    price_range: Option<String>,
    fees: Option<String>,
    sources: HashMap<&'static str, Vec<String>>,
    updated: Vec<&'static str>,
}

impl Accumulator {
    fn mark(&mut self, field: &'static str, url: &str) {
        if !self.updated.contains(&field) {
            self.updated.push(field);
        }
        let entry = self.sources.entry(field).or_default();
        if !entry.iter().any(|u| u == url) {
            entry.push(url.to_string());
        }
    }

    /// Day-wise union: append ranges the day does not already carry.
    fn take_hours(&mut self, value: &HoursMap, url: &str) {
        if value.is_empty() {
            return;
        }
        let merged = self.hours.get_or_insert_with(HoursMap::new);
        let mut changed = false;
        for (day, ranges) in value {
            let entry = merged.entry(day.clone()).or_default();
            for r in ranges {
                if !entry.contains(r) {
                    entry.push(r.clone());
                    changed = true;
                }
            }
        }
        if changed {
            self.mark("hours", url);
        }
    }

    /// First writer wins per sub-field; social profiles union-dedup.
    fn take_contact(&mut self, value: &ContactDetails, url: &str) {
        if value.is_empty() {
            return;
        }
        let contact = self.contact_details.get_or_insert_with(ContactDetails::default);
        let mut changed = false;
        if contact.phone.is_none() && value.phone.is_some() {
            contact.phone = value.phone.clone();
            changed = true;
        }
        if contact.email.is_none() && value.email.is_some() {
            contact.email = value.email.clone();
            changed = true;
        }
        if contact.website.is_none() && value.website.is_some() {
            contact.website = value.website.clone();
            changed = true;
        }
        for s in &value.social {
            if !contact.social.contains(s) {
                contact.social.push(s.clone());
                changed = true;
            }
        }
        if changed {
            self.mark("contact_details", url);
        }
    }

    /// Union-dedup, sorted.
    fn take_tags(&mut self, field: &'static str, value: &[String], url: &str) {
        if value.is_empty() {
            return;
        }
        let target = if field == "features" {
            &mut self.features
        } else {
            &mut self.amenities
        };
        let before = target.len();
        for v in value {
            if !target.contains(v) {
                target.push(v.clone());
            }
        }
        if target.len() != before {
            target.sort();
            self.mark(field, url);
        }
    }

    /// First writer wins.
    fn take_scalar(&mut self, field: &'static str, value: Option<&String>, url: &str) {
        let Some(value) = value else { return };
        if value.is_empty() {
            return;
        }
        let slot = match field {
            "description" => &mut self.description,
            "menu_url" => &mut self.menu_url,
            "price_range" => &mut self.price_range,
            "fees" => &mut self.fees,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.clone());
            self.mark(field, url);
        }
    }

    /// Everything except hours, which merge separately in input order.
    fn take_non_hours(&mut self, facts: &ExtractedFacts, url: &str) {
        if let Some(contact) = &facts.contact_details {
            self.take_contact(contact, url);
        }
        self.take_tags("features", &facts.features, url);
        self.take_tags("amenities", &facts.amenities, url);
        self.take_scalar("description", facts.description.as_ref(), url);
        self.take_scalar("menu_url", facts.menu_url.as_ref(), url);
        self.take_scalar("price_range", facts.price_range.as_ref(), url);
        self.take_scalar("fees", facts.fees.as_ref(), url);
    }
}

/// Merge heuristic and structured-metadata extraction across all pages of
/// one site into a single enrichment record. Deterministic for identical
/// inputs: hours union-merge in page input order, every other field in
/// precedence order with ties broken by input order, and every
/// contributing URL lands in `sources`. Timestamps are written only for
/// fields that received a value.
pub fn build_enrichment(
    place_id: &str,
    pages: &[PageRecord],
    schema_by_url: &HashMap<String, ExtractedFacts>,
    now: DateTime<Utc>,
) -> (Enrichment, Vec<String>) {
    let facts: Vec<ExtractedFacts> = pages.iter().map(extract_facts).collect();

    let mut ordered: Vec<usize> = (0..pages.len()).collect();
    ordered.sort_by_key(|&i| page_priority(pages[i].page_type));

    let mut acc = Accumulator::default();

    // Hours union-merge in input order: homepage ranges land before ranges
    // from discovered pages, and structured metadata appends last.
    for (page, f) in pages.iter().zip(&facts) {
        if let Some(hours) = &f.hours {
            acc.take_hours(hours, &page.url);
        }
    }
    for page in pages {
        if let Some(s) = schema_by_url.get(&page.url) {
            if let Some(hours) = &s.hours {
                acc.take_hours(hours, &page.url);
            }
        }
    }

    // Pass 1 for the remaining fields: per-page heuristics, dedicated
    // pages first.
    for &i in &ordered {
        if !facts[i].is_empty() {
            acc.take_non_hours(&facts[i], &pages[i].url);
        }
    }

    // Pass 2: structured metadata fills what heuristics left open; the
    // union fields keep merging.
    for &i in &ordered {
        if let Some(s) = schema_by_url.get(&pages[i].url) {
            acc.take_non_hours(s, &pages[i].url);
        }
    }

    // Flatten per-field sources in field-name order for stable output.
    let mut sources: Vec<String> = Vec::new();
    let mut fields: Vec<&&'static str> = acc.sources.keys().collect::<Vec<_>>();
    fields.sort();
    for field in fields {
        for url in &acc.sources[*field] {
            if !sources.contains(url) {
                sources.push(url.clone());
            }
        }
    }

    let mut updated: Vec<String> = acc.updated.iter().map(|f| f.to_string()).collect();
    updated.sort();
    updated.dedup();
    debug!(place_id, fields = ?updated, "enrichment merged");

    let has = |f: &str| updated.iter().any(|u| u == f);
    let enrichment = Enrichment {
        place_id: place_id.to_string(),
        hours: acc.hours,
        hours_last_updated: has("hours").then_some(now),
        contact_details: acc.contact_details,
        contact_last_updated: has("contact_details").then_some(now),
        description: acc.description,
        description_last_updated: has("description").then_some(now),
        features: acc.features,
        // amenities and fees share this timestamp; no dedicated columns.
        features_last_updated: (has("features") || has("amenities") || has("fees"))
            .then_some(now),
        menu_url: acc.menu_url,
        menu_last_updated: has("menu_url").then_some(now),
        price_range: acc.price_range,
        price_last_updated: has("price_range").then_some(now),
        amenities: acc.amenities,
        fees: acc.fees,
        sources,
    };

    (enrichment, updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use placecrawl_core::{ReasonCode, SourceMethod};

    fn page(page_type: PageType, url: &str, text: Option<&str>) -> PageRecord {
        PageRecord {
            place_id: Some("P1".into()),
            url: url.to_string(),
            final_url: url.to_string(),
            page_type,
            fetched_at: Utc::now(),
            valid_until: None,
            http_status: 200,
            content_type: Some("text/html".into()),
            content_hash: None,
            cleaned_text: text.map(String::from),
            size_bytes: text.map(str::len).unwrap_or(0),
            source_method: SourceMethod::Heuristic,
            redirect_chain: Vec::new(),
            reason: ReasonCode::Ok,
            duration_ms: 0,
            first_byte_ms: 0,
            raw_html: None,
        }
    }

    #[test]
    fn union_merges_hours_across_heuristics_and_schema() {
        let home = page(
            PageType::Homepage,
            "https://x.example/",
            Some("Mon 09:00 - 17:00"),
        );
        let hours = page(
            PageType::Hours,
            "https://x.example/hours",
            Some("Mon 10:00 - 18:00\nSat 11:00 - 15:00"),
        );
        let contact = page(PageType::Contact, "https://x.example/contact", None);

        let mut schema = HashMap::new();
        let mut schema_hours = HoursMap::new();
        schema_hours.insert(
            "sun".to_string(),
            vec![("12:00".to_string(), "16:00".to_string())],
        );
        schema.insert(
            "https://x.example/contact".to_string(),
            ExtractedFacts {
                hours: Some(schema_hours),
                ..Default::default()
            },
        );

        let (enrichment, updated) =
            build_enrichment("P1", &[home, hours, contact], &schema, Utc::now());

        let merged = enrichment.hours.unwrap();
        // Union-merge keeps input order: the homepage range comes first,
        // the dedicated hours page appends.
        assert_eq!(
            merged.get("mon").unwrap(),
            &vec![
                ("09:00".to_string(), "17:00".to_string()),
                ("10:00".to_string(), "18:00".to_string()),
            ]
        );
        assert_eq!(
            merged.get("sat").unwrap(),
            &vec![("11:00".to_string(), "15:00".to_string())]
        );
        assert_eq!(
            merged.get("sun").unwrap(),
            &vec![("12:00".to_string(), "16:00".to_string())]
        );

        assert!(updated.contains(&"hours".to_string()));
        for url in [
            "https://x.example/",
            "https://x.example/hours",
            "https://x.example/contact",
        ] {
            assert!(enrichment.sources.iter().any(|s| s == url), "missing {url}");
        }
        assert!(enrichment.hours_last_updated.is_some());
    }

    #[test]
    fn duplicate_ranges_are_not_repeated() {
        let a = page(PageType::Hours, "https://x.example/hours", Some("Mon 09:00 - 17:00"));
        let b = page(PageType::Contact, "https://x.example/contact", Some("Mon 09:00 - 17:00"));
        let (enrichment, _) = build_enrichment("P1", &[a, b], &HashMap::new(), Utc::now());
        assert_eq!(enrichment.hours.unwrap().get("mon").unwrap().len(), 1);
    }

    #[test]
    fn contact_subfields_first_writer_wins_social_unions() {
        let contact_page = page(
            PageType::Contact,
            "https://x.example/contact",
            Some("Call +44 1234 567890"),
        );
        let mut schema = HashMap::new();
        schema.insert(
            "https://x.example/contact".to_string(),
            ExtractedFacts {
                contact_details: Some(ContactDetails {
                    phone: Some("+44 9999 000000".into()),
                    email: Some("info@x.example".into()),
                    website: None,
                    social: vec!["https://social.example/x".into()],
                }),
                ..Default::default()
            },
        );

        let (enrichment, updated) =
            build_enrichment("P1", &[contact_page], &schema, Utc::now());
        let contact = enrichment.contact_details.unwrap();
        // The heuristic pass wrote the phone first; schema does not displace it.
        assert_eq!(contact.phone.as_deref(), Some("+441234567890"));
        assert_eq!(contact.email.as_deref(), Some("info@x.example"));
        assert_eq!(contact.social, vec!["https://social.example/x"]);
        assert!(updated.contains(&"contact_details".to_string()));
    }

    #[test]
    fn scalars_first_writer_wins_by_page_priority() {
        let menu = page(PageType::Menu, "https://x.example/menu", Some("Mains £18"));
        let home = page(
            PageType::Homepage,
            "https://x.example/",
            Some("Price range: $$$$"),
        );
        // Input order reversed on purpose: priority sorting must still put
        // the dedicated menu page first.
        let (enrichment, _) = build_enrichment("P1", &[home, menu], &HashMap::new(), Utc::now());
        assert_eq!(enrichment.menu_url.as_deref(), Some("https://x.example/menu"));
        assert_eq!(enrichment.price_range.as_deref(), Some("££"));
    }

    #[test]
    fn amenities_and_fees_share_the_features_timestamp() {
        let mut schema = HashMap::new();
        schema.insert(
            "https://x.example/".to_string(),
            ExtractedFacts {
                amenities: vec!["Wifi".into(), "Terrace".into()],
                fees: Some("Adult: GBP 12".into()),
                ..Default::default()
            },
        );
        let home = page(PageType::Homepage, "https://x.example/", None);
        let now = Utc::now();
        let (enrichment, updated) = build_enrichment("P1", &[home], &schema, now);
        assert_eq!(enrichment.amenities, vec!["Terrace", "Wifi"]);
        assert_eq!(enrichment.fees.as_deref(), Some("Adult: GBP 12"));
        assert_eq!(enrichment.features_last_updated, Some(now));
        assert!(enrichment.hours_last_updated.is_none());
        assert_eq!(updated, vec!["amenities", "fees"]);
    }

    #[test]
    fn no_facts_means_no_updates() {
        let home = page(PageType::Homepage, "https://x.example/", None);
        let (enrichment, updated) =
            build_enrichment("P1", &[home], &HashMap::new(), Utc::now());
        assert!(updated.is_empty());
        assert!(enrichment.present_fields().is_empty());
        assert!(enrichment.sources.is_empty());
    }

    #[test]
    fn merge_is_deterministic() {
        let pages = vec![
            page(PageType::Homepage, "https://x.example/", Some("Mon 09:00 - 17:00\nA cosy corner bistro with seasonal plates and a small natural wine list.")),
            page(PageType::Hours, "https://x.example/hours", Some("Tue 10:00 - 18:00")),
        ];
        let (a, ua) = build_enrichment("P1", &pages, &HashMap::new(), Utc::now());
        let (b, ub) = build_enrichment("P1", &pages, &HashMap::new(), Utc::now());
        assert_eq!(ua, ub);
        assert_eq!(a.hours, b.hours);
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.description, b.description);
    }
}
