use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

use placecrawl_core::{ContactDetails, ExtractedFacts, HoursMap};

static JSONLD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Lift embedded schema.org JSON-LD blocks into normalized venue facts.
/// Blocks without an `@type` are ignored; `@graph` containers are
/// unwrapped. Later blocks fill holes left by earlier ones; hours and
/// social profiles merge across blocks.
pub fn parse_schema_org(html: &str) -> ExtractedFacts {
    let mut out = ExtractedFacts::default();
    let mut social: Vec<String> = Vec::new();

    for block in collect_jsonld(html) {
        if types_of(&block).is_empty() {
            continue;
        }

        // Contact
        let tel = str_field(&block, "telephone").or_else(|| str_field(&block, "tel"));
        let email = str_field(&block, "email");
        let website = str_field(&block, "url");
        let same_as: Vec<String> = coerce_list(block.get("sameAs"))
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if tel.is_some() || email.is_some() || website.is_some() || !same_as.is_empty() {
            let contact = out.contact_details.get_or_insert_with(ContactDetails::default);
            if let Some(t) = tel {
                contact.phone = Some(t);
            }
            if let Some(e) = email {
                contact.email = Some(e);
            }
            if let Some(w) = website {
                contact.website = Some(w);
            }
            for s in same_as {
                social.push(s);
            }
        }

        // Description (short blurbs are navigation noise, not descriptions)
        if let Some(desc) = str_field(&block, "description") {
            if desc.chars().count() >= 30 {
                out.description = Some(desc);
            }
        }

        // Price range, e.g. "$$"
        if let Some(pr) = str_field(&block, "priceRange") {
            out.price_range = Some(pr);
        }

        // Menu: plain URL string or an object carrying one
        let menu = block.get("menu").or_else(|| block.get("hasMenu"));
        match menu {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                out.menu_url = Some(s.trim().to_string());
            }
            Some(Value::Object(m)) => {
                if let Some(u) = m.get("url").and_then(|v| v.as_str()) {
                    if !u.trim().is_empty() {
                        out.menu_url = Some(u.trim().to_string());
                    }
                }
            }
            _ => {}
        }

        // Opening hours
        let specs = coerce_list(block.get("openingHoursSpecification"));
        let hours = parse_hours(&specs);
        if !hours.is_empty() {
            let merged = out.hours.get_or_insert_with(HoursMap::new);
            for (day, ranges) in hours {
                let entry = merged.entry(day).or_default();
                for r in ranges {
                    if !entry.contains(&r) {
                        entry.push(r);
                    }
                }
            }
        }

        // Amenities
        let feats = coerce_list(block.get("amenityFeature"));
        let names = parse_amenities(&feats);
        if !names.is_empty() {
            let mut all = out.amenities.clone();
            all.extend(names);
            all.sort();
            all.dedup();
            out.amenities = all;
        }

        // Offers / fees
        let offers = block.get("offers").or_else(|| block.get("aggregateOffer"));
        if let Some(fees) = parse_offers(offers) {
            out.fees = Some(fees);
        }
    }

    if !social.is_empty() {
        let contact = out.contact_details.get_or_insert_with(ContactDetails::default);
        for s in social {
            if !contact.social.contains(&s) {
                contact.social.push(s);
            }
        }
    }

    out
}

fn collect_jsonld(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut blocks = Vec::new();
    for script in document.select(&JSONLD_SEL) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        for item in coerce_list(Some(&data)) {
            if let Value::Object(_) = item {
                // Unwrap @graph containers into their member blocks.
                if let Some(graph) = item.get("@graph").and_then(|g| g.as_array()) {
                    blocks.extend(graph.iter().filter(|v| v.is_object()).cloned());
                } else {
                    blocks.push(item.clone());
                }
            }
        }
    }
    blocks
}

fn coerce_list(v: Option<&Value>) -> Vec<Value> {
    match v {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn types_of(block: &Value) -> Vec<String> {
    coerce_list(block.get("@type"))
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_lowercase())
        .collect()
}

fn str_field(block: &Value, key: &str) -> Option<String> {
    block
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalize a time into zero-padded `HH:MM`. Accepts `H:MM`, `HH:MM`,
/// `HHMM`, `H.MM` and `H h MM`.
pub fn ensure_hhmm(s: &str) -> Option<String> {
    let mut t: String = s
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    t = t.replace(['.', 'h'], ":");
    if !t.contains(':') && (t.len() == 3 || t.len() == 4) {
        t.insert(t.len() - 2, ':');
    }
    let (hh, mm) = t.split_once(':')?;
    let h: u32 = hh.parse().ok()?;
    let m: u32 = mm.parse().ok()?;
    if h <= 23 && m <= 59 {
        Some(format!("{h:02}:{m:02}"))
    } else {
        None
    }
}

/// Normalize a day-of-week value into `mon`..`sun`. Accepts full names,
/// abbreviations and schema.org URIs.
pub fn norm_day(v: &Value) -> Option<&'static str> {
    let raw = match v {
        Value::String(s) => s.as_str(),
        Value::Object(m) => {
            let is_day = m
                .get("@type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| t.eq_ignore_ascii_case("dayofweek"));
            if !is_day {
                return None;
            }
            m.get("name")?.as_str()?
        }
        _ => return None,
    };
    let key = raw
        .trim()
        .to_lowercase()
        .replace("http://schema.org/", "")
        .replace("https://schema.org/", "");
    let key = key.rsplit('/').next().unwrap_or(&key);
    match key {
        "monday" | "mon" | "mo" => Some("mon"),
        "tuesday" | "tue" | "tu" => Some("tue"),
        "wednesday" | "wed" | "we" => Some("wed"),
        "thursday" | "thu" | "th" => Some("thu"),
        "friday" | "fri" | "fr" => Some("fri"),
        "saturday" | "sat" | "sa" => Some("sat"),
        "sunday" | "sun" | "su" => Some("sun"),
        _ => None,
    }
}

fn parse_hours(specs: &[Value]) -> HoursMap {
    let mut out = HoursMap::new();
    for item in specs {
        let Value::Object(_) = item else { continue };
        let opens = item
            .get("opens")
            .and_then(|v| v.as_str())
            .and_then(ensure_hhmm);
        let closes = item
            .get("closes")
            .and_then(|v| v.as_str())
            .and_then(ensure_hhmm);
        let (Some(opens), Some(closes)) = (opens, closes) else {
            continue;
        };
        for day in coerce_list(item.get("dayOfWeek")) {
            if let Some(d) = norm_day(&day) {
                let entry = out.entry(d.to_string()).or_default();
                let range = (opens.clone(), closes.clone());
                if !entry.contains(&range) {
                    entry.push(range);
                }
            }
        }
    }
    out
}

fn parse_amenities(feats: &[Value]) -> Vec<String> {
    let mut names = Vec::new();
    for f in feats {
        let Value::Object(m) = f else { continue };
        let name = m
            .get("name")
            .or_else(|| m.get("propertyID"))
            .or_else(|| m.get("description"))
            .and_then(|v| v.as_str())
            .map(str::trim);
        if let Some(n) = name {
            if !n.is_empty() && !names.contains(&n.to_string()) {
                names.push(n.to_string());
            }
        }
    }
    names
}

fn parse_offers(offers: Option<&Value>) -> Option<String> {
    let mut parts = Vec::new();
    for o in coerce_list(offers) {
        let Value::Object(m) = &o else { continue };
        let price = m
            .get("price")
            .or_else(|| m.get("lowPrice"))
            .map(value_to_compact_string)
            .filter(|s| !s.is_empty());
        let currency = m
            .get("priceCurrency")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let category = m
            .get("category")
            .or_else(|| m.get("name"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let (Some(price), Some(currency)) = (price, currency) {
            let frag = match category {
                Some(cat) => format!("{cat}: {currency} {price}"),
                None => format!("{currency} {price}"),
            };
            parts.push(frag);
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn value_to_compact_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_normalization_accepts_the_common_shapes() {
        assert_eq!(ensure_hhmm("9:00").as_deref(), Some("09:00"));
        assert_eq!(ensure_hhmm("09:00").as_deref(), Some("09:00"));
        assert_eq!(ensure_hhmm("0900").as_deref(), Some("09:00"));
        assert_eq!(ensure_hhmm("930").as_deref(), Some("09:30"));
        assert_eq!(ensure_hhmm("9.30").as_deref(), Some("09:30"));
        assert_eq!(ensure_hhmm("9 h 30").as_deref(), Some("09:30"));
        assert_eq!(ensure_hhmm("23:59").as_deref(), Some("23:59"));
        assert_eq!(ensure_hhmm("24:00"), None);
        assert_eq!(ensure_hhmm("9:75"), None);
        assert_eq!(ensure_hhmm("noon"), None);
    }

    #[test]
    fn day_normalization_accepts_names_abbreviations_and_uris() {
        assert_eq!(norm_day(&Value::String("Monday".into())), Some("mon"));
        assert_eq!(norm_day(&Value::String("tue".into())), Some("tue"));
        assert_eq!(
            norm_day(&Value::String("https://schema.org/Saturday".into())),
            Some("sat")
        );
        assert_eq!(
            norm_day(&Value::String("http://schema.org/Sunday".into())),
            Some("sun")
        );
        assert_eq!(norm_day(&Value::String("Funday".into())), None);
    }

    #[test]
    fn lifts_local_business_block() {
        let html = r#"<html><head><script type="application/ld+json">
        {
            "@context": "https://schema.org",
            "@type": "Restaurant",
            "name": "Demo Bistro",
            "telephone": "+44 1234 567890",
            "email": "info@demo-bistro.example",
            "url": "https://demo-bistro.example/",
            "sameAs": ["https://social.example/demobistro", "https://social.example/demobistro"],
            "description": "A neighbourhood bistro serving seasonal plates all week.",
            "priceRange": "$$",
            "hasMenu": {"url": "https://demo-bistro.example/menu"},
            "openingHoursSpecification": [
                {"dayOfWeek": ["Monday", "Tuesday"], "opens": "12:00", "closes": "22:00"}
            ],
            "amenityFeature": [{"name": "Terrace"}, {"name": "Wifi"}]
        }
        </script></head><body></body></html>"#;

        let facts = parse_schema_org(html);
        let contact = facts.contact_details.unwrap();
        assert_eq!(contact.phone.as_deref(), Some("+44 1234 567890"));
        assert_eq!(contact.email.as_deref(), Some("info@demo-bistro.example"));
        assert_eq!(contact.social, vec!["https://social.example/demobistro"]);
        assert_eq!(facts.price_range.as_deref(), Some("$$"));
        assert_eq!(
            facts.menu_url.as_deref(),
            Some("https://demo-bistro.example/menu")
        );
        assert_eq!(facts.amenities, vec!["Terrace", "Wifi"]);
        let hours = facts.hours.unwrap();
        assert_eq!(
            hours.get("mon").unwrap(),
            &vec![("12:00".to_string(), "22:00".to_string())]
        );
        assert_eq!(
            hours.get("tue").unwrap(),
            &vec![("12:00".to_string(), "22:00".to_string())]
        );
        assert!(facts.description.unwrap().starts_with("A neighbourhood"));
    }

    #[test]
    fn unwraps_graph_containers() {
        let html = r#"<html><body><script type="application/ld+json">
        {"@graph": [
            {"@type": "LocalBusiness", "priceRange": "€€"},
            {"@type": "WebSite", "url": "https://x.example/"}
        ]}
        </script></body></html>"#;
        let facts = parse_schema_org(html);
        assert_eq!(facts.price_range.as_deref(), Some("€€"));
        assert_eq!(
            facts.contact_details.unwrap().website.as_deref(),
            Some("https://x.example/")
        );
    }

    #[test]
    fn untyped_blocks_and_invalid_json_are_ignored() {
        let html = r#"<html><body>
        <script type="application/ld+json">{"name": "no type"}</script>
        <script type="application/ld+json">{not json at all</script>
        </body></html>"#;
        assert!(parse_schema_org(html).is_empty());
    }

    #[test]
    fn offers_format_category_currency_price() {
        let html = r#"<html><body><script type="application/ld+json">
        {"@type": "TouristAttraction", "offers": [
            {"category": "Adult", "priceCurrency": "GBP", "price": "12"},
            {"category": "Child", "priceCurrency": "GBP", "price": 6}
        ]}
        </script></body></html>"#;
        let facts = parse_schema_org(html);
        assert_eq!(facts.fees.as_deref(), Some("Adult: GBP 12; Child: GBP 6"));
    }

    #[test]
    fn short_descriptions_are_ignored() {
        let html = r#"<html><body><script type="application/ld+json">
        {"@type": "Cafe", "description": "Nice cafe"}
        </script></body></html>"#;
        assert!(parse_schema_org(html).description.is_none());
    }
}
