use once_cell::sync::Lazy;
use regex::Regex;

use placecrawl_core::{ContactDetails, ExtractedFacts, HoursMap, PageRecord, PageType};

use crate::schema_org::ensure_hhmm;

static DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(mon(?:day)?|tue(?:s(?:day)?)?|wed(?:nesday)?|thu(?:rs(?:day)?)?|fri(?:day)?|sat(?:urday)?|sun(?:day)?)\b",
    )
    .unwrap()
});

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2}[:.h]?\d{2})\s*(?:–|—|-|to|till|until)\s*(\d{1,2}[:.h]?\d{2})")
        .unwrap()
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}").unwrap());

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d[\d\-\s()]{6,}\d").unwrap());

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([€£$])\s?(\d+(?:[.,]\d{1,2})?)").unwrap());

static PRICE_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)price\s*range\s*[:\-]\s*([€£$]{1,4})").unwrap());

/// Regex pass over a page's cleaned text. What gets extracted depends on
/// the page type: hours only on pages likely to carry them, menu URL and
/// price bucketing only on menu pages, fee lines on fee-ish pages.
pub fn extract_facts(page: &PageRecord) -> ExtractedFacts {
    let mut out = ExtractedFacts::default();
    let text = page.cleaned_text.as_deref().unwrap_or("").trim();
    let ptype = page.page_type;

    if text.is_empty() {
        // A menu page with no usable text still pins down the menu URL.
        if ptype == PageType::Menu && !page.final_url.is_empty() {
            out.menu_url = Some(page.final_url.clone());
        }
        return out;
    }

    // Contact
    if let Some(m) = EMAIL_RE.find(text) {
        out.contact_details
            .get_or_insert_with(ContactDetails::default)
            .email = Some(m.as_str().to_string());
    }
    if let Some(m) = PHONE_RE.find(text) {
        let digits: String = m
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if digits.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
            out.contact_details
                .get_or_insert_with(ContactDetails::default)
                .phone = Some(digits);
        }
    }

    // Hours, on pages where they plausibly live
    if matches!(
        ptype,
        PageType::Hours | PageType::Contact | PageType::About | PageType::Homepage
    ) {
        let hours = extract_hours(text);
        if !hours.is_empty() {
            out.hours = Some(hours);
        }
    }

    // Fees, on fee-ish pages: the shortest line with a currency mark
    if matches!(ptype, PageType::Fees | PageType::About | PageType::Homepage) {
        if let Some(line) = text
            .lines()
            .filter(|ln| CURRENCY_RE.is_match(ln))
            .min_by_key(|ln| ln.len())
        {
            out.fees = Some(line.trim().chars().take(200).collect());
        }
    }

    // Menu page: the page itself is the menu URL, and its prices hint at a
    // price band
    if ptype == PageType::Menu {
        out.menu_url = Some(page.final_url.clone());
        if let Some(pr) = price_range_from_text(text) {
            out.price_range = Some(pr);
        }
    }

    // Description fallback: first line of readable length
    if out.description.is_none() {
        for ln in text.lines() {
            let t = ln.trim();
            let len = t.chars().count();
            if (60..=300).contains(&len) {
                out.description = Some(t.to_string());
                break;
            }
        }
    }

    out
}

/// Scan lines for a weekday token plus one or more `HH:MM - HH:MM` ranges;
/// every range on a line is attributed to the first weekday on that line.
fn extract_hours(text: &str) -> HoursMap {
    let mut out = HoursMap::new();
    for ln in text.lines() {
        let ln = ln.trim();
        if ln.is_empty() {
            continue;
        }
        let Some(day_match) = DAY_RE.find(ln) else {
            continue;
        };
        let day: String = day_match.as_str().to_lowercase().chars().take(3).collect();
        for caps in RANGE_RE.captures_iter(ln) {
            let open = ensure_hhmm(&caps[1]);
            let close = ensure_hhmm(&caps[2]);
            let (Some(open), Some(close)) = (open, close) else {
                continue;
            };
            let entry = out.entry(day.clone()).or_default();
            let range = (open, close);
            if !entry.contains(&range) {
                entry.push(range);
            }
        }
    }
    out
}

/// Explicit "price range: $$" pattern first, else bucketize the mean of
/// currency-prefixed amounts into one to four symbols.
fn price_range_from_text(text: &str) -> Option<String> {
    if let Some(caps) = PRICE_SYMBOL_RE.captures(text) {
        return Some(caps[1].to_string());
    }

    let mut symbol: Option<String> = None;
    let mut values: Vec<f64> = Vec::new();
    for caps in CURRENCY_RE.captures_iter(text) {
        if symbol.is_none() {
            symbol = Some(caps[1].to_string());
        }
        if let Ok(v) = caps[2].replace(',', ".").parse::<f64>() {
            if !values.contains(&v) {
                values.push(v);
            }
        }
    }
    let symbol = symbol?;
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let repeat = if avg < 10.0 {
        1
    } else if avg < 25.0 {
        2
    } else if avg < 45.0 {
        3
    } else {
        4
    };
    Some(symbol.repeat(repeat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use placecrawl_core::{ReasonCode, SourceMethod};

    fn page(page_type: PageType, text: &str) -> PageRecord {
        PageRecord {
            place_id: Some("P1".into()),
            url: "https://demo-bistro.example/x".into(),
            final_url: "https://demo-bistro.example/x".into(),
            page_type,
            fetched_at: Utc::now(),
            valid_until: None,
            http_status: 200,
            content_type: Some("text/html".into()),
            content_hash: None,
            cleaned_text: Some(text.to_string()),
            size_bytes: text.len(),
            source_method: SourceMethod::Heuristic,
            redirect_chain: Vec::new(),
            reason: ReasonCode::Ok,
            duration_ms: 10,
            first_byte_ms: 5,
            raw_html: None,
        }
    }

    #[test]
    fn extracts_hours_lines_per_first_weekday() {
        let text = "Opening times\nMonday 09:00 - 17:00\nSat 11.00 to 15.00\nClosed Sundays";
        let facts = extract_facts(&page(PageType::Hours, text));
        let hours = facts.hours.unwrap();
        assert_eq!(
            hours.get("mon").unwrap(),
            &vec![("09:00".to_string(), "17:00".to_string())]
        );
        assert_eq!(
            hours.get("sat").unwrap(),
            &vec![("11:00".to_string(), "15:00".to_string())]
        );
        assert!(!hours.contains_key("sun"));
    }

    #[test]
    fn multiple_ranges_on_one_line_go_to_the_first_day() {
        let text = "Fri 12:00 - 14:30 18:00 - 22:00";
        let facts = extract_facts(&page(PageType::Contact, text));
        let hours = facts.hours.unwrap();
        assert_eq!(hours.get("fri").unwrap().len(), 2);
    }

    #[test]
    fn no_hours_from_menu_pages() {
        let text = "Mon 09:00 - 17:00";
        let facts = extract_facts(&page(PageType::Menu, text));
        assert!(facts.hours.is_none());
    }

    #[test]
    fn phone_requires_seven_digits() {
        let facts = extract_facts(&page(PageType::Contact, "Call +44 1234 567890 today"));
        assert_eq!(
            facts.contact_details.unwrap().phone.as_deref(),
            Some("+441234567890")
        );

        let too_short = extract_facts(&page(PageType::Contact, "Room 12-34 56"));
        assert!(too_short
            .contact_details
            .map(|c| c.phone.is_none())
            .unwrap_or(true));
    }

    #[test]
    fn email_is_extracted() {
        let facts = extract_facts(&page(PageType::Contact, "Write to info@demo-bistro.example"));
        assert_eq!(
            facts.contact_details.unwrap().email.as_deref(),
            Some("info@demo-bistro.example")
        );
    }

    #[test]
    fn menu_page_sets_menu_url_and_price_band() {
        let text = "Starters £6\nMains £18\nDesserts £8";
        let facts = extract_facts(&page(PageType::Menu, text));
        assert_eq!(
            facts.menu_url.as_deref(),
            Some("https://demo-bistro.example/x")
        );
        // mean of {6, 18, 8} is under 25
        assert_eq!(facts.price_range.as_deref(), Some("££"));
    }

    #[test]
    fn explicit_price_range_wins() {
        let text = "Price range: $$$\nMains $12";
        let facts = extract_facts(&page(PageType::Menu, text));
        assert_eq!(facts.price_range.as_deref(), Some("$$$"));
    }

    #[test]
    fn empty_menu_page_still_pins_menu_url() {
        let mut p = page(PageType::Menu, "");
        p.cleaned_text = None;
        let facts = extract_facts(&p);
        assert_eq!(
            facts.menu_url.as_deref(),
            Some("https://demo-bistro.example/x")
        );
    }

    #[test]
    fn fee_line_is_the_shortest_currency_line() {
        let text = "Our long story about the gardens and the many things you can see for money €1 €2 €3\nAdults €12; Children €6\nNo currency here";
        let facts = extract_facts(&page(PageType::Fees, text));
        assert_eq!(facts.fees.as_deref(), Some("Adults €12; Children €6"));
    }

    #[test]
    fn description_falls_back_to_first_reasonable_line() {
        let text = "Hi\nA neighbourhood bistro serving seasonal plates, natural wine and coffee all week long.";
        let facts = extract_facts(&page(PageType::Homepage, text));
        assert!(facts
            .description
            .unwrap()
            .starts_with("A neighbourhood bistro"));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let text = "Mon 09:00 - 17:00\nCall +44 1234 567890";
        let a = extract_facts(&page(PageType::Hours, text));
        let b = extract_facts(&page(PageType::Hours, text));
        assert_eq!(a, b);
    }
}
