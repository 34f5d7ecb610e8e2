use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use placecrawl_core::{CandidateLink, PageType};

// Signal keywords per target type, multilingual (en/fr/es/it/de/nl/pl/pt).
// URL-path hits weigh more than anchor-text hits.
const KW_HOURS: &[&str] = &[
    "hours",
    "opening",
    "open",
    "times",
    "today",
    "heures",
    "horaires",
    "horario",
    "abierto",
    "orari",
    "apertura",
    "öffnungszeiten",
    "geöffnet",
    "openingstijden",
    "uur",
    "godziny",
    "otwarte",
    "horário",
];
const KW_MENU: &[&str] = &[
    "menu",
    "food",
    "drink",
    "drinks",
    "lunch",
    "dinner",
    "menú",
    "carta",
    "carte",
    "speisekarte",
    "menù",
    "cucina",
    "menukaart",
    "cardápio",
    "ementa",
];
const KW_CONTACT: &[&str] = &[
    "contact",
    "contact-us",
    "get-in-touch",
    "enquiries",
    "inquiries",
    "kontakt",
    "contatto",
    "contacto",
    "contattarci",
    "kontaktieren",
    "impressum",
];
const KW_ABOUT: &[&str] = &[
    "about",
    "about-us",
    "our-story",
    "who-we-are",
    "a-propos",
    "über",
    "chi-siamo",
    "sobre",
    "sobre-nosotros",
    "over-ons",
    "o-nas",
];
const KW_FEES: &[&str] = &[
    "fees",
    "tickets",
    "pricing",
    "prices",
    "admission",
    "visit",
    "tarifs",
    "billets",
    "prezzi",
    "biglietti",
    "precios",
    "entradas",
    "preise",
    "cennik",
    "bilety",
    "preços",
];

// Any of these disqualifies a candidate outright.
const NEG_KW: &[&str] = &[
    "privacy",
    "terms",
    "cookies",
    "careers",
    "jobs",
    "press",
    "news",
    "login",
    "signin",
    "account",
    "admin",
    "wp-admin",
    "cart",
    "checkout",
    "partners",
    "media",
    "newsletter",
    "blog",
    "events",
    "gift-card",
];

const URL_TOKEN_WEIGHT: f64 = 0.6;
const ANCHOR_TOKEN_WEIGHT: f64 = 0.4;
const SECTION_BOOST_CAP: f64 = 0.3;

static DOC_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(pdf|docx?|xlsx?|zip|rar|7z)(\?|$)").unwrap());
static A_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

fn keywords(page_type: PageType) -> &'static [&'static str] {
    match page_type {
        PageType::Hours => KW_HOURS,
        PageType::Menu => KW_MENU,
        PageType::Contact => KW_CONTACT,
        PageType::About => KW_ABOUT,
        PageType::Fees => KW_FEES,
        PageType::Homepage | PageType::Other => &[],
    }
}

/// Registrable domain (eTLD+1) of a URL's host, lowercased. Falls back to
/// the bare host for hosts the public suffix list doesn't cover.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match psl::domain_str(&host) {
        Some(d) => Some(d.to_string()),
        None => Some(host),
    }
}

/// Two URLs are same-site when both are http(s) and share a registrable
/// domain.
pub fn is_same_site(base: &Url, target: &Url) -> bool {
    if !matches!(target.scheme(), "http" | "https") {
        return false;
    }
    match (registrable_domain(base), registrable_domain(target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Drop the fragment and common tracking query parameters.
pub fn normalize_url(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);

    let kept: Vec<(String, String)> = out
        .query_pairs()
        .filter(|(key, _)| {
            let k = key.to_lowercase();
            !k.starts_with("utm_")
                && k != "fbclid"
                && k != "gclid"
                && k != "mc_eid"
                && k != "mc_cid"
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    {
        let mut pairs = out.query_pairs_mut();
        pairs.clear();
        if !kept.is_empty() {
            pairs.extend_pairs(kept);
        }
    }
    if out.query().unwrap_or_default().is_empty() {
        out.set_query(None);
    }
    out
}

/// Whole-token match of `tok` in a URL path: the surrounding characters
/// must be non-alphanumeric (or the string edge), so "open" does not match
/// "reopening".
fn has_url_token(path: &str, tok: &str) -> bool {
    let path = path.as_bytes();
    let tok_b = tok.as_bytes();
    let mut start = 0;
    while let Some(pos) = find_from(path, tok_b, start) {
        let before_ok = pos == 0 || !path[pos - 1].is_ascii_alphanumeric();
        let end = pos + tok_b.len();
        let after_ok = end == path.len() || !path[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = pos + 1;
    }
    false
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn contains_any(text: &str, toks: &[&str]) -> bool {
    toks.iter().any(|tok| text.contains(tok))
}

/// Score a link against every target type from its URL path and anchor
/// text. Returns the winning type, its clamped score and the matched
/// signals, or None when nothing scores or a negative keyword hits.
pub fn classify(path: &str, anchor_text: &str) -> Option<(PageType, f64, String)> {
    let path_l = path.to_lowercase();
    let text_l = anchor_text.to_lowercase();

    if contains_any(&path_l, NEG_KW) || contains_any(&text_l, NEG_KW) {
        return None;
    }

    let mut best: Option<(PageType, f64, Vec<String>)> = None;
    for page_type in PageType::TARGET_ORDER {
        let mut score = 0.0;
        let mut signals: Vec<String> = Vec::new();
        for tok in keywords(page_type) {
            if has_url_token(&path_l, tok) {
                score += URL_TOKEN_WEIGHT;
                signals.push(format!("url:{tok}"));
            }
        }
        for tok in keywords(page_type) {
            if text_l.contains(tok) {
                score += ANCHOR_TOKEN_WEIGHT;
                signals.push(format!("text:{tok}"));
            }
        }
        // Strict priority order: a later type must score strictly higher.
        if score > best.as_ref().map(|(_, s, _)| *s).unwrap_or(0.0) {
            best = Some((page_type, score, signals));
        }
    }

    best.map(|(page_type, score, signals)| {
        let joined = signals
            .iter()
            .take(4)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        (page_type, score.min(1.0), joined)
    })
}

/// Additive boost when the link sits under navigation, header or footer
/// chrome. Bounded walk, capped.
fn section_weight(a: ElementRef) -> f64 {
    let mut weight: f64 = 0.0;
    for ancestor in a.ancestors().filter_map(ElementRef::wrap) {
        let name = ancestor.value().name().to_lowercase();
        let classes = ancestor.value().attr("class").unwrap_or_default();
        let id = ancestor.value().attr("id").unwrap_or_default();
        let blob = format!("{name} {classes} {id}").to_lowercase();

        if name.contains("nav") || name.contains("header") {
            weight += 0.15;
        }
        if name.contains("footer") {
            weight += 0.05;
        }
        if ["menu", "main-nav", "site-nav", "top-bar", "masthead"]
            .iter()
            .any(|k| blob.contains(k))
        {
            weight += 0.1;
        }
        if name == "body" || name == "main" || blob.len() > 300 {
            break;
        }
    }
    weight.min(SECTION_BOOST_CAP)
}

pub struct LinkFinder;

impl Default for LinkFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkFinder {
    pub fn new() -> Self {
        Self
    }

    /// Parse homepage HTML and return up to `max_targets` same-site links,
    /// the best candidate per type, emitted in strict priority order:
    /// hours > menu > contact > about > fees.
    pub fn discover_targets(
        &self,
        html: &str,
        base_url: &Url,
        max_targets: usize,
    ) -> Vec<CandidateLink> {
        let document = Html::parse_document(html);

        let mut by_type: HashMap<PageType, Vec<CandidateLink>> = HashMap::new();
        let mut seen: Vec<String> = Vec::new();

        for a in document.select(&A_SEL) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            if href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
                || href.starts_with('#')
                || href == "/"
            {
                continue;
            }

            let Ok(resolved) = base_url.join(href) else {
                continue;
            };
            if !is_same_site(base_url, &resolved) {
                continue;
            }

            let normalized = normalize_url(&resolved);
            let norm_str = normalized.to_string();
            if DOC_EXT_RE.is_match(&norm_str) {
                continue;
            }
            if seen.contains(&norm_str) {
                continue;
            }
            seen.push(norm_str.clone());

            let anchor_text = a
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            let Some((page_type, score, signals)) = classify(normalized.path(), &anchor_text)
            else {
                continue;
            };

            let score = (score + section_weight(a)).min(1.0);
            by_type.entry(page_type).or_default().push(CandidateLink {
                url: norm_str,
                page_type,
                confidence: (score * 1000.0).round() / 1000.0,
                anchor_text,
                signals,
            });
        }

        // Best candidate per type: highest score, shorter URL on ties.
        let mut results = Vec::new();
        for page_type in PageType::TARGET_ORDER {
            let Some(cands) = by_type.get_mut(&page_type) else {
                continue;
            };
            cands.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.url.len().cmp(&b.url.len()))
            });
            results.push(cands[0].clone());
            if results.len() >= max_targets {
                break;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://demo-bistro.example/").unwrap()
    }

    #[test]
    fn same_site_requires_matching_registrable_domain() {
        let b = base();
        assert!(is_same_site(
            &b,
            &Url::parse("https://www.demo-bistro.example/menu").unwrap()
        ));
        assert!(!is_same_site(
            &b,
            &Url::parse("https://other.example/menu").unwrap()
        ));
        assert!(!is_same_site(
            &b,
            &Url::parse("ftp://demo-bistro.example/menu").unwrap()
        ));
    }

    #[test]
    fn same_site_uses_etld_plus_one() {
        let b = Url::parse("https://shop.example.co.uk/").unwrap();
        assert!(is_same_site(
            &b,
            &Url::parse("https://www.example.co.uk/hours").unwrap()
        ));
        assert!(!is_same_site(
            &b,
            &Url::parse("https://example.org.uk/hours").unwrap()
        ));
    }

    #[test]
    fn tracking_params_and_fragments_are_stripped() {
        let url =
            Url::parse("https://x.example/menu?utm_source=a&gclid=1&page=2#section").unwrap();
        assert_eq!(
            normalize_url(&url).to_string(),
            "https://x.example/menu?page=2"
        );
    }

    #[test]
    fn url_tokens_match_whole_words_only() {
        assert!(has_url_token("/opening-hours/", "hours"));
        assert!(has_url_token("/menu", "menu"));
        assert!(!has_url_token("/reopening", "open"));
        assert!(!has_url_token("/menus-of-the-world", "menu"));
    }

    #[test]
    fn negative_keywords_disqualify() {
        assert!(classify("/privacy", "our hours").is_none());
        assert!(classify("/menu", "blog about food").is_none());
    }

    #[test]
    fn url_signal_outweighs_anchor_signal() {
        let (t_url, s_url, _) = classify("/menu", "").unwrap();
        let (t_text, s_text, _) = classify("/page", "menu").unwrap();
        assert_eq!(t_url, PageType::Menu);
        assert_eq!(t_text, PageType::Menu);
        assert!(s_url > s_text);
    }

    #[test]
    fn discovers_targets_in_priority_order() {
        let html = r#"
            <html><body><nav>
                <a href="/contact">Contact</a>
                <a href="/menu">Menu</a>
                <a href="/opening-hours">Opening hours</a>
                <a href="/about">About us</a>
            </nav></body></html>
        "#;
        let finder = LinkFinder::new();
        let targets = finder.discover_targets(html, &base(), 3);
        let types: Vec<PageType> = targets.iter().map(|c| c.page_type).collect();
        assert_eq!(types, vec![PageType::Hours, PageType::Menu, PageType::Contact]);
        assert!(targets.iter().all(|c| c.confidence > 0.0 && c.confidence <= 1.0));
    }

    #[test]
    fn off_site_and_document_links_are_dropped() {
        let html = r#"
            <html><body>
                <a href="https://elsewhere.example/menu">Menu</a>
                <a href="/menu.pdf">Menu PDF</a>
                <a href="mailto:info@demo-bistro.example">Mail</a>
            </body></html>
        "#;
        let finder = LinkFinder::new();
        assert!(finder.discover_targets(html, &base(), 3).is_empty());
    }

    #[test]
    fn ties_break_on_shorter_url() {
        let html = r#"
            <html><body>
                <a href="/menus/dinner">menu</a>
                <a href="/menu">menu</a>
            </body></html>
        "#;
        let finder = LinkFinder::new();
        let targets = finder.discover_targets(html, &base(), 3);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://demo-bistro.example/menu");
    }
}
