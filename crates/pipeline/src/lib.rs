use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use placecrawl_core::config::{CrawlConfig, FreshnessConfig};
use placecrawl_core::{
    CandidateLink, CrawlResult, FetchedPage, PageRecord, PageType, ReasonCode, SourceMethod,
};
use placecrawl_downloader::Downloader;
use placecrawl_parser::LinkFinder;

pub const DEFAULT_MAX_TARGETS: usize = 3;

// Placeholder pages pass the length gate but carry no facts.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)coming\s+soon|under\s+construction|maintenance\s+mode|site\s+is\s+being\s+built")
        .unwrap()
});

/// Orchestrates one venue crawl: homepage, link discovery, up to three
/// parallel target fetches, all under a single wall-clock budget.
pub struct CrawlPipeline {
    downloader: Arc<Downloader>,
    finder: LinkFinder,
    crawl: CrawlConfig,
    freshness: FreshnessConfig,
}

impl CrawlPipeline {
    pub fn new(
        downloader: Arc<Downloader>,
        crawl: CrawlConfig,
        freshness: FreshnessConfig,
    ) -> Self {
        Self {
            downloader,
            finder: LinkFinder::new(),
            crawl,
            freshness,
        }
    }

    /// Crawl one site. The budget defaults to the configured site budget;
    /// no fetch outlives the resulting deadline.
    pub async fn crawl_site(
        &self,
        base_url: &str,
        place_id: Option<&str>,
        budget: Option<Duration>,
        max_targets: usize,
    ) -> CrawlResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + budget.unwrap_or(self.crawl.site_budget);

        let mut pages: Vec<PageRecord> = Vec::new();

        // Homepage first; raw HTML is needed for link discovery.
        let home_fp = self
            .downloader
            .fetch_url(base_url, Some(deadline), true)
            .await;
        let home_record = self.mk_record(&home_fp, PageType::Homepage, SourceMethod::DirectUrl, place_id);
        let home_reason = home_record.reason;
        debug!(url = base_url, reason = %home_reason, "homepage fetched");

        // Keep the homepage HTML around only when the page itself was good.
        let home_html = if home_reason == ReasonCode::Ok {
            home_fp.raw_html.clone()
        } else {
            None
        };
        pages.push(home_record);

        if home_reason.aborts_site() {
            return self.summarize(base_url, started_at, start, pages);
        }

        let targets: Vec<CandidateLink> = match (&home_html, Url::parse(base_url)) {
            (Some(html), Ok(base)) => self.finder.discover_targets(html, &base, max_targets),
            _ => Vec::new(),
        };
        debug!(url = base_url, count = targets.len(), "targets discovered");

        if targets.is_empty() || Instant::now() >= deadline {
            return self.summarize(base_url, started_at, start, pages);
        }

        // All targets share the site deadline; none gets an extension.
        let fetches = targets.into_iter().map(|cand| {
            let downloader = Arc::clone(&self.downloader);
            async move {
                let fp = downloader.fetch_url(&cand.url, Some(deadline), true).await;
                (cand, fp)
            }
        });
        for (cand, fp) in join_all(fetches).await {
            pages.push(self.mk_record(&fp, cand.page_type, SourceMethod::Heuristic, place_id));
        }

        self.summarize(base_url, started_at, start, pages)
    }

    /// HTTP 200, HTML MIME, enough visible text, not a placeholder page.
    fn passes_quality_gate(&self, fp: &FetchedPage) -> bool {
        if fp.reason != ReasonCode::Ok || fp.http_status != 200 {
            return false;
        }
        if !is_html_mime(fp.content_type.as_deref()) {
            return false;
        }
        let text = fp.cleaned_text.as_deref().unwrap_or("").trim();
        text.chars().count() >= self.crawl.min_visible_chars && !PLACEHOLDER_RE.is_match(text)
    }

    fn mk_record(
        &self,
        fp: &FetchedPage,
        page_type: PageType,
        source_method: SourceMethod,
        place_id: Option<&str>,
    ) -> PageRecord {
        let reason = if self.passes_quality_gate(fp) {
            ReasonCode::Ok
        } else if fp.reason == ReasonCode::Ok {
            // Network-wise fine, content-wise not worth extracting.
            ReasonCode::ThinContent
        } else {
            fp.reason
        };

        let valid_until = (reason == ReasonCode::Ok && fp.cleaned_text.is_some())
            .then(|| fp.fetched_at + self.freshness.ttl_for(page_type));

        PageRecord {
            place_id: place_id.map(String::from),
            url: fp.url.clone(),
            final_url: fp.final_url.clone(),
            page_type,
            fetched_at: fp.fetched_at,
            valid_until,
            http_status: fp.http_status,
            content_type: fp.content_type.clone(),
            content_hash: fp.content_hash.clone(),
            cleaned_text: (reason == ReasonCode::Ok)
                .then(|| fp.cleaned_text.clone())
                .flatten(),
            size_bytes: fp.size_bytes,
            source_method,
            redirect_chain: fp.redirect_chain.clone(),
            reason,
            duration_ms: fp.duration_ms,
            first_byte_ms: fp.first_byte_ms,
            raw_html: (reason == ReasonCode::Ok)
                .then(|| fp.raw_html.clone())
                .flatten(),
        }
    }

    fn summarize(
        &self,
        base_url: &str,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
        pages: Vec<PageRecord>,
    ) -> CrawlResult {
        let mut errors_by_class: HashMap<&'static str, u64> = HashMap::new();
        for p in &pages {
            if p.reason != ReasonCode::Ok {
                *errors_by_class.entry(p.reason.as_str()).or_insert(0) += 1;
            }
        }
        let fetched_count = pages.iter().filter(|p| p.http_status == 200).count();
        let aborted_count = pages.iter().filter(|p| p.reason.is_aborted()).count();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            base_url,
            pages = pages.len(),
            fetched_count,
            aborted_count,
            duration_ms,
            "site crawl finished"
        );
        CrawlResult {
            base_url: base_url.to_string(),
            started_at,
            ended_at: Utc::now(),
            duration_ms,
            pages,
            fetched_count,
            aborted_count,
            errors_by_class,
        }
    }
}

fn is_html_mime(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else { return false };
    let mime = ct.split(';').next().unwrap_or("").trim().to_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_with(crawl: CrawlConfig) -> CrawlPipeline {
        let downloader = Arc::new(Downloader::new(crawl.clone()).unwrap());
        CrawlPipeline::new(downloader, crawl, FreshnessConfig::default())
    }

    fn filler(len: usize) -> String {
        "venue facts and friendly copy ".repeat(len / 30 + 1)
    }

    fn homepage_html(server_url: &str) -> String {
        format!(
            r#"<html><body>
                <nav>
                    <a href="{server_url}/hours">Opening hours</a>
                    <a href="{server_url}/menu">Menu</a>
                    <a href="{server_url}/contact">Contact</a>
                </nav>
                <p>{}</p>
            </body></html>"#,
            filler(300)
        )
    }

    #[tokio::test]
    async fn happy_path_fetches_homepage_and_targets() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(homepage_html(&url))
            .create_async()
            .await;
        let mut target_mocks = Vec::new();
        for path in ["/hours", "/menu", "/contact"] {
            target_mocks.push(
                server
                    .mock("GET", path)
                    .with_status(200)
                    .with_header("content-type", "text/html")
                    .with_body(format!("<html><body><p>{}</p></body></html>", filler(300)))
                    .create_async()
                    .await,
            );
        }

        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(&format!("{url}/"), Some("P1"), None, DEFAULT_MAX_TARGETS)
            .await;

        assert_eq!(result.pages.len(), 4);
        assert_eq!(result.fetched_count, 4);
        assert_eq!(result.aborted_count, 0);
        assert!(result.errors_by_class.is_empty());

        let types: Vec<PageType> = result.pages.iter().map(|p| p.page_type).collect();
        assert_eq!(
            types,
            vec![PageType::Homepage, PageType::Hours, PageType::Menu, PageType::Contact]
        );
        assert_eq!(result.pages[0].source_method, SourceMethod::DirectUrl);
        assert!(result.pages[1..]
            .iter()
            .all(|p| p.source_method == SourceMethod::Heuristic));
        for p in &result.pages {
            assert_eq!(p.reason, ReasonCode::Ok);
            assert!(p.valid_until.is_some());
            assert_eq!(p.place_id.as_deref(), Some("P1"));
        }

        // TTLs follow the page type.
        let hours_page = &result.pages[1];
        assert_eq!(
            hours_page.valid_until.unwrap(),
            hours_page.fetched_at + chrono::Duration::days(3)
        );
        let menu_page = &result.pages[2];
        assert_eq!(
            menu_page.valid_until.unwrap(),
            menu_page.fetched_at + chrono::Duration::days(14)
        );
    }

    #[tokio::test]
    async fn robots_disallow_stops_after_homepage() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /")
            .create_async()
            .await;

        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(&format!("{}/", server.url()), None, None, DEFAULT_MAX_TARGETS)
            .await;

        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].reason, ReasonCode::RobotsDisallowed);
        assert!(result.pages[0].valid_until.is_none());
        assert_eq!(result.errors_by_class.get("robots_disallowed"), Some(&1));
    }

    #[tokio::test]
    async fn thin_homepage_is_flagged_and_ends_discovery() {
        let mut server = mockito::Server::new_async().await;
        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><p>tiny</p></body></html>")
            .create_async()
            .await;

        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(&format!("{}/", server.url()), None, None, DEFAULT_MAX_TARGETS)
            .await;

        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].reason, ReasonCode::ThinContent);
        assert!(result.pages[0].cleaned_text.is_none());
        assert!(result.pages[0].valid_until.is_none());
    }

    #[tokio::test]
    async fn placeholder_homepage_counts_as_thin() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "<html><body><p>Coming soon! {}</p></body></html>",
            filler(300)
        );
        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await;

        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(&format!("{}/", server.url()), None, None, DEFAULT_MAX_TARGETS)
            .await;
        assert_eq!(result.pages[0].reason, ReasonCode::ThinContent);
    }

    #[tokio::test]
    async fn exhausted_budget_yields_single_time_budget_record() {
        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(
                "https://unreachable.invalid/",
                None,
                Some(Duration::from_millis(0)),
                DEFAULT_MAX_TARGETS,
            )
            .await;
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].reason, ReasonCode::TimeBudgetExceeded);
        assert_eq!(result.aborted_count, 1);
    }

    #[tokio::test]
    async fn failed_target_does_not_sink_the_crawl() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(homepage_html(&url))
            .create_async()
            .await;
        let _hours = server
            .mock("GET", "/hours")
            .with_status(404)
            .create_async()
            .await;
        let mut target_mocks = Vec::new();
        for path in ["/menu", "/contact"] {
            target_mocks.push(
                server
                    .mock("GET", path)
                    .with_status(200)
                    .with_header("content-type", "text/html")
                    .with_body(format!("<html><body><p>{}</p></body></html>", filler(300)))
                    .create_async()
                    .await,
            );
        }

        let pipeline = pipeline_with(CrawlConfig::default());
        let result = pipeline
            .crawl_site(&format!("{url}/"), None, None, DEFAULT_MAX_TARGETS)
            .await;

        assert_eq!(result.pages.len(), 4);
        assert_eq!(result.errors_by_class.get("non_200_status"), Some(&1));
        let ok_pages = result
            .pages
            .iter()
            .filter(|p| p.reason == ReasonCode::Ok)
            .count();
        assert_eq!(ok_pages, 3);
    }
}
