mod robots;

pub use robots::RobotsCache;

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use placecrawl_core::config::CrawlConfig;
use placecrawl_core::{CrawlError, FetchedPage, ReasonCode};

const MAX_REDIRECTS: usize = 10;
const MAX_RETRIES: u32 = 2;
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Below this much remaining budget a fetch is not worth starting.
const MIN_BUDGET: Duration = Duration::from_millis(50);

/// Single-URL fetcher with robots.txt compliance, strict phase budgets,
/// size and MIME gating, and reason-coded results. Failures are values,
/// never errors; the only fallible call is construction.
pub struct Downloader {
    client: reqwest::Client,
    config: CrawlConfig,
    robots: RobotsCache,
}

impl Downloader {
    pub fn new(config: CrawlConfig) -> Result<Self, CrawlError> {
        // Redirects are followed by hand so every intermediate URL lands in
        // the redirect chain.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CrawlError::Config(format!("http client: {e}")))?;

        let robots = RobotsCache::new(config.robots_ttl);
        Ok(Self {
            client,
            config,
            robots,
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Fetch one http(s) URL under the configured phase budgets and an
    /// optional absolute deadline shared with the rest of a site crawl.
    pub async fn fetch_url(
        &self,
        url: &str,
        deadline: Option<Instant>,
        include_raw: bool,
    ) -> FetchedPage {
        let started = Instant::now();

        if deadline.is_some_and(|d| started >= d) {
            return FetchedPage::empty(url, ReasonCode::TimeBudgetExceeded);
        }

        let Ok(parsed) = Url::parse(url) else {
            return FetchedPage::empty(url, ReasonCode::NetworkError);
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return FetchedPage::empty(url, ReasonCode::NetworkError);
        }

        // Robots first; a disallow costs no page I/O.
        let robots_timeout = self.config.connect_timeout + self.config.ttfb_timeout;
        let allowed = self
            .robots
            .allowed(
                &self.client,
                &parsed,
                &self.config.user_agent,
                robots_timeout,
                self.config.page_size_limit,
            )
            .await;
        if !allowed {
            return self.mk_page(
                url,
                url,
                0,
                None,
                &[],
                started,
                0,
                ReasonCode::RobotsDisallowed,
                Vec::new(),
            );
        }

        let (connect_budget, ttfb_budget, read_budget) = match self.phase_budgets(deadline) {
            Ok(b) => b,
            Err(reason) => {
                return self.mk_page(url, url, 0, None, &[], started, 0, reason, Vec::new())
            }
        };

        // Retries are for idempotent GETs on transient statuses only; every
        // attempt counts against the same deadline.
        let mut attempt: u32 = 0;
        let (resp, redirect_chain) = loop {
            match self
                .send_following_redirects(&parsed, connect_budget + ttfb_budget, deadline)
                .await
            {
                Ok((resp, chain)) => {
                    let status = resp.status().as_u16();
                    if TRANSIENT_STATUSES.contains(&status) && attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        if fits_deadline(deadline, delay) {
                            attempt += 1;
                            debug!(url, status, attempt, "transient status, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break (resp, chain);
                }
                Err(reason) => {
                    return self.mk_page(url, url, 0, None, &[], started, 0, reason, Vec::new())
                }
            }
        };

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        if status != 200 {
            return self.mk_page(
                url,
                &final_url,
                status,
                content_type,
                &[],
                started,
                0,
                ReasonCode::Non200Status,
                redirect_chain,
            );
        }
        if !is_html_mime(content_type.as_deref()) {
            return self.mk_page(
                url,
                &final_url,
                status,
                content_type,
                &[],
                started,
                0,
                ReasonCode::InvalidMime,
                redirect_chain,
            );
        }

        // Stream the body: size cap, read budget and site deadline all
        // enforced mid-stream.
        let mut resp = resp;
        let mut body: Vec<u8> = Vec::new();
        let mut first_byte_ms: u64 = 0;
        let read_started = Instant::now();

        loop {
            let elapsed = read_started.elapsed();
            if elapsed >= read_budget {
                return self.mk_page(
                    url,
                    &final_url,
                    status,
                    content_type,
                    &body,
                    started,
                    first_byte_ms,
                    ReasonCode::NetworkTimeout,
                    redirect_chain,
                );
            }
            let mut slice = read_budget - elapsed;
            if let Some(d) = deadline {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return self.mk_page(
                        url,
                        &final_url,
                        status,
                        content_type,
                        &body,
                        started,
                        first_byte_ms,
                        ReasonCode::TimeBudgetExceeded,
                        redirect_chain,
                    );
                }
                slice = slice.min(remaining);
            }

            let chunk = match tokio::time::timeout(slice, resp.chunk()).await {
                Err(_) => {
                    let reason = if deadline.is_some_and(|d| Instant::now() >= d) {
                        ReasonCode::TimeBudgetExceeded
                    } else {
                        ReasonCode::NetworkTimeout
                    };
                    return self.mk_page(
                        url,
                        &final_url,
                        status,
                        content_type,
                        &body,
                        started,
                        first_byte_ms,
                        reason,
                        redirect_chain,
                    );
                }
                Ok(Err(e)) => {
                    return self.mk_page(
                        url,
                        &final_url,
                        status,
                        content_type,
                        &body,
                        started,
                        first_byte_ms,
                        classify_error(&e),
                        redirect_chain,
                    );
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(bytes))) => bytes,
            };

            if first_byte_ms == 0 && !chunk.is_empty() {
                first_byte_ms = read_started.elapsed().as_millis() as u64;
            }
            body.extend_from_slice(&chunk);
            if body.len() > self.config.page_size_limit {
                body.truncate(self.config.page_size_limit);
                return self.mk_page(
                    url,
                    &final_url,
                    status,
                    content_type,
                    &body,
                    started,
                    first_byte_ms,
                    ReasonCode::SizeLimitExceeded,
                    redirect_chain,
                );
            }
        }

        let html_text = decode_html(&body, content_type.as_deref());
        let cleaned = placecrawl_parser::visible_text(&html_text);
        let cleaned = if cleaned.trim().is_empty() {
            None
        } else {
            Some(cleaned)
        };

        FetchedPage {
            url: url.to_string(),
            final_url,
            http_status: status,
            content_type,
            content_hash: (!body.is_empty()).then(|| sha256_hex(&body)),
            fetched_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            first_byte_ms,
            size_bytes: body.len(),
            cleaned_text: cleaned,
            raw_html: include_raw.then_some(html_text),
            redirect_chain,
            reason: ReasonCode::Ok,
        }
    }

    /// Per-phase budgets, shrunk to an even split of whatever remains of
    /// the caller's deadline.
    fn phase_budgets(
        &self,
        deadline: Option<Instant>,
    ) -> Result<(Duration, Duration, Duration), ReasonCode> {
        let mut connect = self.config.connect_timeout;
        let mut ttfb = self.config.ttfb_timeout;
        let mut read = self.config.read_timeout;

        if let Some(d) = deadline {
            let remaining = d.saturating_duration_since(Instant::now());
            if remaining < MIN_BUDGET {
                return Err(ReasonCode::TimeBudgetExceeded);
            }
            let slice = remaining / 3;
            connect = connect.min(slice);
            ttfb = ttfb.min(slice);
            read = read.min(slice);
        }
        Ok((connect, ttfb, read))
    }

    async fn send_following_redirects(
        &self,
        start_url: &Url,
        send_budget: Duration,
        deadline: Option<Instant>,
    ) -> Result<(reqwest::Response, Vec<String>), ReasonCode> {
        let mut chain: Vec<String> = Vec::new();
        let mut current = start_url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let mut budget = send_budget;
            if let Some(d) = deadline {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ReasonCode::TimeBudgetExceeded);
                }
                budget = budget.min(remaining);
            }

            let resp =
                match tokio::time::timeout(budget, self.client.get(current.clone()).send()).await {
                    Err(_) => {
                        return Err(if deadline.is_some_and(|d| Instant::now() >= d) {
                            ReasonCode::TimeBudgetExceeded
                        } else {
                            ReasonCode::NetworkTimeout
                        })
                    }
                    Ok(Err(e)) => return Err(classify_error(&e)),
                    Ok(Ok(r)) => r,
                };

            if resp.status().is_redirection() {
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| current.join(loc).ok());
                if let Some(next) = location {
                    chain.push(current.to_string());
                    current = next;
                    continue;
                }
            }
            return Ok((resp, chain));
        }
        Err(ReasonCode::NetworkError)
    }

    #[allow(clippy::too_many_arguments)]
    fn mk_page(
        &self,
        url: &str,
        final_url: &str,
        status: u16,
        content_type: Option<String>,
        raw: &[u8],
        started: Instant,
        first_byte_ms: u64,
        reason: ReasonCode,
        redirect_chain: Vec<String>,
    ) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            final_url: final_url.to_string(),
            http_status: status,
            content_type,
            content_hash: (!raw.is_empty()).then(|| sha256_hex(raw)),
            fetched_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            first_byte_ms,
            size_bytes: raw.len(),
            cleaned_text: None,
            raw_html: None,
            redirect_chain,
            reason,
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn is_html_mime(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else { return false };
    let mime = ct.split(';').next().unwrap_or("").trim().to_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

fn charset_of(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|part| {
        let part = part.trim();
        part.strip_prefix("charset=")
            .or_else(|| part.strip_prefix("CHARSET="))
            .map(|v| v.trim_matches('"'))
    })
}

/// Decode body bytes: declared charset, then detection, with replacement
/// for anything undecodable.
fn decode_html(raw: &[u8], content_type: Option<&str>) -> String {
    if let Some(cs) = content_type.and_then(charset_of) {
        if let Some(enc) = encoding_rs::Encoding::for_label(cs.as_bytes()) {
            let (text, _, _) = enc.decode(raw);
            return text.into_owned();
        }
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(raw, true);
    let enc = detector.guess(None, true);
    let (text, _, _) = enc.decode(raw);
    text.into_owned()
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(300 * 2u64.pow(attempt));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
    base + jitter
}

fn fits_deadline(deadline: Option<Instant>, delay: Duration) -> bool {
    match deadline {
        None => true,
        Some(d) => Instant::now() + delay + MIN_BUDGET < d,
    }
}

/// Map a transport error onto the reason taxonomy. String matching over
/// the error chain, same as classifying proxy errors by message.
fn classify_error(e: &reqwest::Error) -> ReasonCode {
    if e.is_timeout() {
        return ReasonCode::NetworkTimeout;
    }
    let msg = format!("{e:?}").to_lowercase();
    if msg.contains("dns") || msg.contains("resolve") || msg.contains("name or service") {
        ReasonCode::DnsFailure
    } else if msg.contains("certificate")
        || msg.contains("tls")
        || msg.contains("ssl")
        || msg.contains("handshake")
    {
        ReasonCode::TlsError
    } else {
        ReasonCode::NetworkError
    }
}
