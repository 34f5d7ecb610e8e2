use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome label recorded on every fetch attempt. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Ok,
    RobotsDisallowed,
    InvalidMime,
    #[serde(rename = "non_200_status")]
    Non200Status,
    SizeLimitExceeded,
    NetworkTimeout,
    DnsFailure,
    TlsError,
    NetworkError,
    TimeBudgetExceeded,
    ThinContent,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::RobotsDisallowed => "robots_disallowed",
            ReasonCode::InvalidMime => "invalid_mime",
            ReasonCode::Non200Status => "non_200_status",
            ReasonCode::SizeLimitExceeded => "size_limit_exceeded",
            ReasonCode::NetworkTimeout => "network_timeout",
            ReasonCode::DnsFailure => "dns_failure",
            ReasonCode::TlsError => "tls_error",
            ReasonCode::NetworkError => "network_error",
            ReasonCode::TimeBudgetExceeded => "time_budget_exceeded",
            ReasonCode::ThinContent => "thin_content",
        }
    }

    /// Reasons that make the rest of a site crawl pointless once the
    /// homepage fetch ends with one of them.
    pub fn aborts_site(&self) -> bool {
        matches!(
            self,
            ReasonCode::RobotsDisallowed
                | ReasonCode::NetworkTimeout
                | ReasonCode::DnsFailure
                | ReasonCode::TlsError
                | ReasonCode::NetworkError
                | ReasonCode::TimeBudgetExceeded
        )
    }

    /// Counted as aborted in crawl summaries.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            ReasonCode::NetworkTimeout | ReasonCode::TimeBudgetExceeded
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ReasonCode::Ok),
            "robots_disallowed" => Ok(ReasonCode::RobotsDisallowed),
            "invalid_mime" => Ok(ReasonCode::InvalidMime),
            "non_200_status" => Ok(ReasonCode::Non200Status),
            "size_limit_exceeded" => Ok(ReasonCode::SizeLimitExceeded),
            "network_timeout" => Ok(ReasonCode::NetworkTimeout),
            "dns_failure" => Ok(ReasonCode::DnsFailure),
            "tls_error" => Ok(ReasonCode::TlsError),
            "network_error" => Ok(ReasonCode::NetworkError),
            "time_budget_exceeded" => Ok(ReasonCode::TimeBudgetExceeded),
            "thin_content" => Ok(ReasonCode::ThinContent),
            other => Err(format!("unknown reason code: {other}")),
        }
    }
}

/// Role a fetched page plays for a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    Hours,
    Menu,
    Contact,
    About,
    Fees,
    Other,
}

impl PageType {
    /// Discovery priority for target pages.
    pub const TARGET_ORDER: [PageType; 5] = [
        PageType::Hours,
        PageType::Menu,
        PageType::Contact,
        PageType::About,
        PageType::Fees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::Hours => "hours",
            PageType::Menu => "menu",
            PageType::Contact => "contact",
            PageType::About => "about",
            PageType::Fees => "fees",
            PageType::Other => "other",
        }
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "homepage" => Ok(PageType::Homepage),
            "hours" => Ok(PageType::Hours),
            "menu" => Ok(PageType::Menu),
            "contact" => Ok(PageType::Contact),
            "about" => Ok(PageType::About),
            "fees" => Ok(PageType::Fees),
            "other" => Ok(PageType::Other),
            other => Err(format!("unknown page type: {other}")),
        }
    }
}

/// How a page URL was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMethod {
    DirectUrl,
    SearchApi,
    Heuristic,
}

impl SourceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMethod::DirectUrl => "direct_url",
            SourceMethod::SearchApi => "search_api",
            SourceMethod::Heuristic => "heuristic",
        }
    }
}

impl FromStr for SourceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_url" => Ok(SourceMethod::DirectUrl),
            "search_api" => Ok(SourceMethod::SearchApi),
            "heuristic" => Ok(SourceMethod::Heuristic),
            other => Err(format!("unknown source method: {other}")),
        }
    }
}

/// Result of one fetch attempt, network outcomes included.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub http_status: u16,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub first_byte_ms: u64,
    pub size_bytes: usize,
    pub cleaned_text: Option<String>,
    pub raw_html: Option<String>,
    pub redirect_chain: Vec<String>,
    pub reason: ReasonCode,
}

impl FetchedPage {
    /// Result for an attempt that never produced a body.
    pub fn empty(url: &str, reason: ReasonCode) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            http_status: 0,
            content_type: None,
            content_hash: None,
            fetched_at: Utc::now(),
            duration_ms: 0,
            first_byte_ms: 0,
            size_bytes: 0,
            cleaned_text: None,
            raw_html: None,
            redirect_chain: Vec::new(),
            reason,
        }
    }
}

/// Row-shaped record for `scraped_pages`, plus the transient raw HTML kept
/// around for structured-metadata extraction.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub place_id: Option<String>,
    pub url: String,
    pub final_url: String,
    pub page_type: PageType,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub http_status: u16,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub cleaned_text: Option<String>,
    pub size_bytes: usize,
    pub source_method: SourceMethod,
    pub redirect_chain: Vec<String>,
    pub reason: ReasonCode,
    pub duration_ms: u64,
    pub first_byte_ms: u64,
    pub raw_html: Option<String>,
}

/// Summary of one site crawl.
#[derive(Debug)]
pub struct CrawlResult {
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pages: Vec<PageRecord>,
    pub fetched_count: usize,
    pub aborted_count: usize,
    pub errors_by_class: HashMap<&'static str, u64>,
}

/// Same-site link discovered on a homepage, classified by target type.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLink {
    pub url: String,
    pub page_type: PageType,
    pub confidence: f64,
    pub anchor_text: String,
    pub signals: String,
}

/// `(open, close)` pair in zero-padded `HH:MM`.
pub type TimeRange = (String, String);

/// Weekday abbreviation (`mon`..`sun`) mapped to ordered open/close ranges.
pub type HoursMap = BTreeMap<String, Vec<TimeRange>>;

pub const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub social: Vec<String>,
}

impl ContactDetails {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.social.is_empty()
    }
}

/// Normalized output of one extractor pass over one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFacts {
    pub hours: Option<HoursMap>,
    pub contact_details: Option<ContactDetails>,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub amenities: Vec<String>,
    pub menu_url: Option<String>,
    pub price_range: Option<String>,
    pub fees: Option<String>,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        self.hours.is_none()
            && self.contact_details.is_none()
            && self.description.is_none()
            && self.features.is_empty()
            && self.amenities.is_empty()
            && self.menu_url.is_none()
            && self.price_range.is_none()
            && self.fees.is_none()
    }
}

/// Baseline venue row as ingested upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub place_id: String,
    pub name: String,
    pub category_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub popularity_confidence: Option<f64>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub website: Option<String>,
    pub address: Option<String>,
}

/// Merged per-venue facts with per-field freshness timestamps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Enrichment {
    pub place_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<HoursMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_details: Option<ContactDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub amenities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl Enrichment {
    /// Names of the fact fields that carry a value, timestamps excluded.
    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.hours.as_ref().is_some_and(|h| !h.is_empty()) {
            out.push("hours");
        }
        if self.contact_details.as_ref().is_some_and(|c| !c.is_empty()) {
            out.push("contact_details");
        }
        if self.description.is_some() {
            out.push("description");
        }
        if !self.features.is_empty() {
            out.push("features");
        }
        if self.menu_url.is_some() {
            out.push("menu_url");
        }
        if self.price_range.is_some() {
            out.push("price_range");
        }
        if !self.amenities.is_empty() {
            out.push("amenities");
        }
        if self.fees.is_some() {
            out.push("fees");
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Realtime,
    Background,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Realtime => "realtime",
            JobMode::Background => "background",
        }
    }
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(JobMode::Realtime),
            "background" => Ok(JobMode::Background),
            other => Err(format!("unknown job mode: {other}")),
        }
    }
}

/// pending -> running -> success | fail. Terminal states never revert;
/// prune_stuck is the one sanctioned exception for abandoned running rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Fail,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Fail => "fail",
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "success" => Ok(JobState::Success),
            "fail" => Ok(JobState::Fail),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Job row snapshot for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: i64,
    pub place_id: String,
    pub mode: JobMode,
    pub priority: i32,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A claimed job, handed to a worker together with the venue's homepage.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub job_id: i64,
    pub place_id: String,
    pub mode: JobMode,
    pub priority: i32,
    pub base_url: Option<String>,
    pub host: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Errors on crawl_jobs rows are capped at this many characters.
pub const MAX_JOB_ERROR_CHARS: usize = 2000;

/// Truncate an error message for storage on a job row.
pub fn truncate_error(error: &str) -> String {
    let trimmed = error.trim();
    if trimmed.chars().count() <= MAX_JOB_ERROR_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_JOB_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_round_trip() {
        for reason in [
            ReasonCode::Ok,
            ReasonCode::RobotsDisallowed,
            ReasonCode::InvalidMime,
            ReasonCode::Non200Status,
            ReasonCode::SizeLimitExceeded,
            ReasonCode::NetworkTimeout,
            ReasonCode::DnsFailure,
            ReasonCode::TlsError,
            ReasonCode::NetworkError,
            ReasonCode::TimeBudgetExceeded,
            ReasonCode::ThinContent,
        ] {
            assert_eq!(reason.as_str().parse::<ReasonCode>().unwrap(), reason);
        }
        assert_eq!(ReasonCode::Non200Status.as_str(), "non_200_status");
    }

    #[test]
    fn reason_codes_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&ReasonCode::Non200Status).unwrap(),
            "\"non_200_status\""
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::TimeBudgetExceeded).unwrap(),
            "\"time_budget_exceeded\""
        );
        assert_eq!(serde_json::to_string(&JobMode::Realtime).unwrap(), "\"realtime\"");
        assert_eq!(serde_json::to_string(&JobState::Pending).unwrap(), "\"pending\"");
    }

    #[test]
    fn terminal_reasons_abort_site() {
        assert!(ReasonCode::RobotsDisallowed.aborts_site());
        assert!(ReasonCode::TimeBudgetExceeded.aborts_site());
        assert!(!ReasonCode::Non200Status.aborts_site());
        assert!(!ReasonCode::ThinContent.aborts_site());
        assert!(!ReasonCode::Ok.aborts_site());
    }

    #[test]
    fn error_truncation_caps_at_limit() {
        let long = "x".repeat(MAX_JOB_ERROR_CHARS + 500);
        assert_eq!(truncate_error(&long).chars().count(), MAX_JOB_ERROR_CHARS);
        assert_eq!(truncate_error("  short  "), "short");
    }

    #[test]
    fn enrichment_present_fields() {
        let mut e = Enrichment {
            place_id: "P1".into(),
            ..Default::default()
        };
        assert!(e.present_fields().is_empty());
        e.menu_url = Some("https://example.com/menu".into());
        e.features = vec!["terrace".into()];
        assert_eq!(e.present_fields(), vec!["features", "menu_url"]);
    }
}
