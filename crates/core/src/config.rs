use std::str::FromStr;
use std::time::Duration;

use crate::error::CrawlError;
use crate::types::PageType;

/// Runtime configuration, resolved once at startup from the environment and
/// passed by reference to the components that need it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crawl: CrawlConfig,
    pub freshness: FreshnessConfig,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub connect_timeout: Duration,
    pub ttfb_timeout: Duration,
    pub read_timeout: Duration,
    pub page_size_limit: usize,
    pub user_agent: String,
    pub store_raw_html: bool,
    pub robots_ttl: Duration,
    pub site_budget: Duration,
    pub min_visible_chars: usize,
    pub per_host_concurrency: i64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs_f64(1.0),
            ttfb_timeout: Duration::from_secs_f64(1.0),
            read_timeout: Duration::from_secs_f64(1.0),
            page_size_limit: 2_000_000,
            user_agent: default_user_agent(),
            store_raw_html: false,
            robots_ttl: Duration::from_secs(3600),
            site_budget: Duration::from_millis(5000),
            min_visible_chars: 200,
            per_host_concurrency: 2,
        }
    }
}

/// Per-field freshness windows, shared by page TTL assignment and the
/// freshness evaluator.
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    pub hours_days: i64,
    pub menu_contact_price_days: i64,
    pub desc_features_days: i64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            hours_days: 3,
            menu_contact_price_days: 14,
            desc_features_days: 30,
        }
    }
}

impl FreshnessConfig {
    /// TTL assigned to a scraped page of the given type.
    pub fn ttl_for(&self, page_type: PageType) -> chrono::Duration {
        let days = match page_type {
            PageType::Hours => self.hours_days,
            PageType::Menu | PageType::Contact | PageType::Fees => self.menu_contact_price_days,
            PageType::Homepage | PageType::About | PageType::Other => self.desc_features_days,
        };
        chrono::Duration::days(days)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: i64,
    pub sleep_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            sleep_seconds: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sleep_seconds: u64,
    pub batch_size: i64,
    pub top_percentile: f64,
    pub max_running_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_seconds: 300,
            batch_size: 50,
            top_percentile: 0.9,
            max_running_minutes: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

fn default_user_agent() -> String {
    format!(
        "placecrawl/{} (+contact: ops@placecrawl.invalid)",
        env!("CARGO_PKG_VERSION")
    )
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_secs_f64(key: &str, default: f64) -> Duration {
    Duration::from_secs_f64(env_parse(key, default).max(0.0))
}

impl AppConfig {
    /// Resolve configuration from the environment. Only DATABASE_URL is
    /// required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, CrawlError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| CrawlError::Config("DATABASE_URL is not set".into()))?;

        let crawl = CrawlConfig {
            connect_timeout: env_secs_f64("CRAWL_CONNECT_TIMEOUT_S", 1.0),
            ttfb_timeout: env_secs_f64("CRAWL_TTFB_TIMEOUT_S", 1.0),
            read_timeout: env_secs_f64("CRAWL_READ_TIMEOUT_S", 1.0),
            page_size_limit: env_parse("CRAWL_PAGE_SIZE_LIMIT_BYTES", 2_000_000usize),
            user_agent: std::env::var("CRAWL_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            store_raw_html: env_bool("CRAWL_STORE_RAW_HTML", false),
            robots_ttl: Duration::from_secs(env_parse("CRAWL_ROBOTS_TTL_SECONDS", 3600u64)),
            site_budget: Duration::from_millis(env_parse("CRAWL_BUDGET_MS", 5000u64)),
            min_visible_chars: env_parse("CRAWL_MIN_VISIBLE_CHARS", 200usize),
            per_host_concurrency: env_parse("CRAWL_PER_HOST_CONCURRENCY", 2i64).max(1),
        };

        let freshness = FreshnessConfig {
            hours_days: env_parse("FRESH_HOURS_DAYS", 3i64),
            menu_contact_price_days: env_parse("FRESH_MENU_CONTACT_PRICE_DAYS", 14i64),
            desc_features_days: env_parse("FRESH_DESC_FEATURES_DAYS", 30i64),
        };

        let worker = WorkerConfig {
            batch_size: env_parse("WORKER_BATCH_SIZE", 8i64).max(1),
            sleep_seconds: env_parse("WORKER_SLEEP_SECONDS", 1u64),
        };

        let scheduler = SchedulerConfig {
            sleep_seconds: env_parse("SCHEDULER_SLEEP_SECONDS", 300u64),
            batch_size: env_parse("SCHEDULER_BATCH_SIZE", 50i64).max(1),
            top_percentile: env_parse("SCHEDULER_TOP_PERCENTILE", 0.9f64).clamp(0.0, 1.0),
            max_running_minutes: env_parse("JOB_MAX_RUNNING_MINUTES", 30i64).max(1),
        };

        let api = ApiConfig {
            bind: std::env::var("API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            database: DatabaseConfig { url: database_url },
            crawl,
            freshness,
            worker,
            scheduler,
            api,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_defaults_match_contract() {
        let c = CrawlConfig::default();
        assert_eq!(c.connect_timeout, Duration::from_secs(1));
        assert_eq!(c.page_size_limit, 2_000_000);
        assert_eq!(c.site_budget, Duration::from_millis(5000));
        assert_eq!(c.min_visible_chars, 200);
        assert_eq!(c.per_host_concurrency, 2);
        assert!(!c.store_raw_html);
    }

    #[test]
    fn ttl_buckets_by_page_type() {
        let f = FreshnessConfig::default();
        assert_eq!(f.ttl_for(PageType::Hours), chrono::Duration::days(3));
        assert_eq!(f.ttl_for(PageType::Menu), chrono::Duration::days(14));
        assert_eq!(f.ttl_for(PageType::Contact), chrono::Duration::days(14));
        assert_eq!(f.ttl_for(PageType::Fees), chrono::Duration::days(14));
        assert_eq!(f.ttl_for(PageType::Homepage), chrono::Duration::days(30));
        assert_eq!(f.ttl_for(PageType::About), chrono::Duration::days(30));
        assert_eq!(f.ttl_for(PageType::Other), chrono::Duration::days(30));
    }
}
