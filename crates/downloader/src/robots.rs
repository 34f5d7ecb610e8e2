use std::time::{Duration, Instant};

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

/// Cached robots.txt state for one origin. `body: None` means the robots
/// file could not be fetched (or was oversized) and the origin is treated
/// as permissive until the entry expires.
struct RobotsEntry {
    loaded_at: Instant,
    body: Option<String>,
}

/// Process-wide robots.txt cache keyed by origin (scheme://host:port).
/// Entries expire after `ttl` and reload lazily on next use; concurrent
/// reloads of the same origin may race, which at worst costs one duplicate
/// fetch per origin per TTL.
pub struct RobotsCache {
    ttl: Duration,
    entries: DashMap<String, RobotsEntry>,
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    fn origin_of(url: &Url) -> String {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }

    /// Whether `url` may be fetched by `user_agent`. Reloads the origin's
    /// robots.txt when the cached entry is missing or expired.
    pub async fn allowed(
        &self,
        client: &reqwest::Client,
        url: &Url,
        user_agent: &str,
        fetch_timeout: Duration,
        size_limit: usize,
    ) -> bool {
        let origin = Self::origin_of(url);

        if let Some(entry) = self.entries.get(&origin) {
            if entry.loaded_at.elapsed() <= self.ttl {
                return Self::check(entry.body.as_deref(), user_agent, url);
            }
        }

        let body = Self::load(client, &origin, user_agent, fetch_timeout, size_limit).await;
        debug!(origin = %origin, loaded = body.is_some(), "robots.txt refreshed");
        let allowed = Self::check(body.as_deref(), user_agent, url);
        self.entries.insert(
            origin,
            RobotsEntry {
                loaded_at: Instant::now(),
                body,
            },
        );
        allowed
    }

    async fn load(
        client: &reqwest::Client,
        origin: &str,
        user_agent: &str,
        fetch_timeout: Duration,
        size_limit: usize,
    ) -> Option<String> {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let resp = tokio::time::timeout(
            fetch_timeout,
            client
                .get(&robots_url)
                .header("User-Agent", user_agent)
                .send(),
        )
        .await
        .ok()?
        .ok()?;

        if resp.status().as_u16() != 200 {
            return None;
        }
        let body = tokio::time::timeout(fetch_timeout, resp.text())
            .await
            .ok()?
            .ok()?;
        if body.len() > size_limit {
            return None;
        }
        Some(body)
    }

    fn check(body: Option<&str>, user_agent: &str, url: &Url) -> bool {
        match body {
            None => true,
            Some(content) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(content, user_agent, url.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_includes_scheme_and_port() {
        let url = Url::parse("https://x.example:8443/path?q=1").unwrap();
        assert_eq!(RobotsCache::origin_of(&url), "https://x.example:8443");
        let url = Url::parse("http://x.example/").unwrap();
        assert_eq!(RobotsCache::origin_of(&url), "http://x.example");
    }

    #[test]
    fn missing_robots_is_permissive() {
        let url = Url::parse("https://x.example/anything").unwrap();
        assert!(RobotsCache::check(None, "placecrawl/0.1", &url));
    }

    #[test]
    fn disallow_all_blocks_every_path() {
        let url = Url::parse("https://locked.example/").unwrap();
        let robots = "User-agent: *\nDisallow: /";
        assert!(!RobotsCache::check(Some(robots), "placecrawl/0.1", &url));
    }

    #[test]
    fn scoped_disallow_blocks_only_that_prefix() {
        let robots = "User-agent: *\nDisallow: /private";
        let open = Url::parse("https://x.example/menu").unwrap();
        let closed = Url::parse("https://x.example/private/area").unwrap();
        assert!(RobotsCache::check(Some(robots), "placecrawl/0.1", &open));
        assert!(!RobotsCache::check(Some(robots), "placecrawl/0.1", &closed));
    }
}
