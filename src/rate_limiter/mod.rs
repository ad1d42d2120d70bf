/*!
 * # Rate Limiting Module
 *
 * Fixed-window, in-memory request limiting keyed by client IP and path policy.
 *
 * - Path policies for the expensive storefront endpoints (quotes, checkout, webhooks)
 * - A global limit for every other `/api/...` route
 * - `X-RateLimit-*` headers on limited routes, `Retry-After` on denials
 * - A bounded bucket map: expired windows are swept first, then the oldest are evicted
 *
 * ## Usage
 *
 * ```ignore
 * let config = RateLimitConfig {
 *     requests_per_window: 60,
 *     window_duration: Duration::from_secs(60),
 *     ..Default::default()
 * };
 *
 * let app = Router::new()
 *     .route("/api/products", get(handler))
 *     .layer(RateLimitLayer::new(config).with_policies(default_policies(Duration::from_secs(60))));
 * ```
 */
use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderValue, Response},
    response::IntoResponse,
};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Prefix of the routes covered by the global limit.
pub const API_PREFIX: &str = "/api/";

fn num_to_header_value<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    window: Duration,
    // insertion order, breaks ties between equal instants
    seq: u64,
}

impl RateLimitEntry {
    fn new(now: Instant, window: Duration, seq: u64) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
            seq,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }

    fn time_until_reset(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    pub max_tracked_keys: usize,
    pub enable_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_duration: Duration::from_secs(60),
            max_tracked_keys: 10_000,
            enable_headers: true,
        }
    }
}

impl RateLimitConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            requests_per_window: cfg.rate_limit_requests_per_window,
            window_duration: Duration::from_secs(cfg.rate_limit_window_seconds.max(1)),
            max_tracked_keys: cfg.rate_limit_max_tracked_keys.max(1),
            enable_headers: cfg.rate_limit_enable_headers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: Duration,
}

/// Process-local fixed-window counters.
#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,
    seq: Arc<AtomicU64>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    /// Checks `key` against the global limit.
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_with(
            key,
            self.config.requests_per_window,
            self.config.window_duration,
        )
    }

    /// Counts one request for `key`; the `limit`-th request in a window is the last one allowed.
    pub fn check_with(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        let now = Instant::now();
        if !self.entries.contains_key(key) {
            self.make_room(now);
        }

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(now, window, self.next_seq()));

        if entry.is_expired(now) {
            *entry = RateLimitEntry::new(now, window, self.next_seq());
        }

        if entry.count >= limit {
            return RateLimitResult {
                allowed: false,
                limit,
                remaining: 0,
                reset_time: entry.time_until_reset(now),
            };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit,
            remaining: limit - entry.count,
            reset_time: entry.time_until_reset(now),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn remaining_quota(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.config.requests_per_window.saturating_sub(entry.count)
            }
            _ => self.config.requests_per_window,
        }
    }

    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops every bucket whose window has elapsed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        gauge!("rate_limit_tracked_keys", self.entries.len() as f64);
        removed
    }

    // Keeps the map under `max_tracked_keys` before a new key goes in.
    fn make_room(&self, now: Instant) {
        let max = self.config.max_tracked_keys;
        if self.entries.len() < max {
            return;
        }

        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < max {
            return;
        }

        let mut by_age: Vec<(String, Instant, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().window_start, e.value().seq))
            .collect();
        by_age.sort_by_key(|(_, started, seq)| (*started, *seq));

        let excess = self.entries.len() + 1 - max;
        for (key, _, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        counter!("rate_limit_evicted_total", excess as u64);
        debug!(evicted = excess, "Rate limiter evicted oldest windows");
    }
}

#[derive(Clone, Debug)]
pub struct PathPolicy {
    pub prefix: String,
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

impl PathPolicy {
    pub fn new(prefix: impl Into<String>, requests_per_window: u32, window: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            requests_per_window,
            window_duration: window,
        }
    }
}

/// Quote, checkout and webhook limits.
pub fn default_policies(window: Duration) -> Vec<PathPolicy> {
    vec![
        PathPolicy::new("/api/quote", 15, window),
        PathPolicy::new("/api/checkout", 10, window),
        PathPolicy::new("/webhooks/mp", 30, window),
    ]
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn extract_ip_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return format!("ip:{}", ip);
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return format!("ip:{}", ip_str.trim());
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }

    "ip:unknown".to_string()
}

fn resolve_policy<'a>(
    path: &str,
    policies: &'a [PathPolicy],
    global: &RateLimitConfig,
) -> Option<(&'a str, u32, Duration)> {
    if let Some(p) = policies.iter().find(|p| path.starts_with(&p.prefix)) {
        return Some((p.prefix.as_str(), p.requests_per_window, p.window_duration));
    }
    if path.starts_with(API_PREFIX) {
        return Some((API_PREFIX, global.requests_per_window, global.window_duration));
    }
    None
}

fn apply_headers(response: &mut Response<axum::body::Body>, result: &RateLimitResult) {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
    headers.insert("X-RateLimit-Remaining", num_to_header_value(result.remaining));
    headers.insert(
        "X-RateLimit-Reset",
        num_to_header_value(result.reset_time.as_secs()),
    );
}

// Layer implementation for tower
#[derive(Clone)]
pub struct RateLimitLayer {
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_limiter(RateLimiter::new(config))
    }

    pub fn with_limiter(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            path_policies: Arc::new(Vec::new()),
        }
    }

    pub fn with_policies(mut self, policies: Vec<PathPolicy>) -> Self {
        self.path_policies = Arc::new(policies);
        self
    }

    pub fn limiter(&self) -> RateLimiter {
        self.rate_limiter.clone()
    }
}

impl<S> tower::Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            rate_limiter: self.rate_limiter.clone(),
            path_policies: self.path_policies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
}

impl<S> tower::Service<Request> for RateLimitService<S>
where
    S: tower::Service<Request, Response = Response<axum::body::Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<axum::body::Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let rate_limiter = self.rate_limiter.clone();
        let policies = self.path_policies.clone();
        // Swap in the clone that was driven ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let path = request.uri().path().to_string();
            let Some((prefix, limit, window)) =
                resolve_policy(&path, &policies, rate_limiter.config())
            else {
                return inner.call(request).await;
            };

            let key = format!("{}|{}", prefix, extract_ip_key(&request));
            let result = rate_limiter.check_with(&key, limit, window);

            if !result.allowed {
                warn!(key = %key, path = %path, "Rate limit exceeded");
                counter!("rate_limit_denied_total", 1, "policy" => prefix.to_string());

                let mut response = ServiceError::RateLimitExceeded.into_response();
                response.headers_mut().insert(
                    http::header::RETRY_AFTER,
                    num_to_header_value(window.as_secs()),
                );
                if rate_limiter.config().enable_headers {
                    apply_headers(&mut response, &result);
                }
                return Ok(response);
            }

            counter!("rate_limit_allowed_total", 1, "policy" => prefix.to_string());
            let mut response = inner.call(request).await?;
            if rate_limiter.config().enable_headers {
                apply_headers(&mut response, &result);
            }
            Ok(response)
        })
    }
}

/// Sweeps expired windows every `interval` until the runtime shuts down.
pub async fn start_cleanup_task(rate_limiter: RateLimiter, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        let removed = rate_limiter.cleanup_expired();
        debug!(removed, "Rate limiter cleanup completed");
    }
}
