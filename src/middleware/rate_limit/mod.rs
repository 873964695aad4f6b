//! Fixed-window rate limiting with a shared store and a local fallback.
//!
//! # Counting
//!
//! Each request is attributed to a bucket: `uid:<subject>` when an auth
//! layer attached a [`Subject`](crate::Subject), else `ip:<client ip>`
//! (`0.0.0.0` when the transport gave no address). A bucket counts hits
//! until `now >= reset_at`, then starts over at one with a fresh window.
//! `hits <= limit` is allowed; anything above is answered with `429`.
//!
//! # Where the count lives
//!
//! ```text
//!             ┌───────────────┐ ok
//! request ──▶ │ CounterStore  │────▶ decision (storage = shared)
//!             └──────┬────────┘
//!                    │ error / timeout / none configured
//!                    ▼
//!             ┌───────────────┐
//!             │ LocalBuckets  │────▶ decision (storage = local)
//!             └───────────────┘
//! ```
//!
//! A failing store never rejects or stalls a request (calls are bounded by
//! `backend_timeout_ms`); it only makes the count per-process for that
//! request. With atomic increment the shared count is exact across
//! processes. Without it the limiter reads, adds one and writes back, and
//! processes racing on one key can under-count.

mod clock;
mod local;
mod store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{CounterStore, MemoryStore, StoreError};

use self::local::LocalBuckets;
use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Settings for [`RateLimit`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window. `0` rejects everything.
    pub limit: u64,
    /// Window length in seconds. `0` is treated as `1`.
    pub window_secs: u64,
    /// Prepended to every bucket key in the shared store.
    pub key_prefix: String,
    /// Upper bound on a single shared-store call.
    pub backend_timeout_ms: u64,
    /// Local bucket count at which expired buckets are swept.
    pub sweep_threshold: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 200,
            window_secs: 60,
            key_prefix: "ratelimit:".to_owned(),
            backend_timeout_ms: 250,
            sweep_threshold: 10_000,
        }
    }
}

/// Which counter produced a decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Storage {
    Shared,
    Local,
}

impl Storage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Local  => "local",
        }
    }
}

/// The outcome of counting one request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub hits: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the current window ends.
    pub reset_at: u64,
    pub storage: Storage,
}

impl RateLimitDecision {
    /// Seconds until the window resets, never negative.
    pub fn retry_after(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now)
    }

    /// Writes the `X-RateLimit-*` headers.
    pub fn apply_headers(&self, res: &mut Response) {
        res.set_header("x-ratelimit-limit", &self.limit.to_string());
        res.set_header("x-ratelimit-remaining", &self.remaining.to_string());
        res.set_header("x-ratelimit-reset", &self.reset_at.to_string());
        res.set_header("x-ratelimit-storage", self.storage.as_str());
    }
}

/// Rate-limiting middleware. See the [module docs](self).
pub struct RateLimit {
    config: RateLimitConfig,
    store: Option<Arc<dyn CounterStore>>,
    local: LocalBuckets,
    clock: Arc<dyn Clock>,
}

impl RateLimit {
    /// A limiter that counts in-process only.
    pub fn new(mut config: RateLimitConfig) -> Self {
        if config.window_secs == 0 {
            warn!("rate limit window_secs = 0, using 1");
            config.window_secs = 1;
        }
        let local = LocalBuckets::new(config.sweep_threshold);
        Self { config, store: None, local, clock: Arc::new(SystemClock) }
    }

    /// Counts in `store` first, locally only when it fails.
    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The bucket key a request is counted under.
    pub fn key_for(&self, req: &Request) -> String {
        let prefix = &self.config.key_prefix;
        match req.subject() {
            Some(subject) => format!("{prefix}uid:{subject}"),
            None => {
                let ip = req.client_ip().map(|ip| ip.to_string());
                format!("{prefix}ip:{}", ip.as_deref().unwrap_or("0.0.0.0"))
            }
        }
    }

    /// Counts one hit against `key` at `now` (epoch seconds).
    pub async fn evaluate(&self, key: &str, now: u64) -> RateLimitDecision {
        if let Some(store) = &self.store {
            match self.count_shared(store.as_ref(), key, now).await {
                Ok((hits, reset_at)) => return self.decide(hits, reset_at, Storage::Shared),
                Err(e) => warn!(key, "rate limit store failed, counting locally: {e}"),
            }
        }
        let (hits, reset_at) = self.local.hit(key, now, self.config.window_secs);
        self.decide(hits, reset_at, Storage::Local)
    }

    /// Drops local buckets whose window has ended. Returns how many.
    pub fn sweep(&self, now: u64) -> usize {
        self.local.sweep(now)
    }

    /// Number of buckets currently held in-process.
    pub fn local_buckets(&self) -> usize {
        self.local.len()
    }

    /// Sweeps local buckets every `every` until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let swept = self.sweep(self.clock.now());
                if swept > 0 {
                    debug!(swept, "swept expired rate limit buckets");
                }
            }
        })
    }

    fn decide(&self, hits: u64, reset_at: u64, storage: Storage) -> RateLimitDecision {
        let limit = self.config.limit;
        RateLimitDecision {
            allowed: limit > 0 && hits <= limit,
            hits,
            limit,
            remaining: limit.saturating_sub(hits),
            reset_at,
            storage,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = Duration::from_millis(self.config.backend_timeout_ms);
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(limit)))
    }

    /// Returns `(hits, reset_at)` as recorded by the shared store.
    async fn count_shared(
        &self,
        store: &dyn CounterStore,
        key: &str,
        now: u64,
    ) -> Result<(u64, u64), StoreError> {
        let window = self.config.window_secs;
        let reset_key = format!("{key}:reset");

        let (hits, atomic) = match self.bounded(store.increment(key)).await? {
            Some(hits) => (hits, true),
            None => (self.bounded(store.get(key)).await?.unwrap_or(0) + 1, false),
        };
        let reset_at = if hits == 1 { None } else { self.bounded(store.get(&reset_key)).await? };

        match reset_at {
            // A window the store did not expire on time counts as over.
            Some(reset_at) if now >= reset_at => self.open_window(store, key, &reset_key, now).await,
            Some(reset_at) => {
                if !atomic {
                    let ttl = Duration::from_secs(reset_at - now);
                    self.bounded(store.set(key, hits, ttl)).await?;
                }
                Ok((hits, reset_at))
            }
            None if hits == 1 => self.open_window(store, key, &reset_key, now).await,
            // The marker was never written or was evicted. An atomically
            // created counter may carry no TTL, so both keys are re-armed
            // with a fresh window and the count carries on.
            None => {
                let ttl = Duration::from_secs(window);
                let reset_at = now.saturating_add(window);
                self.bounded(store.set(key, hits, ttl)).await?;
                self.bounded(store.set(&reset_key, reset_at, ttl)).await?;
                Ok((hits, reset_at))
            }
        }
    }

    async fn open_window(
        &self,
        store: &dyn CounterStore,
        key: &str,
        reset_key: &str,
        now: u64,
    ) -> Result<(u64, u64), StoreError> {
        let window = self.config.window_secs;
        let ttl = Duration::from_secs(window);
        let reset_at = now.saturating_add(window);
        self.bounded(store.set(key, 1, ttl)).await?;
        self.bounded(store.set(reset_key, reset_at, ttl)).await?;
        Ok((1, reset_at))
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        let key = self.key_for(&req);
        let now = self.clock.now();
        let decision = self.evaluate(&key, now).await;

        if !decision.allowed {
            debug!(%key, hits = decision.hits, limit = decision.limit, "rate limit exceeded");
            let mut res = Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .text("Rate limit exceeded");
            decision.apply_headers(&mut res);
            res.set_header("retry-after", &decision.retry_after(now).to_string());
            return Ok(res);
        }

        let mut res = next.run(req).await?;
        decision.apply_headers(&mut res);
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::Pipeline;

    const T0: u64 = 1_700_000_000;

    fn config(limit: u64) -> RateLimitConfig {
        RateLimitConfig { limit, window_secs: 60, ..RateLimitConfig::default() }
    }

    fn from(ip: &str) -> Request {
        let addr: SocketAddr = format!("{ip}:40000").parse().unwrap();
        Request::get("/").with_remote_addr(addr)
    }

    /// A backend that is always down.
    struct Down;

    #[async_trait]
    impl CounterStore for Down {
        async fn get(&self, _: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: u64, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn increment(&self, _: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// A [`MemoryStore`] whose first `set` fails, as after a dropped
    /// connection between INCR and EXPIRE.
    struct Flaky {
        inner: MemoryStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CounterStore for Flaky {
        async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.set(key, value, ttl).await
        }
        async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
            self.inner.increment(key).await
        }
    }

    /// A backend that never answers.
    struct Hung;

    #[async_trait]
    impl CounterStore for Hung {
        async fn get(&self, _: &str) -> Result<Option<u64>, StoreError> {
            std::future::pending().await
        }
        async fn set(&self, _: &str, _: u64, _: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let clock = Arc::new(ManualClock::new(T0));
        let pipeline = Pipeline::builder()
            .with(RateLimit::new(config(3)).with_clock(clock.clone()))
            .build(|_req: Request| async { "ok" });

        for expected in ["2", "1", "0"] {
            let res = pipeline.handle(from("10.0.0.1")).await;
            assert_eq!(res.status_code(), StatusCode::OK);
            assert_eq!(res.header("x-ratelimit-remaining"), Some(expected));
            assert_eq!(res.header("x-ratelimit-limit"), Some("3"));
            assert_eq!(res.header("x-ratelimit-storage"), Some("local"));
        }

        clock.advance(15);
        let res = pipeline.handle(from("10.0.0.1")).await;
        assert_eq!(res.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.header("retry-after"), Some("45"));
        assert_eq!(res.header("x-ratelimit-remaining"), Some("0"));
        assert_eq!(res.header("x-ratelimit-reset"), Some((T0 + 60).to_string().as_str()));

        // other clients are unaffected
        let res = pipeline.handle(from("10.0.0.2")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn window_reset_grants_a_fresh_window() {
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = RateLimit::new(config(2)).with_clock(clock.clone());

        limiter.evaluate("k", T0).await;
        limiter.evaluate("k", T0 + 1).await;
        assert!(!limiter.evaluate("k", T0 + 2).await.allowed);

        let fresh = limiter.evaluate("k", T0 + 60).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.hits, 1);
        assert_eq!(fresh.reset_at, T0 + 120);
    }

    #[tokio::test]
    async fn zero_limit_rejects_everything() {
        let limiter = RateLimit::new(config(0));
        let decision = limiter.evaluate("k", T0).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn subject_takes_precedence_over_ip() {
        let limiter = RateLimit::new(RateLimitConfig::default());
        assert_eq!(limiter.key_for(&from("10.1.2.3")), "ratelimit:ip:10.1.2.3");
        assert_eq!(limiter.key_for(&from("10.1.2.3").with_subject("7")), "ratelimit:uid:7");
        assert_eq!(limiter.key_for(&Request::get("/")), "ratelimit:ip:0.0.0.0");
    }

    #[tokio::test]
    async fn shared_store_is_counted_across_instances() {
        let clock = Arc::new(ManualClock::new(T0));
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
        let a = RateLimit::new(config(3)).with_store(store.clone()).with_clock(clock.clone());
        let b = RateLimit::new(config(3)).with_store(store).with_clock(clock.clone());

        assert_eq!(a.evaluate("k", T0).await.remaining, 2);
        assert_eq!(b.evaluate("k", T0).await.remaining, 1);
        let third = a.evaluate("k", T0 + 5).await;
        assert_eq!(third.storage, Storage::Shared);
        assert_eq!(third.reset_at, T0 + 60);
        assert!(!b.evaluate("k", T0 + 6).await.allowed);

        clock.set(T0 + 60);
        let fresh = a.evaluate("k", T0 + 60).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.hits, 1);
    }

    #[tokio::test]
    async fn lost_reset_marker_is_rearmed() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(Flaky {
            inner: MemoryStore::with_clock(clock.clone()),
            failed: Default::default(),
        });
        let limiter = RateLimit::new(config(2)).with_store(store).with_clock(clock.clone());

        // The counter is created, but opening its window fails.
        assert_eq!(limiter.evaluate("k", T0).await.storage, Storage::Local);

        clock.set(T0 + 1);
        let second = limiter.evaluate("k", T0 + 1).await;
        assert_eq!((second.hits, second.reset_at, second.storage), (2, T0 + 61, Storage::Shared));
        let third = limiter.evaluate("k", T0 + 2).await;
        assert!(!third.allowed);
        assert_eq!(third.reset_at, T0 + 61);

        clock.set(T0 + 61);
        let fresh = limiter.evaluate("k", T0 + 61).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.hits, 1);
        assert_eq!(fresh.reset_at, T0 + 121);
    }

    #[tokio::test]
    async fn zero_window_still_limits() {
        let limiter = RateLimit::new(RateLimitConfig { window_secs: 0, ..config(1) });
        assert!(limiter.evaluate("k", T0).await.allowed);
        let second = limiter.evaluate("k", T0).await;
        assert!(!second.allowed);
        assert_eq!(second.reset_at, T0 + 1);
    }

    #[tokio::test]
    async fn huge_window_saturates_instead_of_overflowing() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let pipeline = Pipeline::builder()
            .with(
                RateLimit::new(RateLimitConfig { window_secs: u64::MAX, ..config(1) })
                    .with_store(store)
                    .with_clock(clock.clone()),
            )
            .build(|_req: Request| async { "ok" });

        let res = pipeline.handle(from("10.0.0.3")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("x-ratelimit-reset"), Some(u64::MAX.to_string().as_str()));
        let res = pipeline.handle(from("10.0.0.3")).await;
        assert_eq!(res.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let local = RateLimit::new(RateLimitConfig { window_secs: u64::MAX, ..config(1) });
        assert_eq!(local.evaluate("k", T0).await.reset_at, u64::MAX);
    }

    #[tokio::test]
    async fn read_modify_write_store_keeps_the_window() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()).without_increment());
        let limiter = RateLimit::new(config(2)).with_store(store).with_clock(clock.clone());

        let first = limiter.evaluate("k", T0).await;
        assert_eq!((first.hits, first.reset_at, first.storage), (1, T0 + 60, Storage::Shared));

        clock.set(T0 + 30);
        let second = limiter.evaluate("k", T0 + 30).await;
        assert_eq!((second.hits, second.reset_at), (2, T0 + 60));
        assert!(!limiter.evaluate("k", T0 + 31).await.allowed);

        clock.set(T0 + 60);
        assert_eq!(limiter.evaluate("k", T0 + 60).await.hits, 1);
    }

    #[tokio::test]
    async fn failing_store_falls_back_to_local() {
        let clock = Arc::new(ManualClock::new(T0));
        let pipeline = Pipeline::builder()
            .with(RateLimit::new(config(2)).with_store(Arc::new(Down)).with_clock(clock))
            .build(|_req: Request| async { "ok" });

        let statuses: Vec<_> = futures::future::join_all((0..3).map(|_| pipeline.handle(from("10.0.0.9"))))
            .await
            .into_iter()
            .map(|res| {
                assert_eq!(res.header("x-ratelimit-storage"), Some("local"));
                res.status_code()
            })
            .collect();
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 2);
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::TOO_MANY_REQUESTS).count(), 1);
    }

    #[tokio::test]
    async fn hung_store_times_out_to_local() {
        let config = RateLimitConfig { backend_timeout_ms: 10, ..config(5) };
        let limiter = RateLimit::new(config).with_store(Arc::new(Hung));
        let decision = limiter.evaluate("k", T0).await;
        assert!(decision.allowed);
        assert_eq!(decision.storage, Storage::Local);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_local_hits_are_not_lost() {
        let limiter = Arc::new(RateLimit::new(config(1_000)));
        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.evaluate("hot", T0).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(limiter.evaluate("hot", T0).await.hits, 201);
    }

    #[tokio::test]
    async fn sweep_drops_expired_buckets() {
        let limiter = RateLimit::new(config(5));
        limiter.evaluate("a", T0).await;
        limiter.evaluate("b", T0 + 30).await;
        assert_eq!(limiter.local_buckets(), 2);

        assert_eq!(limiter.sweep(T0 + 60), 1);
        assert_eq!(limiter.local_buckets(), 1);
    }
}
