//! Middleware layer.
//!
//! A [`Middleware`] sees every request on its way in and every response on
//! its way out. It receives the request together with [`Next`], the rest of
//! the chain, and decides what to do with it:
//!
//! - call `next.run(req)` once and return the result: a pass-through,
//!   optionally with work before and after (logging, header injection);
//! - return a response without touching `next`: a short-circuit, e.g. a
//!   401 for a missing credential.
//!
//! `Next::run` takes `self` by value and `Next` is not `Clone`, so running
//! the rest of the chain twice for one request does not compile.
//!
//! Built-in middleware:
//! - [`ErrorBoundary`]: turns escaped failures and panics into a 500
//! - [`Logging`]: one `tracing` event per request: method, uri, status, latency
//! - [`RateLimit`]: fixed-window counters, shared store with local fallback
//! - [`Auth`]: static bearer token with public-path allow-list
//! - [`Csrf`]: session-bound synchroniser tokens
//! - [`ContentNegotiation`]: serialises payloads per the `Accept` header
//! - [`Timeout`]: deadline around the rest of the chain

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

mod auth;
mod boundary;
mod csrf;
mod logging;
mod negotiation;
mod timeout;

pub mod rate_limit;

pub use auth::{Auth, AuthConfig, PathMatcher};
pub use boundary::ErrorBoundary;
pub use csrf::{Csrf, CsrfConfig, CsrfToken, MemorySessionStore, SessionStore};
pub use logging::Logging;
pub use negotiation::{ContentNegotiation, parse_accept};
pub use rate_limit::{RateLimit, RateLimitConfig};
pub use timeout::Timeout;

/// A unit of cross-cutting behaviour in a pipeline.
///
/// Implementations must be shareable across concurrent requests; any
/// per-request state lives in the future, any shared state behind its own
/// synchronisation.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error>;
}

/// The remainder of the chain after the current middleware.
///
/// Consumed by [`Next::run`]; not `Clone`.
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    pub(crate) fn new(inner: BoxedHandler) -> Self {
        Self { inner }
    }

    /// Runs the rest of the chain, ending at the terminal handler.
    pub async fn run(self, req: Request) -> Result<Response, Error> {
        self.inner.call(req).await
    }
}

/// Adapts an async closure into a [`Middleware`].
///
/// ```rust,ignore
/// let tag = from_fn(|req, next: Next| async move {
///     let mut res = next.run(req).await?;
///     res.set_header("x-served-by", "weft");
///     Ok(res)
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    FromFn(f)
}

/// Middleware built by [`from_fn`].
pub struct FromFn<F>(F);

#[async_trait]
impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        (self.0)(req, next).await
    }
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        (**self).process(req, next).await
    }
}
