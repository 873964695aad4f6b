//! Chain composition and dispatch.
//!
//! # How the chain is built
//!
//! The middleware list is folded right-to-left into nested handlers, once,
//! at build time:
//!
//! ```text
//! [A, B, C] + terminal
//!        ↓ compose
//! Link(A, next = Link(B, next = Link(C, next = terminal)))
//! ```
//!
//! Invoking the outer link runs `A`'s pre-`next` code, then `B`'s, then
//! `C`'s, then the terminal handler; post-`next` code unwinds in the
//! opposite order (`C`, `B`, `A`). The structure is immutable and shared;
//! per request only the `Next` continuations are created.

use std::sync::Arc;

use crate::config::Config;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::middleware::{Auth, ErrorBoundary, Logging, Middleware, Next, RateLimit};
use crate::render::ErrorRenderer;
use crate::request::Request;
use crate::response::Response;

/// One composed step: a middleware plus everything after it.
struct Link {
    middleware: Arc<dyn Middleware>,
    next: BoxedHandler,
}

impl ErasedHandler for Link {
    fn call(&self, req: Request) -> BoxFuture {
        let middleware = Arc::clone(&self.middleware);
        let next = Next::new(Arc::clone(&self.next));
        Box::pin(async move { middleware.process(req, next).await })
    }
}

/// Folds `middlewares` around `terminal`; the first element ends up outermost.
pub fn compose(middlewares: Vec<Arc<dyn Middleware>>, terminal: BoxedHandler) -> BoxedHandler {
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |next, middleware| Arc::new(Link { middleware, next }))
}

/// A built request pipeline: middlewares, a terminal handler, and an error
/// boundary around both.
///
/// Cheap to clone; clones share the same chain.
#[derive(Clone)]
pub struct Pipeline {
    chain: BoxedHandler,
    boundary: Arc<ErrorBoundary>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { middlewares: Vec::new(), boundary: ErrorBoundary::default() }
    }

    /// Builds the stack described by `config` around `terminal`:
    /// logging, then auth, then rate limiting, each only if configured.
    ///
    /// The rate limiter runs on its local store only; attach a shared
    /// store by building the pipeline by hand.
    pub fn from_config(config: &Config, terminal: impl Handler) -> Self {
        let mut builder = Self::builder()
            .debug(config.errors.debug)
            .renderer_boxed(config.errors.format.renderer());
        if config.logging {
            builder = builder.with(Logging::new());
        }
        if let Some(auth) = &config.auth {
            builder = builder.with(Auth::new(auth.clone()));
        }
        if let Some(rate_limit) = &config.rate_limit {
            builder = builder.with(RateLimit::new(rate_limit.clone()));
        }
        builder.build(terminal)
    }

    /// Runs one request through the chain. Never fails: escaped errors and
    /// panics come back as a 500.
    pub async fn handle(&self, req: Request) -> Response {
        let chain = Arc::clone(&self.chain);
        self.boundary.guard(async move { chain.call(req).await }).await
    }
}

/// Collects middlewares in declaration order. Obtain via [`Pipeline::builder`].
pub struct PipelineBuilder {
    middlewares: Vec<Arc<dyn Middleware>>,
    boundary: ErrorBoundary,
}

impl PipelineBuilder {
    /// Appends a middleware. Earlier calls wrap later ones.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Renderer used by the outer error boundary. Defaults to HTML.
    pub fn renderer(self, renderer: impl ErrorRenderer) -> Self {
        self.renderer_boxed(Box::new(renderer))
    }

    fn renderer_boxed(mut self, renderer: Box<dyn ErrorRenderer>) -> Self {
        self.boundary = self.boundary.with_boxed_renderer(renderer);
        self
    }

    /// Lets renderers include failure details. Never enable in production.
    pub fn debug(mut self, debug: bool) -> Self {
        self.boundary = self.boundary.debug(debug);
        self
    }

    pub fn build(self, terminal: impl Handler) -> Pipeline {
        Pipeline {
            chain: compose(self.middlewares, terminal.into_boxed_handler()),
            boundary: Arc::new(self.boundary),
        }
    }
}
