//! The error boundary: where escaped failures become responses.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use futures::FutureExt;
use http::StatusCode;
use tracing::error;

use super::{Middleware, Next};
use crate::error::Error;
use crate::render::{ErrorRenderer, HtmlRenderer};
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Catches every `Err` and panic from the rest of the chain, logs it, and
/// answers with a 500 rendered by the configured [`ErrorRenderer`].
///
/// [`Pipeline`](crate::Pipeline) always installs one as the outermost layer;
/// add another with [`PipelineBuilder::with`](crate::PipelineBuilder::with)
/// to render failures from an inner part of the chain differently. A
/// failure is handled by the innermost boundary that sees it and by no
/// other.
///
/// Handling state lives in one `guard` call and nowhere else. Rendering
/// cannot re-enter a boundary: a renderer is a plain synchronous function
/// with no handle on the chain, it runs under `catch_unwind`, and if it
/// fails the answer is a fixed plain-text 500 that involves no renderer.
pub struct ErrorBoundary {
    renderer: Box<dyn ErrorRenderer>,
    debug: bool,
}

impl Default for ErrorBoundary {
    fn default() -> Self {
        Self { renderer: Box::new(HtmlRenderer), debug: false }
    }
}

impl ErrorBoundary {
    pub fn new(renderer: impl ErrorRenderer) -> Self {
        Self::default().with_boxed_renderer(Box::new(renderer))
    }

    pub(crate) fn with_boxed_renderer(mut self, renderer: Box<dyn ErrorRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Awaits `fut`, converting an `Err` or a panic into a 500.
    pub async fn guard<F>(&self, fut: F) -> Response
    where
        F: Future<Output = Result<Response, Error>> + Send,
    {
        let failure = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(res)) => return res,
            Ok(Err(e)) => e,
            Err(payload) => Error::from_panic(payload),
        };
        self.respond(&failure)
    }

    fn respond(&self, failure: &Error) -> Response {
        error!(kind = failure.kind(), causes = ?failure.causes(), "unhandled failure: {failure}");

        let rendered = panic::catch_unwind(AssertUnwindSafe(|| self.renderer.render(failure, self.debug)));

        match rendered {
            Ok(Ok(page)) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .bytes(page.content_type, page.body),
            Ok(Err(render_err)) => {
                error!(kind = render_err.kind(), "error renderer failed: {render_err}");
                minimal_500()
            }
            Err(payload) => {
                let render_err = Error::from_panic(payload);
                error!("error renderer panicked: {render_err}");
                minimal_500()
            }
        }
    }
}

#[async_trait]
impl Middleware for ErrorBoundary {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        Ok(self.guard(next.run(req)).await)
    }
}

/// The response used when rendering itself is not possible.
fn minimal_500() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .bytes(ContentType::Text, "Internal Server Error")
}
