use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Per-request access log: method, uri, resulting status, elapsed time.
///
/// Emits a `debug` event on entry and an `info` event on exit. Never touches
/// the response. A failure passing through is logged at `warn` and
/// propagated untouched for the error boundary to handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logging;

impl Logging {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for Logging {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!(%method, %uri, "request received");

        let start = Instant::now();
        let outcome = next.run(req).await;
        let elapsed_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

        match &outcome {
            Ok(res) => info!(
                %method,
                %uri,
                status = res.status_code().as_u16(),
                elapsed_ms,
                "request completed"
            ),
            Err(e) => warn!(
                %method,
                %uri,
                elapsed_ms,
                "request failed: {e}"
            ),
        }
        outcome
    }
}
