use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tracing::warn;

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Puts a deadline on the rest of the chain.
///
/// When it passes, the inner future is dropped and the client gets
/// `504 Gateway Timeout`. Place it outside anything whose latency it should
/// bound.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    limit: Duration,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        let path = req.path().to_owned();
        match tokio::time::timeout(self.limit, next.run(req)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%path, limit_ms = self.limit.as_millis() as u64, "request timed out");
                Ok(Response::status(StatusCode::GATEWAY_TIMEOUT))
            }
        }
    }
}
