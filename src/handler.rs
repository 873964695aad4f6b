//! Terminal handlers and their type-erased form.
//!
//! Every step of a composed chain, user `async fn`s, the [`Router`] and the
//! middleware links built by [`compose`](crate::compose), is stored as a
//! [`BoxedHandler`]:
//!
//! ```text
//! async fn hello(req: Request) -> Result<Response, Error>
//!        ↓ Pipeline::builder().build(hello)
//! Arc::new(FnHandler(hello))            : BoxedHandler
//!        ↓ handler.call(req)
//! Box::pin(async { hello(req).await.into_outcome() })
//! ```
//!
//! A handler's return value goes through [`IntoOutcome`], so plain
//! responses and `Result`s are both accepted; an `Err` travels outward to
//! the nearest error boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoOutcome, Response};
use crate::router::Router;

/// A heap-allocated, type-erased future that resolves to a handler outcome.
///
/// `Send + 'static` let tokio move the future across threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for everything that can terminate a pipeline.
///
/// Satisfied automatically by any `async fn` with the signature
///
/// ```text
/// async fn name(req: Request) -> impl IntoOutcome
/// ```
///
/// and by [`Router`]. The trait is **sealed**: only the impls in this crate
/// can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

impl private::Sealed for Router {}

impl Handler for Router {
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

/// Newtype wrapper bridging a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    async fn fallible(req: Request) -> Result<&'static str, Error> {
        match req.path() {
            "/ok" => Ok("fine"),
            _ => Err(Error::msg("nope")),
        }
    }

    #[tokio::test]
    async fn outcomes_are_normalised() {
        let handler = fallible.into_boxed_handler();

        let res = handler.call(Request::get("/ok")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"fine");

        let err = handler.call(Request::get("/other")).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
