//! # weft
//!
//! An async HTTP middleware pipeline.
//!
//! A request enters a [`Pipeline`], passes through an ordered list of
//! [`Middleware`](middleware::Middleware) layers, reaches a terminal
//! [`Handler`] (usually a [`Router`]), and the response travels back out
//! through the same layers in reverse. Any layer may answer on its own
//! without calling the rest of the chain.
//!
//! An error boundary always wraps the whole chain. Whatever escapes a layer
//! or the handler, an `Err` or a panic, is logged and turned into a 500
//! response by an [`ErrorRenderer`](render::ErrorRenderer).
//!
//! Reference layers live in [`middleware`]: bearer auth, CSRF, content
//! negotiation, access logging, a fixed-window rate limiter with a shared
//! store and a local fallback, and a request timeout.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weft::middleware::{ContentNegotiation, Logging, RateLimit, RateLimitConfig};
//! use weft::{Pipeline, Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weft::Error> {
//!     let app = Router::new().get("/users/{id}", get_user);
//!
//!     let pipeline = Pipeline::builder()
//!         .with(Logging::new())
//!         .with(RateLimit::new(RateLimitConfig::default()))
//!         .with(ContentNegotiation::new())
//!         .build(app);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(pipeline).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::payload(serde_json::json!({ "id": id }))
//! }
//! ```

pub mod config;
mod error;
mod handler;
pub mod middleware;
mod pipeline;
pub mod render;
mod request;
mod response;
mod router;
mod server;

pub use http::{Method, StatusCode};

pub use config::Config;
pub use error::{BoxError, Error};
pub use handler::Handler;
pub use pipeline::{Pipeline, PipelineBuilder, compose};
pub use request::{Request, Subject};
pub use response::{ContentType, IntoOutcome, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
