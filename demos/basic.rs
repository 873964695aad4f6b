//! A small JSON API behind the full middleware stack.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/users/42
//!   curl -i -H 'authorization: Bearer demo-token' http://localhost:3000/users/42
//!   curl -i -H 'authorization: Bearer demo-token' -H 'accept: application/xml' \
//!        http://localhost:3000/users/42
//!   curl -i -X DELETE -H 'authorization: Bearer demo-token' http://localhost:3000/users/42

use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use weft::middleware::{
    Auth, AuthConfig, ContentNegotiation, Logging, RateLimit, RateLimitConfig, Timeout,
};
use weft::render::JsonRenderer;
use weft::{Error, Pipeline, Request, Response, Router, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = Router::new()
        .get("/", index)
        .get("/users/{id}", get_user)
        .delete("/users/{id}", delete_user);

    let auth = AuthConfig {
        token: "demo-token".to_owned(),
        realm: "demo".to_owned(),
        public_paths: vec!["/".to_owned()],
    };
    let rate_limit = RateLimitConfig { limit: 20, window_secs: 60, ..RateLimitConfig::default() };

    let pipeline = Pipeline::builder()
        .renderer(JsonRenderer)
        .with(Logging::new())
        .with(Timeout::new(Duration::from_secs(5)))
        .with(RateLimit::new(rate_limit))
        .with(Auth::new(auth))
        .with(ContentNegotiation::new())
        .build(app);

    Server::bind("0.0.0.0:3000")?.serve(pipeline).await
}

async fn index(_req: Request) -> &'static str {
    "weft demo\n"
}

async fn get_user(req: Request) -> Response {
    match req.param("id").unwrap_or_default().parse::<u64>() {
        Ok(id) => Response::payload(json!({ "id": id, "name": "alice", "roles": ["admin", "dev"] })),
        Err(_) => Response::status(StatusCode::BAD_REQUEST),
    }
}

async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}
