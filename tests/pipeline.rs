use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weft::middleware::{
    Csrf, CsrfToken, ErrorBoundary, MemorySessionStore, Middleware, Next, from_fn,
};
use weft::render::{ErrorRenderer, JsonRenderer, Rendered};
use weft::{Config, Error, Pipeline, Request, Response, Router, StatusCode};

type Log = Arc<Mutex<Vec<String>>>;

fn tracer(name: &'static str, log: Log) -> impl Middleware {
    from_fn(move |req: Request, next: Next| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(format!("{name} in"));
            let res = next.run(req).await?;
            log.lock().unwrap().push(format!("{name} out"));
            Ok::<_, Error>(res)
        }
    })
}

fn counting_terminal(calls: Arc<AtomicUsize>) -> impl Fn(Request) -> std::future::Ready<Response> + Send + Sync + 'static {
    move |_req| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Response::text("terminal"))
    }
}

fn body(res: &Response) -> String {
    String::from_utf8_lossy(res.body()).into_owned()
}

#[tokio::test]
async fn middlewares_run_in_order_and_unwind_in_reverse() {
    let log: Log = Arc::default();
    let terminal_log = log.clone();
    let pipeline = Pipeline::builder()
        .with(tracer("a", log.clone()))
        .with(tracer("b", log.clone()))
        .with(tracer("c", log.clone()))
        .build(move |_req: Request| {
            let log = terminal_log.clone();
            async move {
                log.lock().unwrap().push("terminal".to_owned());
                Response::text("ok")
            }
        });

    let res = pipeline.handle(Request::get("/")).await;

    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        *log.lock().unwrap(),
        ["a in", "b in", "c in", "terminal", "c out", "b out", "a out"]
    );
}

#[tokio::test]
async fn short_circuit_skips_the_rest_of_the_chain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let pipeline = Pipeline::builder()
        .with(tracer("outer", log.clone()))
        .with(from_fn(|_req: Request, _next: Next| async {
            Ok::<_, Error>(Response::status(StatusCode::UNAUTHORIZED))
        }))
        .with(tracer("inner", log.clone()))
        .build(counting_terminal(calls.clone()));

    let res = pipeline.handle(Request::get("/")).await;

    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(*log.lock().unwrap(), ["outer in", "outer out"]);
}

#[tokio::test]
async fn terminal_runs_once_per_request() {
    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let pipeline = Pipeline::builder()
        .with(tracer("a", log.clone()))
        .with(tracer("b", log))
        .build(counting_terminal(calls.clone()));

    for _ in 0..3 {
        let res = pipeline.handle(Request::get("/")).await;
        assert_eq!(body(&res), "terminal");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_pipeline_is_the_terminal_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder().build(counting_terminal(calls.clone()));

    let res = pipeline.handle(Request::get("/")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), "terminal");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_terminal_becomes_a_generic_500() {
    let pipeline = Pipeline::builder()
        .build(|_req: Request| async { Err::<Response, _>(Error::msg("connection pool exhausted")) });

    let res = pipeline.handle(Request::get("/")).await;

    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
    assert!(!body(&res).contains("connection pool exhausted"));
}

#[tokio::test]
async fn debug_mode_exposes_failure_details() {
    let pipeline = Pipeline::builder()
        .debug(true)
        .build(|_req: Request| async { Err::<Response, _>(Error::msg("connection pool exhausted")) });

    let res = pipeline.handle(Request::get("/")).await;
    assert!(body(&res).contains("connection pool exhausted"));
}

#[tokio::test]
async fn panicking_middleware_becomes_a_500() {
    let pipeline = Pipeline::builder()
        .with(from_fn(|req: Request, next: Next| async move {
            if req.path() == "/boom" {
                panic!("index out of bounds");
            }
            next.run(req).await
        }))
        .build(|_req: Request| async { "fine" });

    let res = pipeline.handle(Request::get("/boom")).await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let res = pipeline.handle(Request::get("/ok")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), "fine");
}

struct BrokenRenderer;

impl ErrorRenderer for BrokenRenderer {
    fn render(&self, _: &Error, _: bool) -> Result<Rendered, Error> {
        Err(Error::msg("template not found"))
    }
}

#[tokio::test]
async fn failing_renderer_falls_back_to_plain_text() {
    let pipeline = Pipeline::builder()
        .renderer(BrokenRenderer)
        .build(|_req: Request| async { Err::<Response, _>(Error::msg("boom")) });

    let res = pipeline.handle(Request::get("/")).await;

    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(body(&res), "Internal Server Error");
}

#[tokio::test]
async fn inner_boundary_handles_its_own_failures() {
    let pipeline = Pipeline::builder()
        .with(ErrorBoundary::new(JsonRenderer))
        .build(|_req: Request| async { Err::<Response, _>(Error::msg("boom")) });

    let res = pipeline.handle(Request::get("/")).await;

    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let doc: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(doc["error"], true);
}

#[tokio::test]
async fn config_built_pipeline_authenticates_and_limits() {
    let config = Config::from_toml_str(
        r#"
        [auth]
        token = "s3cret"
        public_paths = ["/", "/docs/*"]

        [rate_limit]
        limit = 3
        "#,
    )
    .unwrap();
    let app = Router::new()
        .get("/", |_req: Request| async { "home" })
        .get("/docs/{page}", |_req: Request| async { "docs" })
        .get("/private", |_req: Request| async { "secret" });
    let pipeline = Pipeline::from_config(&config, app);

    let res = pipeline.handle(Request::get("/docs/intro")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("2"));

    let res = pipeline.handle(Request::get("/private")).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.header("www-authenticate"), Some("Bearer realm=\"Protected\""));

    let res = pipeline
        .handle(Request::get("/private").with_header("authorization", "Bearer s3cret"))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), "secret");

    // Auth runs before the limiter, so the rejected request was not counted.
    let res = pipeline.handle(Request::get("/")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("0"));

    let res = pipeline.handle(Request::get("/")).await;
    assert_eq!(res.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.header("retry-after").is_some());
}

#[tokio::test]
async fn csrf_token_round_trip() {
    let store = Arc::new(MemorySessionStore::new());
    let app = Router::new()
        .get("/form", |req: Request| async move {
            req.attribute::<CsrfToken>().map(|t| t.0.clone()).unwrap_or_default()
        })
        .post("/form", |_req: Request| async { "saved" });
    let pipeline = Pipeline::builder().with(Csrf::new(store)).build(app);

    let res = pipeline
        .handle(Request::get("/form").with_header("cookie", "session_id=abc"))
        .await;
    let token = body(&res);
    assert_eq!(token.len(), 64);

    let res = pipeline
        .handle(
            Request::post("/form")
                .with_header("cookie", "session_id=abc")
                .with_header("content-type", "application/x-www-form-urlencoded")
                .with_body(format!("name=x&_csrf={token}")),
        )
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(body(&res), "saved");

    let res = pipeline
        .handle(
            Request::post("/form")
                .with_header("cookie", "session_id=abc")
                .with_header("x-csrf-token", "forged"),
        )
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res), "Invalid CSRF token");
}

#[tokio::test]
async fn negotiation_serialises_payloads_from_the_router() {
    let app = Router::new().get("/user", |_req: Request| async {
        Response::payload(serde_json::json!({ "name": "ada" }))
    });
    let pipeline = Pipeline::builder()
        .with(weft::middleware::ContentNegotiation::new())
        .build(app);

    let res = pipeline
        .handle(Request::get("/user").with_header("accept", "application/xml"))
        .await;
    assert_eq!(res.header("content-type"), Some("application/xml"));
    assert!(body(&res).contains("<name>ada</name>"));

    let res = pipeline.handle(Request::get("/user")).await;
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(body(&res), r#"{"name":"ada"}"#);
}
