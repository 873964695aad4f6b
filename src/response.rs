//! Outgoing HTTP response type and the conversion traits handlers return through.
//!
//! Build a [`Response`] in your handler and return it. If you would rather
//! let the client's `Accept` header pick the wire format, return
//! [`Response::payload`] and put a
//! [`ContentNegotiation`](crate::middleware::ContentNegotiation) layer in
//! the pipeline.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values used by the built-in serialisers and renderers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,  // text/html; charset=utf-8
    Json,  // application/json
    Text,  // text/plain; charset=utf-8
    Xml,   // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
            Self::Xml  => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use weft::{Response, StatusCode};
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    payload: Option<serde_json::Value>,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Html, body.into())
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// `200 OK` carrying a raw value that has not been serialised yet.
    ///
    /// Content negotiation picks the format; without it the value is sent
    /// as JSON.
    pub fn payload(value: serde_json::Value) -> Self {
        Self::builder().payload(value)
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets (replaces) a header. Invalid names or values are dropped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.insert(name, value);
        }
    }

    /// Adds a header value, keeping existing ones (`set-cookie`).
    pub fn append_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
    }

    /// `true` while the body is still an unserialised payload.
    pub fn is_payload(&self) -> bool { self.payload.is_some() }

    pub fn take_payload(&mut self) -> Option<serde_json::Value> {
        self.payload.take()
    }

    /// Replaces the body and its content type.
    pub fn set_body(&mut self, content_type: ContentType, body: impl Into<Bytes>) {
        self.payload = None;
        self.body = body.into();
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    /// Converts into the `http` type hyper writes to the wire.
    ///
    /// A payload nobody negotiated is encoded as JSON here.
    pub fn into_inner(mut self) -> http::Response<Full<Bytes>> {
        if let Some(value) = self.payload.take() {
            match serde_json::to_vec(&value) {
                Ok(bytes) => self.set_body(ContentType::Json, bytes),
                Err(e) => {
                    tracing::error!("payload serialisation failed: {e}");
                    return Response::status(StatusCode::INTERNAL_SERVER_ERROR).into_inner();
                }
            }
        }
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Invalid names or values are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into())
    }

    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        let mut res = self.no_body();
        res.set_body(content_type, body);
        res
    }

    pub fn payload(self, value: serde_json::Value) -> Response {
        let mut res = self.no_body();
        res.payload = Some(value);
        res
    }

    /// Terminate with no body (e.g. `204`, `304`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new(), payload: None }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Response { Response::payload(self) }
}

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// What a handler may return: anything [`IntoResponse`], or a `Result`
/// whose error converts into [`Error`] and is caught by the error boundary.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Response, Error>;
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoResponse,
    E: Into<Error>,
{
    fn into_outcome(self) -> Result<Response, Error> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

macro_rules! infallible_outcome {
    ($($ty:ty),*) => {
        $(impl IntoOutcome for $ty {
            fn into_outcome(self) -> Result<Response, Error> { Ok(self.into_response()) }
        })*
    };
}

infallible_outcome!(Response, &'static str, String, StatusCode, serde_json::Value);
