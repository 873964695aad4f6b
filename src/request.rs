//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri};

/// Identity of the authenticated caller, attached by an auth layer.
///
/// The rate limiter buckets requests by subject when one is present and by
/// client IP otherwise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subject(pub String);

/// An incoming HTTP request.
///
/// Immutable from a handler's point of view except for typed attributes,
/// which middlewares use to hand data down the chain.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    extensions: Extensions,
}

impl Request {
    /// A bodiless request. Hosts and tests add the rest with the `with_*` methods.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            remote_addr: None,
            extensions: Extensions::new(),
        }
    }

    /// Shorthand for tests: `Request::get("/users/1")`.
    ///
    /// # Panics
    ///
    /// Panics if `uri` is not a valid request target.
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri.parse().expect("invalid request uri"))
    }

    /// Shorthand for tests: `Request::post("/users")`.
    ///
    /// # Panics
    ///
    /// Panics if `uri` is not a valid request target.
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri.parse().expect("invalid request uri"))
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes, remote_addr: SocketAddr) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr: Some(remote_addr),
            extensions: parts.extensions,
        }
    }

    /// Adds a header. Names or values that are not valid HTTP are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        self.with_attribute(Subject(subject.into()))
    }

    pub fn with_attribute<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn query(&self) -> Option<&str> { self.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn attribute<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub fn insert_attribute<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(value);
    }

    /// The authenticated subject id, if an auth layer attached one.
    pub fn subject(&self) -> Option<&str> {
        self.attribute::<Subject>().map(|s| s.0.as_str())
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    /// Value of a cookie sent in the `Cookie` header(s).
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Looks up a field in an `application/x-www-form-urlencoded` or
    /// `application/json` (top-level string) body.
    pub fn form_field(&self, name: &str) -> Option<String> {
        let content_type = self.header("content-type").unwrap_or_default();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            url::form_urlencoded::parse(&self.body)
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        } else if content_type.starts_with("application/json") {
            let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
            value.get(name)?.as_str().map(str::to_owned)
        } else {
            None
        }
    }
}
