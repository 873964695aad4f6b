use std::fmt;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Settings for [`Auth`].
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// The bearer token every protected request must present.
    pub token: String,
    /// Realm advertised in the `WWW-Authenticate` challenge.
    pub realm: String,
    /// Paths that skip authentication. See [`PathMatcher`] for the syntax.
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            realm: "Protected".to_owned(),
            public_paths: vec!["/".to_owned()],
        }
    }
}

// The token is a secret; keep it out of logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &"<redacted>")
            .field("realm", &self.realm)
            .field("public_paths", &self.public_paths)
            .finish()
    }
}

/// Static bearer-token authentication.
///
/// Requests to a public path pass straight through. Everything else needs
/// `Authorization: Bearer <token>` with the configured token, compared in
/// constant time; otherwise the chain stops with `401` and a
/// `WWW-Authenticate: Bearer realm="…"` challenge. An empty configured
/// token rejects every protected request.
#[derive(Debug)]
pub struct Auth {
    config: AuthConfig,
    challenge: String,
}

impl Auth {
    pub fn new(config: AuthConfig) -> Self {
        let challenge = format!("Bearer realm=\"{}\"", config.realm.replace('"', "'"));
        Self { config, challenge }
    }

    fn credential_ok(&self, req: &Request) -> bool {
        let Some(presented) = req.header("authorization").and_then(bearer_token) else {
            return false;
        };
        !self.config.token.is_empty()
            && constant_time_eq(presented.as_bytes(), self.config.token.as_bytes())
    }
}

#[async_trait]
impl Middleware for Auth {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        if PathMatcher::is_match(req.path(), &self.config.public_paths) {
            return next.run(req).await;
        }
        if self.credential_ok(&req) {
            return next.run(req).await;
        }
        debug!(path = req.path(), "rejecting unauthenticated request");
        Ok(Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("www-authenticate", &self.challenge)
            .no_body())
    }
}

/// Extracts the credential from `Bearer <token>`; the scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Compares two byte strings without short-circuiting on the first
/// mismatching byte. Length differences still return early.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Path allow-list matching.
///
/// A pattern matches when it is
/// - `*` or `/*`: everything;
/// - `prefix*`: any path starting with `prefix`;
/// - equal to the path;
/// - a glob (`*` any run, `?` one character) matching the path, ignoring
///   ASCII case.
pub struct PathMatcher;

impl PathMatcher {
    pub fn is_match<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
        patterns.iter().map(AsRef::as_ref).any(|pattern| {
            if pattern == "*" || pattern == "/*" {
                return true;
            }
            if let Some(prefix) = pattern.strip_suffix('*') {
                if path.starts_with(prefix.trim_end_matches('*')) {
                    return true;
                }
            }
            pattern == path || glob_match(pattern, path)
        })
    }
}

/// Iterative wildcard match with single-star backtracking, per character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
