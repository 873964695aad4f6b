use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use http::{Method, StatusCode};
use rand::RngCore;
use serde::Deserialize;
use tracing::debug;

use super::auth::constant_time_eq;
use super::{Middleware, Next};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// Client-scoped key-value storage the CSRF layer keeps its token in.
///
/// `session` identifies the client (the session cookie value). Errors are
/// not swallowed: a store that cannot answer makes the request fail.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get(&self, session: &str, key: &str) -> Result<Option<String>, Error>;
    async fn set(&self, session: &str, key: &str, value: String) -> Result<(), Error>;
}

/// In-process [`SessionStore`]. Entries live as long as the store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session: &str, key: &str) -> Result<Option<String>, Error> {
        Ok(self.sessions.get(session).and_then(|s| s.get(key).cloned()))
    }

    async fn set(&self, session: &str, key: &str, value: String) -> Result<(), Error> {
        self.sessions.entry(session.to_owned()).or_default().insert(key.to_owned(), value);
        Ok(())
    }
}

/// Settings for [`Csrf`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Cookie whose value scopes the session.
    pub cookie: String,
    /// Key the token is stored under inside the session.
    pub session_key: String,
    /// Form / JSON body field checked first.
    pub field: String,
    /// Header checked when the body carries no token.
    pub header: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie: "session_id".to_owned(),
            session_key: "csrf_token".to_owned(),
            field: "_csrf".to_owned(),
            header: "X-CSRF-Token".to_owned(),
        }
    }
}

/// The session's current token, attached to safe requests so handlers can
/// embed it in forms.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsrfToken(pub String);

/// Synchroniser-token CSRF protection.
///
/// `GET`, `HEAD` and `OPTIONS` make sure the session holds a token, minting
/// 32 random bytes (hex) when it does not, and pass through. A client
/// without a session cookie gets a new session id and a
/// `Set-Cookie: <cookie>=<id>; Path=/; HttpOnly; SameSite=Lax` on the
/// response. Every other method must present the same token in the body
/// field or header, compared in constant time, or the chain stops with
/// `400`. A request without a session cookie cannot present a valid token.
pub struct Csrf {
    store: Arc<dyn SessionStore>,
    config: CsrfConfig,
}

impl Csrf {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, CsrfConfig::default())
    }

    pub fn with_config(store: Arc<dyn SessionStore>, config: CsrfConfig) -> Self {
        Self { store, config }
    }

    async fn ensure_token(&self, session: &str) -> Result<String, Error> {
        match self.store.get(session, &self.config.session_key).await? {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                let token = random_hex();
                self.store.set(session, &self.config.session_key, token.clone()).await?;
                debug!("issued csrf token");
                Ok(token)
            }
        }
    }

    async fn token_valid(&self, req: &Request, session: &str) -> Result<bool, Error> {
        let stored = self.store.get(session, &self.config.session_key).await?;
        let presented = req
            .form_field(&self.config.field)
            .or_else(|| req.header(&self.config.header).map(str::to_owned));
        Ok(match (stored, presented) {
            (Some(stored), Some(presented)) if !stored.is_empty() => {
                constant_time_eq(stored.as_bytes(), presented.as_bytes())
            }
            _ => false,
        })
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn random_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl Middleware for Csrf {
    async fn process(&self, mut req: Request, next: Next) -> Result<Response, Error> {
        let session = req.cookie(&self.config.cookie).map(str::to_owned);

        if is_safe(req.method()) {
            let (session, minted) = match session {
                Some(session) => (session, false),
                None => (random_hex(), true),
            };
            let token = self.ensure_token(&session).await?;
            req.insert_attribute(CsrfToken(token));

            let mut res = next.run(req).await?;
            if minted {
                debug!("started csrf session");
                res.append_header(
                    "set-cookie",
                    &format!("{}={session}; Path=/; HttpOnly; SameSite=Lax", self.config.cookie),
                );
            }
            return Ok(res);
        }

        let valid = match &session {
            Some(session) => self.token_valid(&req, session).await?,
            None => false,
        };
        if !valid {
            debug!(method = %req.method(), path = req.path(), "rejecting request with invalid csrf token");
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .text("Invalid CSRF token"));
        }
        next.run(req).await
    }
}
