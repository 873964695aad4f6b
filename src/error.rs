//! Unified error type.

use std::any::Any;

/// A boxed failure from application code or an injected collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by weft's fallible operations.
///
/// Policy rejections (401, 400, 429) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s. An `Error` that
/// escapes a middleware or the terminal handler is caught by the
/// [`ErrorBoundary`](crate::middleware::ErrorBoundary) and turned into a 500.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("session store: {0}")]
    Session(#[source] BoxError),

    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("panicked: {message}")]
    Panic { message: String },

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Wraps any application failure.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// Wraps a session-store failure. CSRF fails closed on these.
    pub fn session(err: impl Into<BoxError>) -> Self {
        Self::Session(err.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Builds an [`Error::Panic`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panic { message }
    }

    /// Short, stable name of the failure class. Shown by renderers in debug mode.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_)             => "Io",
            Self::InvalidAddress(_) => "InvalidAddress",
            Self::Config(_)         => "Config",
            Self::Session(_)        => "Session",
            Self::Serialize(_)      => "Serialize",
            Self::Handler(_)        => "Handler",
            Self::Panic { .. }      => "Panic",
            Self::Message(_)        => "Message",
        }
    }

    /// Messages of every error in the `source()` chain, outermost first,
    /// excluding `self`.
    pub fn causes(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = std::error::Error::source(self);
        while let Some(err) = cur {
            out.push(err.to_string());
            cur = err.source();
        }
        out
    }
}
