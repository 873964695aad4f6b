//! Failure renderers used by the error boundary.
//!
//! A renderer turns a caught [`Error`] into a body and content type. With
//! `debug == false` the output is deliberately generic: no failure kind, no
//! message, no cause chain. The boundary never trusts a renderer to succeed
//! and falls back to a fixed plain-text 500 if one errors or panics.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::error::Error;
use crate::response::ContentType;

const GENERIC_MESSAGE: &str = "An unexpected error occurred.";

/// A rendered failure body.
#[derive(Debug)]
pub struct Rendered {
    pub body: String,
    pub content_type: ContentType,
}

pub trait ErrorRenderer: Send + Sync + 'static {
    fn render(&self, failure: &Error, debug: bool) -> Result<Rendered, Error>;
}

/// `ERROR: <message>` plus, in debug mode, the failure kind and causes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextRenderer;

impl ErrorRenderer for PlainTextRenderer {
    fn render(&self, failure: &Error, debug: bool) -> Result<Rendered, Error> {
        let mut body = String::from("ERROR: ");
        if !debug {
            body.push_str(GENERIC_MESSAGE);
            body.push('\n');
            return Ok(Rendered { body, content_type: ContentType::Text });
        }
        let _ = writeln!(body, "{failure}");
        let _ = writeln!(body, "\nKind: {}", failure.kind());
        for (i, cause) in failure.causes().iter().enumerate() {
            let _ = writeln!(body, "  #{i} caused by: {cause}");
        }
        Ok(Rendered { body, content_type: ContentType::Text })
    }
}

/// A JSON object: `{"error": true, "message": …, "timestamp": …}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

impl ErrorRenderer for JsonRenderer {
    fn render(&self, failure: &Error, debug: bool) -> Result<Rendered, Error> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut doc = serde_json::json!({
            "error": true,
            "message": if debug { failure.to_string() } else { GENERIC_MESSAGE.to_owned() },
            "timestamp": timestamp,
        });
        if debug {
            doc["debug"] = serde_json::json!({
                "kind": failure.kind(),
                "causes": failure.causes(),
            });
        }
        let body = serde_json::to_string_pretty(&doc)?;
        Ok(Rendered { body, content_type: ContentType::Json })
    }
}

/// A small self-contained HTML error page. All failure text is escaped.
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlRenderer;

impl ErrorRenderer for HtmlRenderer {
    fn render(&self, failure: &Error, debug: bool) -> Result<Rendered, Error> {
        let (title, details) = if debug {
            let mut details = String::from("<ol class=\"causes\">");
            for cause in failure.causes() {
                let _ = write!(details, "<li>{}</li>", escape_html(&cause));
            }
            details.push_str("</ol>");
            (escape_html(&failure.to_string()), details)
        } else {
            (
                "Internal Server Error".to_owned(),
                "<p>An internal server error occurred. Please try again later.</p>".to_owned(),
            )
        };
        let kind = if debug { failure.kind() } else { "Error" };
        let body = format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Error - {kind}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <main class=\"error\">\n<h1>{title}</h1>\n<div class=\"kind\">{kind}</div>\n{details}\n</main>\n\
             </body>\n</html>\n"
        );
        Ok(Rendered { body, content_type: ContentType::Html })
    }
}

const STYLE: &str = "body{font-family:system-ui,sans-serif;background:#f8fafc;color:#1e293b;margin:0}\
.error{max-width:48rem;margin:4rem auto;padding:2rem;background:#fff;border-top:4px solid #dc2626}\
.kind{color:#64748b;font-family:monospace}.causes{font-family:monospace}";

/// Escapes the five HTML-significant characters.
pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&'  => out.push_str("&amp;"),
            '<'  => out.push_str("&lt;"),
            '>'  => out.push_str("&gt;"),
            '"'  => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _    => out.push(c),
        }
    }
    out
}

/// Renderer choice in configuration files.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    #[default]
    Html,
    Json,
    Text,
}

impl ErrorFormat {
    pub fn renderer(self) -> Box<dyn ErrorRenderer> {
        match self {
            Self::Html => Box::new(HtmlRenderer),
            Self::Json => Box::new(JsonRenderer),
            Self::Text => Box::new(PlainTextRenderer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> Error {
        Error::handler(std::io::Error::other("/srv/app/secret.db: <locked>"))
    }

    #[test]
    fn non_debug_output_hides_details() {
        let renderers: [Box<dyn ErrorRenderer>; 3] =
            [Box::new(PlainTextRenderer), Box::new(JsonRenderer), Box::new(HtmlRenderer)];
        for renderer in renderers {
            let rendered = renderer.render(&failure(), false).unwrap();
            assert!(!rendered.body.contains("secret.db"), "{}", rendered.body);
            assert!(!rendered.body.contains("Handler"), "{}", rendered.body);
        }
    }

    #[test]
    fn debug_output_includes_kind_and_cause() {
        let text = PlainTextRenderer.render(&failure(), true).unwrap();
        assert!(text.body.contains("Kind: Handler"));
        assert!(text.body.contains("secret.db"));

        let json = JsonRenderer.render(&failure(), true).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json.body).unwrap();
        assert_eq!(doc["debug"]["kind"], "Handler");
        assert_eq!(json.content_type, ContentType::Json);
    }

    #[test]
    fn html_escapes_failure_text() {
        let html = HtmlRenderer.render(&failure(), true).unwrap();
        assert!(html.body.contains("&lt;locked&gt;"));
        assert!(!html.body.contains("<locked>"));
    }
}
