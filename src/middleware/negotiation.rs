use async_trait::async_trait;
use serde_json::Value;

use super::{Middleware, Next};
use crate::error::Error;
use crate::render::escape_html;
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Serialises [`Response::payload`] bodies according to the `Accept` header.
///
/// Responses that already carry bytes pass through untouched. For a payload
/// the client's media ranges are tried in preference order; the first one
/// this layer can produce wins:
///
/// | Accept | Body |
/// |---|---|
/// | `application/json`, `*/*` | JSON |
/// | `application/xml`, `text/xml` | `<root>` XML document |
/// | `text/html` | escaped, pretty-printed JSON in a `<pre>` |
///
/// Nothing recognisable falls back to JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentNegotiation;

impl ContentNegotiation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for ContentNegotiation {
    async fn process(&self, req: Request, next: Next) -> Result<Response, Error> {
        let accept = req.header("accept").unwrap_or_default().to_owned();
        let mut res = next.run(req).await?;
        let Some(value) = res.take_payload() else {
            return Ok(res);
        };

        let format = parse_accept(&accept)
            .iter()
            .find_map(|mime| match mime.as_str() {
                "application/json" | "*/*" => Some(ContentType::Json),
                "application/xml" | "text/xml" => Some(ContentType::Xml),
                "text/html" => Some(ContentType::Html),
                _ => None,
            })
            .unwrap_or(ContentType::Json);

        let body = match format {
            ContentType::Xml => to_xml(&value),
            ContentType::Html => format!(
                "<pre>{}</pre>",
                escape_html(&serde_json::to_string_pretty(&value)?)
            ),
            _ => serde_json::to_string(&value)?,
        };
        res.set_body(format, body);
        res.set_header("vary", "Accept");
        Ok(res)
    }
}

/// Media types from an `Accept` header, most preferred first.
///
/// Sorted by descending `q` (default `1`); equal weights keep header order.
/// Ranges with `q=0` are dropped. An empty header means `*/*`.
pub fn parse_accept(header: &str) -> Vec<String> {
    if header.trim().is_empty() {
        return vec!["*/*".to_owned()];
    }
    let mut ranked: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let mime = pieces.next()?.trim().to_ascii_lowercase();
            if mime.is_empty() {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|v| v.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then_some((mime, q))
        })
        .collect();
    // `sort_by` is stable, so ties keep header order.
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().map(|(mime, _)| mime).collect()
}

fn to_xml(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<root>");
    write_xml(&mut out, value);
    out.push_str("</root>\n");
    out
}

fn write_xml(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let tag = xml_name(key);
                out.push('<');
                out.push_str(&tag);
                out.push('>');
                write_xml(out, child);
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
            }
        }
        Value::Array(items) => {
            for child in items {
                out.push_str("<item>");
                write_xml(out, child);
                out.push_str("</item>");
            }
        }
        Value::Null => {}
        Value::String(s) => out.push_str(&escape_html(s)),
        other => out.push_str(&other.to_string()),
    }
}

/// Maps an object key to a legal element name.
fn xml_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}
