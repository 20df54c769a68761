//! Turns platform requests into canonical [`Request`]s.
//!
//! Platforms only differ in how they expose the pieces of a request. The
//! rules for putting those pieces back together live here:
//!
//! - a request target without scheme and authority is made absolute from the
//!   forwarding headers, falling back to [`Config`] defaults
//! - `GET` and `HEAD` requests never carry a body
//! - a body the platform already parsed wins over the raw bytes

use crate::http::{header, Body, Bytes, HeaderMap, Method, Request, Uri};
use crate::{Config, Error};

use http::request::Parts;
use http::uri::{Authority, PathAndQuery, Scheme};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// A body that the platform has already parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedBody {
    /// Used verbatim.
    Text(String),
    /// Passed through unchanged.
    Binary(Bytes),
    /// Serialized to JSON text.
    Structured(serde_json::Value),
}

impl From<String> for ParsedBody {
    fn from(text: String) -> Self {
        ParsedBody::Text(text)
    }
}

impl From<Bytes> for ParsedBody {
    fn from(bytes: Bytes) -> Self {
        ParsedBody::Binary(bytes)
    }
}

impl From<serde_json::Value> for ParsedBody {
    fn from(value: serde_json::Value) -> Self {
        ParsedBody::Structured(value)
    }
}

/// Returns `false` for methods whose requests never carry a body.
pub fn has_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Parse a method name as sent by the platform.
pub fn parse_method(method: &str) -> Result<Method, Error> {
    Method::from_bytes(method.as_bytes())
        .map_err(|err| Error::malformed_by(format!("invalid method {:?}", method), err))
}

/// Resolve a request target into an absolute URI.
///
/// Absolute targets are returned as is. Anything else is treated as a path
/// (and query) and joined with the scheme from `x-forwarded-proto` and the
/// authority from `x-forwarded-host` or `host`. Missing headers fall back to
/// the configured defaults, so only a target or header value that is not
/// valid URI syntax fails.
pub fn resolve_uri(target: &str, headers: &HeaderMap, config: &Config) -> Result<Uri, Error> {
    if let Ok(uri) = target.parse::<Uri>() {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri);
        }
    }

    let scheme = forwarded(headers, X_FORWARDED_PROTO)
        .unwrap_or_else(|| config.scheme())
        .to_ascii_lowercase();
    let scheme = scheme
        .parse::<Scheme>()
        .map_err(|err| Error::malformed_by(format!("invalid scheme {:?}", scheme), err))?;

    let host = forwarded(headers, X_FORWARDED_HOST)
        .or_else(|| forwarded(headers, header::HOST.as_str()))
        .unwrap_or_else(|| config.host());
    let authority = host
        .parse::<Authority>()
        .map_err(|err| Error::malformed_by(format!("invalid host {:?}", host), err))?;

    let path = match target {
        "" => PathAndQuery::from_static("/"),
        target if target.starts_with('/') => target
            .parse::<PathAndQuery>()
            .map_err(|err| Error::malformed_by(format!("invalid path {:?}", target), err))?,
        target => format!("/{}", target)
            .parse::<PathAndQuery>()
            .map_err(|err| Error::malformed_by(format!("invalid path {:?}", target), err))?,
    };

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path)
        .build()
        .map_err(|err| Error::malformed_by("failed to build request url", err))
}

// the first entry of a possibly comma separated forwarding header
fn forwarded<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Pick the request body.
///
/// In order: parsed text, parsed binary, a parsed structured value serialized
/// to JSON, then the raw buffer. Methods without a body get none, whatever
/// the platform provided.
pub fn extract_body(method: &Method, parsed: Option<ParsedBody>, raw: Option<Bytes>) -> Body {
    if !has_body(method) {
        return Body::empty();
    }

    match (parsed, raw) {
        (Some(ParsedBody::Text(text)), _) => Body::once(text),
        (Some(ParsedBody::Binary(bytes)), _) => Body::once(bytes),
        (Some(ParsedBody::Structured(value)), _) => Body::once(value.to_string()),
        (None, Some(raw)) => Body::once(raw),
        (None, None) => Body::empty(),
    }
}

/// Read a streamed body into memory.
pub async fn buffer(body: Body) -> Result<Bytes, Error> {
    body.bytes()
        .await
        .map_err(|err| Error::malformed_by("failed to read request body", err))
}

/// Normalize a request whose body may still be a stream.
///
/// The URI is made absolute and the body is buffered, or dropped for methods
/// without one.
pub async fn normalize(parts: Parts, body: Body, config: &Config) -> Result<Request, Error> {
    let target = parts
        .uri
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");

    let uri = match (parts.uri.scheme(), parts.uri.authority()) {
        (Some(_), Some(_)) => parts.uri.clone(),
        _ => resolve_uri(target, &parts.headers, config)?,
    };

    let body = if has_body(&parts.method) {
        match buffer(body).await? {
            bytes if bytes.is_empty() => Body::empty(),
            bytes => Body::once(bytes),
        }
    } else {
        Body::empty()
    };

    let mut request = Request::new(body);
    *request.method_mut() = parts.method;
    *request.uri_mut() = uri;
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers;
    *request.extensions_mut() = parts.extensions;
    Ok(request)
}
