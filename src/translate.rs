//! Turns canonical [`Response`]s into what the platform expects.

use crate::http::{header, status_text, HeaderMap, HeaderName, HeaderValue, Response};
use crate::platform::node::Sink;
use crate::Error;

/// Headers whose value depends on how the bytes are finally transmitted.
///
/// These are never forwarded to a [`Sink`], the sink computes them itself.
pub const FRAMING_HEADERS: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

pub fn is_framing_header(name: &HeaderName) -> bool {
    FRAMING_HEADERS.contains(name)
}

/// Declare UTF-8 on HTML responses that do not declare a charset.
///
/// Some platforms assume a different default encoding for HTML.
pub fn ensure_utf8_charset(headers: &mut HeaderMap) {
    let value = match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(value) => value.trim().trim_end_matches(';').to_owned(),
        None => return,
    };

    let value = match value.to_ascii_lowercase().parse::<mime::Mime>() {
        Ok(mime) => {
            if mime.type_() != mime::TEXT
                || mime.subtype() != mime::HTML
                || mime.get_param(mime::CHARSET).is_some()
            {
                return;
            }
            value
        }
        Err(_) => match salvage_html(&value) {
            Some(value) => value,
            None => return,
        },
    };

    if let Ok(value) = HeaderValue::from_str(&format!("{}; charset=utf-8", value)) {
        headers.insert(header::CONTENT_TYPE, value);
    }
}

// An HTML content type `mime` refuses to parse, with its malformed
// parameters dropped. `None` if it is not HTML or already names a charset.
fn salvage_html(value: &str) -> Option<String> {
    let mut params = value.split(';').map(str::trim);
    let essence = params.next()?;
    if !essence.eq_ignore_ascii_case("text/html") {
        return None;
    }

    let mut kept = vec![essence];
    for param in params {
        match param.split_once('=') {
            Some((name, val)) if !name.trim().is_empty() && !val.trim().is_empty() => {
                if name.trim().eq_ignore_ascii_case("charset") {
                    return None;
                }
                kept.push(param);
            }
            _ => {}
        }
    }

    Some(kept.join("; "))
}

/// Translate for platforms that take a response value.
///
/// The response is returned as is apart from the charset rule.
pub fn for_fetch(mut response: Response) -> Response {
    ensure_utf8_charset(response.headers_mut());
    response
}

/// Translate for platforms that expose a write-based response sink.
///
/// The body is read in full, then the status, the headers minus the framing
/// ones, and the body are written. The sink is ended exactly once, on success.
pub async fn to_sink<S>(response: Response, sink: &mut S) -> Result<(), Error>
where
    S: Sink + ?Sized,
{
    let reason = status_text(&response).map(str::to_owned);
    let (mut parts, body) = response.into_parts();
    ensure_utf8_charset(&mut parts.headers);

    // a failing body stream belongs to the handler
    let body = body.bytes().await.map_err(Error::handler)?;

    if sink.headers_sent() {
        return Err(Error::translation("response already started"));
    }

    sink.set_status(parts.status, reason.as_deref());
    for (name, value) in parts.headers.iter() {
        if !is_framing_header(name) {
            sink.append_header(name, value);
        }
    }

    sink.end(body)
        .await
        .map_err(|err| Error::translation_by("failed to write response body", err))
}
