use crate::boundary::ErrorRecord;
use crate::config::Fallback;
use crate::http::{header, Body, HeaderValue, Response, StatusCode};
use crate::Error;

const LABEL: &str = "Internal Server Error";

/// A failure that can be turned into an HTTP error response.
pub trait Reject {
    /// Produce the 500 response for this failure.
    ///
    /// The body carries a generic label and the failure's message, nothing
    /// more.
    fn reject(&self, fallback: Fallback) -> Response;
}

impl Reject for ErrorRecord {
    fn reject(&self, fallback: Fallback) -> Response {
        fallback_response(&self.message, fallback)
    }
}

impl Reject for Error {
    fn reject(&self, fallback: Fallback) -> Response {
        fallback_response(self.message(), fallback)
    }
}

fn fallback_response(message: &str, fallback: Fallback) -> Response {
    let (content_type, body) = match fallback {
        Fallback::Text => ("text/plain; charset=utf-8", format!("{}: {}", LABEL, message)),
        Fallback::Json => (
            "application/json",
            serde_json::json!({ "error": LABEL, "message": message }).to_string(),
        ),
    };

    let mut response = Response::new(Body::once(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
