use std::borrow::Cow;

use crate::http::{header, Body, Bytes, HeaderValue, Response, StatusCode};

/// A type that can be converted into an HTTP response.
///
/// Handlers may return any `Respond` type; the shim converts it before
/// translating the response for the platform.
pub trait Respond {
    /// Convert into an HTTP response.
    fn respond(self) -> Response;

    /// Returns a new responder that adds the provided status
    /// code to the response.
    fn with_status(self, status: StatusCode) -> (StatusCode, Self)
    where
        Self: Sized,
    {
        (status, self)
    }
}

impl Respond for () {
    fn respond(self) -> Response {
        Response::default()
    }
}

impl Respond for Response {
    fn respond(self) -> Response {
        self
    }
}

impl<T> Respond for (StatusCode, T)
where
    T: Respond,
{
    fn respond(self) -> Response {
        let mut response = self.1.respond();
        *response.status_mut() = self.0;
        response
    }
}

macro_rules! with_content_type {
    ($($ty:ty $(|$into:ident)? => $content_type:literal),* $(,)?) => { $(
        impl Respond for $ty {
            fn respond(self) -> Response {
                let mut response = Response::new(Body::once(self $(.$into())?));
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static($content_type));
                response
            }
        })*
    }
}

with_content_type! {
    Bytes => "application/octet-stream",
    Vec<u8> => "application/octet-stream",
    &'static [u8] => "application/octet-stream",
    Cow<'static, [u8]> | into_owned => "application/octet-stream",
    String => "text/plain; charset=utf-8",
    &'static str => "text/plain; charset=utf-8",
    Cow<'static, str> | into_owned => "text/plain; charset=utf-8",
    serde_json::Value | to_string => "application/json",
}
