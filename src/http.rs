//! Canonical HTTP types shared by every platform.

use crate::bounded::{BoxError, BoxStream};

use std::borrow::Cow;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::{fmt, mem};

pub use bytes::Bytes;
pub use http::request::Builder as RequestBuilder;
pub use http::response::Builder as ResponseBuilder;
pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use bytes::BytesMut;
use futures_core::Stream;

/// A platform-independent HTTP request.
///
/// Once produced by the normalizer its body is fully buffered, so the request
/// can outlive whatever platform object it was read from.
pub type Request = http::Request<Body>;

/// A platform-independent HTTP response.
pub type Response = http::Response<Body>;

/// Represents the body of an HTTP message.
#[non_exhaustive]
pub enum Body {
    Stream(BoxStream<'static, Result<Bytes, BoxError>>),
    Once(Bytes),
    Empty,
}

impl Body {
    /// Create a `Body` from a stream of bytes.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        pin_project_lite::pin_project! {
            struct MapErr<S> { #[pin] inner: S }
        }

        impl<T, E, S> Stream for MapErr<S>
        where
            E: Into<BoxError>,
            S: Stream<Item = Result<T, E>>,
        {
            type Item = Result<T, BoxError>;

            fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
                self.project()
                    .inner
                    .poll_next(cx)
                    .map(|item| item.map(|res| res.map_err(Into::into)))
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                self.inner.size_hint()
            }
        }

        Self::Stream(Box::pin(MapErr { inner: stream }))
    }

    /// Create a body directly from bytes.
    pub fn once(bytes: impl Into<Bytes>) -> Self {
        Self::Once(bytes.into())
    }

    /// Create an empty `Body`.
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Returns `true` if this body is known to carry no bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Once(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    /// Attempt to clone the body.
    ///
    /// Returns `None` for streams, which cannot be cloned.
    pub fn try_clone(&self) -> Option<Body> {
        match self {
            Self::Stream(_) => None,
            Self::Once(bytes) => Some(Self::Once(bytes.clone())),
            Self::Empty => Some(Self::Empty),
        }
    }

    /// Read the whole body into memory.
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        let mut stream = match self {
            Self::Once(bytes) => return Ok(bytes),
            Self::Empty => return Ok(Bytes::new()),
            Self::Stream(stream) => stream,
        };

        let mut buf = BytesMut::new();
        while let Some(chunk) = poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
            buf.extend_from_slice(&chunk?);
        }

        Ok(buf.freeze())
    }

    /// Read the whole body into memory, decoding it as UTF-8.
    ///
    /// Invalid sequences are replaced rather than rejected.
    pub async fn text(self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Body::Stream"),
            Self::Once(bytes) => f.debug_tuple("Body::Once").field(bytes).finish(),
            Self::Empty => f.write_str("Body::Empty"),
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut *self {
            Self::Stream(stream) => stream.as_mut().poll_next(cx),
            Self::Once(bytes) => {
                let bytes = mem::take(bytes);
                *self = Self::Empty;
                Some(Ok(bytes)).into()
            }
            Self::Empty => None.into(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Stream(stream) => stream.size_hint(),
            Self::Once(bytes) => (bytes.len(), Some(bytes.len())),
            Self::Empty => (0, Some(0)),
        }
    }
}

macro_rules! body_from {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for Body {
            fn from(value: $ty) -> Self {
                Body::once(value)
            }
        }
    )*}
}

body_from! {
    Bytes,
    Vec<u8>,
    String,
    &'static str,
    &'static [u8],
}

/// A reason phrase attached to a response.
///
/// Stored in the response extensions. When absent, the canonical reason for
/// the status code is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusText(pub Cow<'static, str>);

/// Returns the reason phrase of a response.
pub fn status_text(response: &Response) -> Option<&str> {
    response
        .extensions()
        .get::<StatusText>()
        .map(|text| text.0.as_ref())
        .or_else(|| response.status().canonical_reason())
}
