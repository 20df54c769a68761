//! Platforms that hand over a request object and a response object to write
//! into, like Node-style serverless runtimes.

use super::Platform;
use crate::http::{Body, Bytes, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use crate::normalize::{self, ParsedBody};
use crate::{translate, Config, Error};

use std::io;
use std::marker::PhantomData;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A request as handed over by a Node-style platform.
///
/// The platform may already have parsed the body, in which case `body` is
/// set, and may additionally expose the raw bytes.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub method: String,
    /// The request target, usually only a path and query.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<ParsedBody>,
    pub raw_body: Option<Bytes>,
}

impl IncomingMessage {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        IncomingMessage {
            method: method.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            raw_body: None,
        }
    }

    /// Append a header.
    ///
    /// Invalid names or values are skipped, a platform could not have
    /// received them.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<ParsedBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn raw_body(mut self, raw: impl Into<Bytes>) -> Self {
        self.raw_body = Some(raw.into());
        self
    }
}

/// A write-based response object.
#[async_trait::async_trait]
pub trait Sink: Send {
    /// Returns `true` once any part of the response has been sent.
    fn headers_sent(&self) -> bool;

    fn set_status(&mut self, status: StatusCode, reason: Option<&str>);

    /// Add a header value. Called once per value.
    fn append_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Write the body and finish the response.
    async fn end(&mut self, body: Bytes) -> io::Result<()>;
}

/// A platform exposing a [`Sink`] of type `S`.
pub struct Node<S = BufferedSink> {
    _sink: PhantomData<fn(S)>,
}

impl<S> Node<S> {
    pub fn new() -> Self {
        Node { _sink: PhantomData }
    }
}

impl<S> Default for Node<S> {
    fn default() -> Self {
        Node::new()
    }
}

#[async_trait::async_trait]
impl<S> Platform for Node<S>
where
    S: Sink,
{
    type Inbound = IncomingMessage;
    type Outbound = S;

    async fn read(&self, message: IncomingMessage, config: &Config) -> Result<Request, Error> {
        let method = normalize::parse_method(&message.method)?;
        let uri = normalize::resolve_uri(&message.url, &message.headers, config)?;
        let body = normalize::extract_body(&method, message.body, message.raw_body);

        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.headers_mut() = message.headers;
        Ok(request)
    }

    async fn write(&self, response: Response, sink: &mut S) -> Result<(), Error> {
        translate::to_sink(response, sink).await
    }

    fn committed(&self, sink: &S) -> bool {
        sink.headers_sent()
    }
}

/// A sink that keeps the written response in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
    ends: usize,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body, once the response has been ended.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// How many times the response was ended.
    pub fn ends(&self) -> usize {
        self.ends
    }

    /// Convert the recorded response back into a [`Response`].
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.body.map(Body::once).unwrap_or_default());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[async_trait::async_trait]
impl Sink for BufferedSink {
    fn headers_sent(&self) -> bool {
        self.ends > 0
    }

    fn set_status(&mut self, status: StatusCode, reason: Option<&str>) {
        self.status = status;
        self.reason = reason.map(str::to_owned);
    }

    fn append_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers.append(name.clone(), value.clone());
    }

    async fn end(&mut self, body: Bytes) -> io::Result<()> {
        self.ends += 1;
        if self.ends > 1 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "response already ended",
            ));
        }

        self.body = Some(body);
        Ok(())
    }
}

/// A sink that writes an HTTP/1.1 response to an async writer.
///
/// `content-length` is always computed from the body. Responses to which
/// HTTP forbids a body (1xx, 204 and 304) are written without one.
#[derive(Debug)]
pub struct IoSink<W> {
    io: W,
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    started: bool,
}

impl<W> IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(io: W) -> Self {
        IoSink {
            io,
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            started: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.io
    }

    fn head(&self, content_length: Option<usize>) -> Vec<u8> {
        let reason = self
            .reason
            .as_deref()
            .filter(|reason| is_valid_reason(reason))
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("");

        let mut head = Vec::with_capacity(128);
        head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).as_bytes());
        for (name, value) in self.headers.iter() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        if let Some(content_length) = content_length {
            head.extend_from_slice(format!("content-length: {}\r\n", content_length).as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        head
    }
}

// reason-phrase = *( HTAB / SP / VCHAR / obs-text )
fn is_valid_reason(reason: &str) -> bool {
    reason
        .bytes()
        .all(|b| b == b'\t' || (b' '..=b'~').contains(&b) || b >= 0x80)
}

fn allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[async_trait::async_trait]
impl<W> Sink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn headers_sent(&self) -> bool {
        self.started
    }

    fn set_status(&mut self, status: StatusCode, reason: Option<&str>) {
        self.status = status;
        self.reason = reason.map(str::to_owned);
    }

    fn append_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        if !translate::is_framing_header(name) {
            self.headers.append(name.clone(), value.clone());
        }
    }

    async fn end(&mut self, body: Bytes) -> io::Result<()> {
        if self.started {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "response already started",
            ));
        }

        self.started = true;
        if allows_body(self.status) {
            let head = self.head(Some(body.len()));
            self.io.write_all(&head).await?;
            self.io.write_all(&body).await?;
        } else {
            if !body.is_empty() {
                tracing::debug!(status = %self.status, len = body.len(), "dropping body of bodiless response");
            }
            let head = self.head(None);
            self.io.write_all(&head).await?;
        }
        self.io.flush().await
    }
}
