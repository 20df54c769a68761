//! Serve a [`ferry::Shim`] with [`hyper`].
//!
//! Hyper hands over request values and takes response values back, so this
//! adapter runs the shim on the [`Fetch`](ferry::platform::Fetch) platform.
//! The peer address of each connection is attached to the request as a
//! [`RemoteAddr`] extension.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ferry::{BoxFuture, Handler, Shim};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, Service};

/// The address of the peer a request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

pub trait Serve<H> {
    /// Bind to `addr` and serve the shim until the returned future is dropped
    /// or the server fails.
    fn serve(self, addr: impl ToSocketAddrs) -> io::Result<Serving>;

    /// A service for a single connection, without a peer address.
    fn into_service(self) -> ShimService<H>;
}

impl<H> Serve<H> for Shim<H>
where
    H: Handler,
{
    fn serve(self, addr: impl ToSocketAddrs) -> io::Result<Serving> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        let builder = hyper::Server::try_bind(&addr)
            .map_err(|err| io::Error::new(io::ErrorKind::AddrNotAvailable, err))?;

        let service = self.into_service();
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let service = service.clone().remote(conn.remote_addr());
            async move { Ok::<_, Infallible>(service) }
        });

        let server = builder.serve(make_service);
        let addr = server.local_addr();
        tracing::info!(%addr, "listening");

        Ok(Serving {
            addr,
            inner: Box::pin(server),
        })
    }

    fn into_service(self) -> ShimService<H> {
        ShimService {
            shim: Arc::new(self),
            remote: None,
        }
    }
}

/// A running server.
pub struct Serving {
    addr: SocketAddr,
    inner: BoxFuture<'static, hyper::Result<()>>,
}

impl Serving {
    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Future for Serving {
    type Output = hyper::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Runs every request of a connection through the shim.
pub struct ShimService<H> {
    shim: Arc<Shim<H>>,
    remote: Option<SocketAddr>,
}

impl<H> ShimService<H> {
    fn remote(mut self, addr: SocketAddr) -> Self {
        self.remote = Some(addr);
        self
    }
}

impl<H> Clone for ShimService<H> {
    fn clone(&self) -> Self {
        ShimService {
            shim: self.shim.clone(),
            remote: self.remote,
        }
    }
}

impl<H> Service<hyper::Request<hyper::Body>> for ShimService<H>
where
    H: Handler,
{
    type Response = hyper::Response<hyper::Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: hyper::Request<hyper::Body>) -> Self::Future {
        let (parts, body) = req.into_parts();
        let mut req = ferry::Request::from_parts(parts, ferry::Body::stream(body));
        if let Some(addr) = self.remote {
            req.extensions_mut().insert(RemoteAddr(addr));
        }

        let shim = self.shim.clone();
        Box::pin(async move {
            let (parts, body) = shim.fetch(req).await.into_parts();
            Ok(hyper::Response::from_parts(parts, into_hyper(body)))
        })
    }
}

// buffered bodies keep their exact length so hyper can set content-length
fn into_hyper(body: ferry::Body) -> hyper::Body {
    match body {
        ferry::Body::Once(bytes) => hyper::Body::from(bytes),
        ferry::Body::Empty => hyper::Body::empty(),
        body => hyper::Body::wrap_stream(body),
    }
}
