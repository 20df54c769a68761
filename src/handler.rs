//! The downstream handler contract.

use crate::bounded::BoxError;
use crate::context::Context;
use crate::http::{Request, Response};
use crate::Respond;

use std::future::Future;

/// An asynchronous handler for canonical requests.
///
/// This is the only contract between the shim and the application. It is
/// implemented for async functions taking a [`Request`] and a [`Context`]:
///
/// ```rust
/// use ferry::{BoxError, Context, Request};
///
/// async fn hello(req: Request, cx: Context) -> Result<String, BoxError> {
///     Ok(format!("{} {}", req.method(), cx.function_path()))
/// }
/// ```
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle a request.
    async fn call(&self, req: Request, cx: Context) -> Result<Response, BoxError>;
}

#[async_trait::async_trait]
impl<F, O, R, E> Handler for F
where
    F: Fn(Request, Context) -> O + Send + Sync + 'static,
    O: Future<Output = Result<R, E>> + Send,
    R: Respond,
    E: Into<BoxError>,
{
    async fn call(&self, req: Request, cx: Context) -> Result<Response, BoxError> {
        self(req, cx).await.map(Respond::respond).map_err(Into::into)
    }
}
