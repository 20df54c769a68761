use crate::boundary::{Boundary, ErrorRecord, Stage};
use crate::bounded::BoxError;
use crate::context::{panic_message, Context, Deferred};
use crate::handler::Handler;
use crate::http::Response;
use crate::platform::{Fetch, IncomingMessage, Node, Platform, Sink, Slot};
use crate::{Config, Error, Reject, Request};

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

/// Runs a [`Handler`] behind a hosting platform.
///
/// ```rust
/// use ferry::{BoxError, Context, Request, Shim};
///
/// # async fn run(request: Request) {
/// let shim = Shim::new(|_: Request, _: Context| async { Ok::<_, BoxError>("ok") });
/// let response = shim.fetch(request).await;
/// # }
/// ```
///
/// Every call goes through the same pipeline: the platform request is
/// normalized, a [`Context`] is built, the handler is called and its response
/// is translated back. A failure in any of these stages, a handler panic
/// included, is reported once and answered with a 500 response, unless part
/// of a response already reached the platform.
pub struct Shim<H> {
    handler: H,
    config: Config,
}

impl<H> Shim<H>
where
    H: Handler,
{
    pub fn new(handler: H) -> Self {
        Shim {
            handler,
            config: Config::default(),
        }
    }

    /// Create a shim from a handler that is loaded at startup.
    ///
    /// A loader failure is the one error that is returned instead of being
    /// turned into a response: without a handler no request can be served.
    pub fn load<F, E>(loader: F) -> Result<Self, Error>
    where
        F: FnOnce() -> Result<H, E>,
        E: Into<BoxError>,
    {
        match loader() {
            Ok(handler) => Ok(Shim::new(handler)),
            Err(err) => {
                let err = Error::import(err);
                tracing::error!(error = %err, "failed to load handler");
                Err(err)
            }
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve a request-in, response-out call.
    pub async fn fetch(&self, request: Request) -> Response {
        let mut slot = Slot::new();
        self.run(&Fetch, request, &mut slot).await;

        slot.into_inner().unwrap_or_else(|| {
            Error::translation("no response was produced").reject(self.config.fallback_format())
        })
    }

    /// Serve a call that writes into a response sink.
    pub async fn node<S>(&self, message: IncomingMessage, sink: &mut S)
    where
        S: Sink,
    {
        self.run(&Node::<S>::new(), message, sink).await;
    }

    /// Run one call on any platform.
    ///
    /// Never fails, failures end up in the outbound response or, when that is
    /// no longer possible, only in the report.
    pub async fn run<P>(&self, platform: &P, inbound: P::Inbound, outbound: &mut P::Outbound) -> Stage
    where
        P: Platform,
    {
        let mut boundary = Boundary::new();
        let tasks = Deferred::new(self.config.report().clone());

        match self
            .pipeline(platform, inbound, outbound, &mut boundary, &tasks)
            .await
        {
            Ok(()) => boundary.advance(Stage::Completed),
            Err(err) => {
                let record = ErrorRecord::capture(boundary.stage(), &err);
                boundary.advance(Stage::Failed);
                self.config.report().failure(&record);

                if platform.committed(outbound) {
                    tracing::debug!("response already started, leaving it as is");
                } else {
                    let fallback = record.reject(self.config.fallback_format());
                    if let Err(err) = platform.write(fallback, outbound).await {
                        self.config
                            .report()
                            .failure(&ErrorRecord::capture(Stage::Failed, &err));
                    }
                }

                boundary.advance(Stage::Completed);
            }
        }

        tasks.started().await;
        boundary.stage()
    }

    async fn pipeline<P>(
        &self,
        platform: &P,
        inbound: P::Inbound,
        outbound: &mut P::Outbound,
        boundary: &mut Boundary,
        tasks: &Deferred,
    ) -> Result<(), Error>
    where
        P: Platform,
    {
        boundary.advance(Stage::NormalizingRequest);
        let request = platform.read(inbound, &self.config).await?;
        tracing::debug!(method = %request.method(), uri = %request.uri(), "request");

        boundary.advance(Stage::BuildingContext);
        let cx = Context::with_tasks(&request, &self.config, tasks.clone());

        boundary.advance(Stage::Handling);
        let response = AssertUnwindSafe(self.handler.call(request, cx))
            .catch_unwind()
            .await
            .map_err(|panic| Error::handler(format!("handler panicked: {}", panic_message(panic))))?
            .map_err(Error::handler)?;
        tracing::debug!(status = %response.status(), "response");

        boundary.advance(Stage::TranslatingResponse);
        platform.write(response, outbound).await
    }
}
