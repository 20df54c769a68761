//! The seam between the shim and a hosting platform.
//!
//! A platform only knows how to read its inbound request and how to write an
//! outbound response. Everything in between is shared.

pub mod fetch;
pub mod node;

pub use fetch::{Fetch, Slot};
pub use node::{BufferedSink, IncomingMessage, IoSink, Node, Sink};

use crate::http::{Request, Response};
use crate::{Config, Error};

/// A hosting platform's request and response model.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    /// The request as the platform hands it over.
    type Inbound: Send;

    /// Where the response goes.
    type Outbound: Send;

    /// Read an inbound request into a canonical request.
    async fn read(&self, inbound: Self::Inbound, config: &Config) -> Result<Request, Error>;

    /// Write a canonical response to the platform.
    async fn write(&self, response: Response, outbound: &mut Self::Outbound) -> Result<(), Error>;

    /// Returns `true` once part of a response has reached the platform, after
    /// which nothing else may be written.
    fn committed(&self, outbound: &Self::Outbound) -> bool;
}
