//! Carries HTTP calls from a hosting platform into a single handler contract.
//!
//! A [`Shim`] accepts whatever request shape its platform provides, normalizes it
//! into a canonical [`Request`], builds a per-call [`Context`], runs the downstream
//! [`Handler`] and translates the [`Response`] back into the platform's shape. Any
//! failure along the way is converted into a well-formed 500 response.

mod boundary;
mod bounded;
mod config;
mod context;
mod error;
mod handler;
mod reject;
mod respond;
mod shim;

pub mod http;
pub mod normalize;
pub mod platform;
pub mod translate;

pub use async_trait::async_trait;
pub use boundary::{ErrorRecord, Report, Stage, TracingReport};
pub use bounded::{BoxError, BoxFuture, BoxStream};
pub use config::{Config, Fallback};
pub use context::{Context, Deferred, Env, EnvSource, Params, ProcessEnv, StaticEnv, TaskHandle};
pub use error::{Error, ErrorKind};
pub use handler::Handler;
pub use crate::http::{Body, Request, Response};
pub use reject::Reject;
pub use respond::Respond;
pub use shim::Shim;
