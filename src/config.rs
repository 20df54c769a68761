use crate::boundary::{Report, TracingReport};
use crate::context::{EnvSource, ProcessEnv};

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

/// Configuration for a [`Shim`](crate::Shim).
///
/// ```rust
/// use ferry::{Config, Fallback};
///
/// let config = Config::new()
///     .default_host("example.com")
///     .fallback(Fallback::Json);
/// ```
///
/// The serializable fields can also be loaded with `serde`, the environment
/// source and reporter are always set in code.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    default_scheme: String,
    default_host: String,
    fallback: Fallback,
    #[serde(skip, default = "process_env")]
    env: Arc<dyn EnvSource>,
    #[serde(skip, default = "tracing_report")]
    reporter: Arc<dyn Report>,
}

/// The body format of the 500 response produced when a call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fallback {
    /// `Internal Server Error: <message>` as `text/plain`.
    #[default]
    Text,
    /// `{"error": "Internal Server Error", "message": "<message>"}`.
    Json,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scheme used to rebuild absolute URLs when the request
    /// carries no `x-forwarded-proto` header. Defaults to `https`.
    pub fn default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    /// The authority used to rebuild absolute URLs when the request carries
    /// neither `x-forwarded-host` nor `host`. Defaults to `localhost`.
    pub fn default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    pub fn fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Where the per-call environment snapshot is read from.
    pub fn env<E>(mut self, env: E) -> Self
    where
        E: EnvSource + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Where failures are reported.
    pub fn reporter<R>(mut self, reporter: R) -> Self
    where
        R: Report + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn scheme(&self) -> &str {
        &self.default_scheme
    }

    pub fn host(&self) -> &str {
        &self.default_host
    }

    pub fn fallback_format(&self) -> Fallback {
        self.fallback
    }

    pub(crate) fn env_source(&self) -> &Arc<dyn EnvSource> {
        &self.env
    }

    pub(crate) fn report(&self) -> &Arc<dyn Report> {
        &self.reporter
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_scheme: "https".to_owned(),
            default_host: "localhost".to_owned(),
            fallback: Fallback::default(),
            env: process_env(),
            reporter: tracing_report(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("default_scheme", &self.default_scheme)
            .field("default_host", &self.default_host)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

fn process_env() -> Arc<dyn EnvSource> {
    Arc::new(ProcessEnv)
}

fn tracing_report() -> Arc<dyn Report> {
    Arc::new(TracingReport)
}
