use crate::boundary::Report;
use crate::bounded::BoxError;
use crate::http::Request;
use crate::Config;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{self, Poll};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Per-call context handed to the [`Handler`](crate::Handler) next to the request.
///
/// Built fresh for every call and dropped when the call completes. Deferred
/// work registered through [`Context::wait_until`] may outlive it.
#[derive(Clone, Debug)]
pub struct Context {
    env: Env,
    tasks: Deferred,
    params: Params,
    function_path: String,
}

impl Context {
    /// Build the context for a normalized request.
    ///
    /// The environment is snapshotted from the configured source on every
    /// call. Route parameters start out empty and the function path is the
    /// path of the request.
    pub fn build(request: &Request, config: &Config) -> Context {
        Context::with_tasks(request, config, Deferred::new(config.report().clone()))
    }

    pub(crate) fn with_tasks(request: &Request, config: &Config, tasks: Deferred) -> Context {
        Context {
            env: config.env_source().snapshot(),
            tasks,
            params: Params::default(),
            function_path: request.uri().path().to_owned(),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Returns the value of an environment variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn function_path(&self) -> &str {
        &self.function_path
    }

    pub fn tasks(&self) -> &Deferred {
        &self.tasks
    }

    /// Register deferred background work. See [`Deferred::wait_until`].
    pub fn wait_until<F, E>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.tasks.wait_until(task)
    }
}

/// A snapshot of environment variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Env(Arc<HashMap<String, String>>);

impl Env {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Env {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (String, String)>,
    {
        Env(Arc::new(iter.into_iter().collect()))
    }
}

/// A source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Take a snapshot of the current variables.
    fn snapshot(&self) -> Env;
}

/// Reads the variables of the current process.
///
/// Variables whose name or value is not valid unicode are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn snapshot(&self) -> Env {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

/// A fixed set of variables, for platforms that inject their own bindings.
#[derive(Clone, Debug, Default)]
pub struct StaticEnv(Env);

impl StaticEnv {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        StaticEnv(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl EnvSource for StaticEnv {
    fn snapshot(&self) -> Env {
        self.0.clone()
    }
}

/// Route parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();

        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, val)| val.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (String, String)>,
    {
        Params(iter.into_iter().collect())
    }
}

/// Registers deferred background work for a call.
///
/// Work is spawned on the runtime that was current when the context was
/// built. A call does not finish before each of its tasks has been polled at
/// least once, but nothing waits for them to complete: they may still be
/// running after the response is sent, and they cannot be cancelled. A task
/// that fails or panics is reported and dropped.
#[derive(Clone)]
pub struct Deferred {
    runtime: Option<Handle>,
    reporter: Arc<dyn Report>,
    pending: Arc<Mutex<Vec<oneshot::Receiver<()>>>>,
}

impl Deferred {
    pub(crate) fn new(reporter: Arc<dyn Report>) -> Self {
        Deferred {
            runtime: Handle::try_current().ok(),
            reporter,
            pending: Arc::default(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<oneshot::Receiver<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until every task registered so far has been polled once.
    ///
    /// Tasks registered by other tasks while waiting are waited for too.
    pub(crate) async fn started(&self) {
        loop {
            let pending = std::mem::take(&mut *self.pending());
            if pending.is_empty() {
                return;
            }

            for started in pending {
                // a task dropped before its first poll has nothing left to wait for
                let _ = started.await;
            }
        }
    }

    /// Start `task` in the background.
    pub fn wait_until<F, E>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let runtime = match &self.runtime {
            Some(runtime) => runtime,
            None => {
                self.reporter
                    .deferred(&BoxError::from("no async runtime to run deferred work on"));
                return TaskHandle { inner: None };
            }
        };

        let (started, pending) = oneshot::channel();
        self.pending().push(pending);

        let reporter = self.reporter.clone();
        let task = runtime.spawn(Started {
            inner: async move { task.await.map_err(Into::<BoxError>::into) },
            started: Some(started),
        });

        // the task runs in its own spawn so a panic is observed here
        // instead of unwinding into the supervisor
        let supervisor = runtime.spawn(async move {
            match task.await {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    reporter.deferred(&err);
                    false
                }
                Err(err) => {
                    let err: BoxError = match err.try_into_panic() {
                        Ok(panic) => format!("deferred task panicked: {}", panic_message(panic)).into(),
                        Err(err) => Box::new(err),
                    };
                    reporter.deferred(&err);
                    false
                }
            }
        });

        TaskHandle {
            inner: Some(supervisor),
        }
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

pin_project_lite::pin_project! {
    // signals once the inner future has been polled
    struct Started<F> {
        #[pin]
        inner: F,
        started: Option<oneshot::Sender<()>>,
    }
}

impl<F> Future for Started<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<F::Output> {
        let this = self.project();
        let output = this.inner.poll(cx);
        if let Some(started) = this.started.take() {
            let _ = started.send(());
        }
        output
    }
}

/// The message a panic was raised with.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "unknown panic payload".to_owned(),
        },
    }
}

/// A handle to deferred work.
///
/// Dropping the handle detaches the work, it keeps running.
#[derive(Debug)]
pub struct TaskHandle {
    inner: Option<JoinHandle<bool>>,
}

impl TaskHandle {
    /// Wait for the work to finish.
    ///
    /// Returns `true` if it completed successfully. Failures have already been
    /// reported by the time this returns.
    pub async fn join(self) -> bool {
        match self.inner {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }

    /// Returns `true` if the work has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().map_or(true, JoinHandle::is_finished)
    }
}
