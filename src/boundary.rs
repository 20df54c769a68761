use crate::bounded::BoxError;
use crate::error::{Error, ErrorKind};

use std::error::Error as StdError;
use std::fmt;

/// The stage a call is in.
///
/// ```text
/// NotStarted -> NormalizingRequest -> BuildingContext -> Handling -> TranslatingResponse -> Completed
///                      \__________________\_________________\______________\
///                                                                          Failed -> Completed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    NotStarted,
    NormalizingRequest,
    BuildingContext,
    Handling,
    TranslatingResponse,
    Failed,
    Completed,
}

impl Stage {
    /// Returns `true` if a call in this stage may move to `next`.
    pub fn can_advance(self, next: Stage) -> bool {
        use Stage::*;

        matches!(
            (self, next),
            (NotStarted, NormalizingRequest)
                | (NormalizingRequest, BuildingContext)
                | (BuildingContext, Handling)
                | (Handling, TranslatingResponse)
                | (TranslatingResponse, Completed)
                | (NormalizingRequest | BuildingContext | Handling | TranslatingResponse, Failed)
                | (Failed, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Completed
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the stage of a single call.
#[derive(Debug)]
pub(crate) struct Boundary {
    stage: Stage,
}

impl Boundary {
    pub(crate) fn new() -> Self {
        Boundary {
            stage: Stage::NotStarted,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, next: Stage) {
        if !self.stage.can_advance(next) {
            debug_assert!(false, "illegal stage transition {} -> {}", self.stage, next);
            tracing::warn!(from = %self.stage, to = %next, "illegal stage transition");
        }

        self.stage = next;
    }
}

/// A captured failure.
///
/// Used for reporting and to derive the fallback response, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// The chain of underlying causes, outermost first, if there is one.
    pub trace: Option<String>,
}

impl ErrorRecord {
    pub fn capture(stage: Stage, err: &Error) -> Self {
        let message = err.message().to_owned();

        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            let cause_message = cause.to_string();
            if cause_message != message {
                causes.push(cause_message);
            }
            source = cause.source();
        }

        ErrorRecord {
            stage,
            kind: err.kind(),
            message,
            trace: (!causes.is_empty()).then(|| causes.join("\ncaused by: ")),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.kind, self.stage, self.message)
    }
}

/// A sink for failures.
///
/// Every failed call is reported exactly once through [`Report::failure`].
/// Deferred work that fails is reported through [`Report::deferred`].
pub trait Report: Send + Sync {
    fn failure(&self, record: &ErrorRecord);

    fn deferred(&self, err: &BoxError) {
        tracing::warn!(error = %err, "deferred task failed");
    }
}

/// Reports failures as `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReport;

impl Report for TracingReport {
    fn failure(&self, record: &ErrorRecord) {
        match &record.trace {
            Some(trace) => tracing::error!(
                stage = %record.stage,
                kind = %record.kind,
                trace = %trace,
                "{}",
                record.message
            ),
            None => tracing::error!(
                stage = %record.stage,
                kind = %record.kind,
                "{}",
                record.message
            ),
        }
    }
}
