use crate::bounded::BoxError;

use std::fmt;

/// A failure anywhere in the shim.
///
/// Only [`Error::Import`] ever escapes to the caller, and only at startup. Every
/// other variant is caught by the [`Shim`](crate::Shim) and turned into a
/// fallback response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The downstream handler could not be loaded.
    #[error("failed to load handler: {message}")]
    Import {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The inbound request could not be turned into a canonical request.
    #[error("malformed request: {message}")]
    MalformedRequest {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The downstream handler failed.
    #[error("{message}")]
    Handler {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The response could not be written to the platform.
    #[error("failed to write response: {message}")]
    Translation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// The category of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Import,
    MalformedRequest,
    Handler,
    Translation,
}

impl Error {
    pub fn import(err: impl Into<BoxError>) -> Self {
        let (message, source) = split(err.into());
        Error::Import { message, source }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    pub fn malformed_by(message: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Error::MalformedRequest {
            message: message.into(),
            source: Some(err.into()),
        }
    }

    /// Wrap a failure returned by the handler.
    ///
    /// The handler's own message is kept verbatim, it is what ends up in the
    /// fallback response.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        let (message, source) = split(err.into());
        Error::Handler { message, source }
    }

    pub fn translation(message: impl Into<String>) -> Self {
        Error::Translation {
            message: message.into(),
            source: None,
        }
    }

    pub fn translation_by(message: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Error::Translation {
            message: message.into(),
            source: Some(err.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Import { .. } => ErrorKind::Import,
            Error::MalformedRequest { .. } => ErrorKind::MalformedRequest,
            Error::Handler { .. } => ErrorKind::Handler,
            Error::Translation { .. } => ErrorKind::Translation,
        }
    }

    /// The short message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Import { message, .. }
            | Error::MalformedRequest { message, .. }
            | Error::Handler { message, .. }
            | Error::Translation { message, .. } => message,
        }
    }
}

// the wrapped error is only kept when it has a cause chain to trace
fn split(err: BoxError) -> (String, Option<BoxError>) {
    let message = err.to_string();
    match err.source() {
        Some(_) => (message, Some(err)),
        None => (message, None),
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Import => "ImportFailure",
            ErrorKind::MalformedRequest => "MalformedRequestError",
            ErrorKind::Handler => "HandlerFailure",
            ErrorKind::Translation => "TranslationFailure",
        })
    }
}
