// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Coded errors, in the spirit of `grpc::StatusCode`.
//!
//! Leaf operations return an [`Error`] tagged with an [`ErrorKind`]; callers
//! decide retry vs. surface by kind rather than by string matching. The web
//! layer maps kinds to HTTP statuses.

use std::fmt;

/// Error kind, following the general-purpose classification of
/// [grpc::StatusCode](https://grpc.github.io/grpc/core/md_doc_statuscodes.html).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Cancelled => "Cancelled",
            Unknown => "Unknown",
            InvalidArgument => "Invalid argument",
            DeadlineExceeded => "Deadline exceeded",
            NotFound => "Not found",
            AlreadyExists => "Already exists",
            PermissionDenied => "Permission denied",
            Unauthenticated => "Unauthenticated",
            ResourceExhausted => "Resource exhausted",
            FailedPrecondition => "Failed precondition",
            Aborted => "Aborted",
            OutOfRange => "Out of range",
            Unimplemented => "Unimplemented",
            Internal => "Internal",
            Unavailable => "Unavailable",
            DataLoss => "Data loss",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<BoxedError>,
}

/// A kind-coded error with an optional message and source.
///
/// Boxed so a `Result<(), Error>` stays pointer-sized on the happy path.
#[derive(Debug)]
pub struct Error(Box<ErrorInner>);

impl Error {
    pub fn new(kind: ErrorKind, msg: Option<String>) -> Self {
        Error(Box::new(ErrorInner {
            kind,
            msg,
            source: None,
        }))
    }

    pub fn wrap<E: Into<BoxedError>>(kind: ErrorKind, source: E) -> Self {
        Error(Box::new(ErrorInner {
            kind,
            msg: None,
            source: Some(source.into()),
        }))
    }

    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn with_source<E: Into<BoxedError>>(mut self, source: E) -> Self {
        self.0.source = Some(source.into());
        self
    }

    /// Returns a `Display` adapter which prints the full source chain,
    /// not just the top-level message.
    pub fn chain(&self) -> ErrorChain<'_> {
        ErrorChain(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.msg {
            Some(msg) => write!(f, "{}: {}", self.0.kind, msg),
            None => match &self.0.source {
                Some(s) => write!(f, "{}: {}", self.0.kind, s),
                None => fmt::Display::fmt(&self.0.kind, f),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind, None)
    }
}

/// Displays an error and all its causes, `: `-separated.
pub struct ErrorChain<'a>(&'a Error);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0, f)?;
        let mut cur: Option<&(dyn std::error::Error + 'static)> =
            std::error::Error::source(self.0);
        // The top-level Display already includes the first source when there
        // is no message of its own; avoid printing it twice.
        if self.0 .0.msg.is_none() {
            cur = cur.and_then(std::error::Error::source);
        }
        while let Some(e) = cur {
            write!(f, ": {e}")?;
            cur = e.source();
        }
        Ok(())
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind, keeping it as the source.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<BoxedError>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::wrap(k, e))
    }
}

/// Constructs an [`Error`].
///
/// ```
/// use pitchside_base::{err, ErrorKind};
/// let e = err!(NotFound, msg("no such camera {}", "cam1"));
/// assert_eq!(e.kind(), ErrorKind::NotFound);
/// assert_eq!(e.to_string(), "Not found: no such camera cam1");
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind, None)
    };
    ($kind:ident, msg($($msg:tt)*)) => {
        $crate::Error::new($crate::ErrorKind::$kind, Some(format!($($msg)*)))
    };
    ($kind:ident, source($source:expr)) => {
        $crate::Error::wrap($crate::ErrorKind::$kind, $source)
    };
    ($kind:ident, msg($($msg:tt)*), source($source:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind, Some(format!($($msg)*)))
            .with_source($source)
    };
    ($kind:ident, source($source:expr), msg($($msg:tt)*)) => {
        $crate::Error::new($crate::ErrorKind::$kind, Some(format!($($msg)*)))
            .with_source($source)
    };
}

/// Like [`err!`], but returns from the enclosing function.
#[macro_export]
macro_rules! bail {
    ($($t:tt)*) => {
        return Err($crate::err!($($t)*).into())
    };
}
