// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// The taxonomy of structured failures a back-end or the overlay engine can
/// raise. Kept separate from the path/link wrapping so callers can match on
/// it without string comparison.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("not found")]
    NotFound,
    #[error("whited out")]
    WhitedOut,
    #[error("read-only filesystem")]
    ReadOnlyFilesystem,
    #[error("path escapes root")]
    PathEscapes,
    #[error("too many levels of symbolic links")]
    TooManySymlinks,
    #[error("bad pattern")]
    BadPattern,
    #[error("exhausted retries generating a unique name")]
    MaxRetry,
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("unsupported file type")]
    UnsupportedType,
    #[error("not supported on this platform")]
    PlatformUnsupported,
    #[error("error while closing a temporary file")]
    CloseError,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file already closed")]
    FileClosed,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ErrorKind {
    /// True for kinds that a retry loop (temp-name generation, CoW-on-rename
    /// races) should treat as "try again", as opposed to fatal.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ErrorKind::AlreadyExists)
            || matches!(self, ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorKind::NotFound)
            || matches!(self, ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        ErrorKind::Io(std::io::Error::from(kind))
    }
}

/// A structured error naming the failing operation and a single operand
/// path, mirroring the host language's `*PathError` idiom.
#[derive(Debug, thiserror::Error)]
#[error("{op} {path}: {kind}")]
pub struct PathError {
    pub op: &'static str,
    pub path: String,
    #[source]
    pub kind: ErrorKind,
}

impl PathError {
    pub fn new(op: &'static str, path: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            op,
            path: path.into(),
            kind,
        }
    }
}

/// A structured error naming the failing operation and two operand paths
/// (the "old" and "new" names of a link-like operation).
#[derive(Debug, thiserror::Error)]
#[error("{op} {old} -> {new}: {kind}")]
pub struct LinkError {
    pub op: &'static str,
    pub old: String,
    pub new: String,
    #[source]
    pub kind: ErrorKind,
}

impl LinkError {
    pub fn new(op: &'static str, old: impl Into<String>, new: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            op,
            old: old.into(),
            new: new.into(),
            kind,
        }
    }
}

/// Top-level error type returned by back-end and overlay operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn path(op: &'static str, path: impl Into<String>, kind: ErrorKind) -> Self {
        Error::Path(PathError::new(op, path, kind))
    }

    pub fn link(op: &'static str, old: impl Into<String>, new: impl Into<String>, kind: ErrorKind) -> Self {
        Error::Link(LinkError::new(op, old, new, kind))
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Error::Path(e) => Some(&e.kind),
            Error::Link(e) => Some(&e.kind),
            Error::Other(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind().map(|k| k.is_not_found()).unwrap_or(false)
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind().map(|k| k.is_already_exists()).unwrap_or(false)
    }

    /// Re-wraps this error under a new operation and path. If this error is
    /// already a [`PathError`], only `op` and `path` are overridden; the
    /// original cause is preserved. Otherwise a fresh [`PathError`] is
    /// built around it.
    pub fn rewrap_path(self, op: &'static str, path: impl Into<String>) -> Self {
        match self {
            Error::Path(e) => Error::path(op, path, e.kind),
            other => Error::path(
                op,
                path,
                ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
            ),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Other(anyhow::Error::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
