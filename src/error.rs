use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

/// The different kinds of errors that can occur while operating the cgroup backend.
///
/// `Transient` is never returned from a public API: it exists only for the internal retry
/// helper behind `create()` and is always either recovered locally or escalated into a
/// `ConfigError` before it reaches the database.
#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Discovery, permission, or hierarchy invariant violated. Raised only during init or
    /// first use of a group; always fatal to the caller.
    ConfigError,

    /// An unexpected `read`/`write`/`open`/`mkdir`/`rmdir`/`flock` failure on a path this crate
    /// had already validated.
    IOError,

    /// A decimal pid or `/proc` value failed to parse.
    ParseError,

    /// The kernel has not finished populating a newly created directory's interface files yet.
    Transient,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    /// The filesystem path the failing operation concerned, when there was one.
    path: Option<PathBuf>,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self.kind {
            ErrorKind::ConfigError => "invalid cgroup configuration",
            ErrorKind::IOError => "cgroup filesystem operation failed",
            ErrorKind::ParseError => "failed to parse a cgroup interface value",
            ErrorKind::Transient => "cgroup interface file not yet populated",
        };
        match (&self.path, &self.cause) {
            (Some(p), Some(c)) => write!(f, "{}: {}: {}", msg, p.display(), c),
            (Some(p), None) => write!(f, "{}: {}", msg, p.display()),
            (None, Some(c)) => write!(f, "{}: {}", msg, c),
            (None, None) => write!(f, "{}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.cause {
            Some(ref c) => Some(&**c as &(dyn StdError + 'static)),
            None => None,
        }
    }
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            cause: None,
        }
    }

    pub(crate) fn with_path(kind: ErrorKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            cause: None,
        }
    }

    pub(crate) fn with_path_cause<E>(kind: ErrorKind, path: impl Into<PathBuf>, cause: E) -> Self
    where
        E: 'static + Send + Sync + StdError,
    {
        Self {
            kind,
            path: Some(path.into()),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub(crate) fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
