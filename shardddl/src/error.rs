//! Error types and result definitions for coordination operations.
//!
//! Every fallible function of this crate returns [`CoordResult`]. A [`CoordError`] carries an
//! [`ErrorKind`] used by callers to decide how to react (retry, resubscribe, give up), a static
//! description, optional dynamic detail, the originating error and the callsite. Multiple
//! failures can be aggregated into one error.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for coordination operations using [`CoordError`] as the error type.
pub type CoordResult<T> = Result<T, CoordError>;

/// Detailed payload stored for single [`CoordError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for coordination operations.
///
/// Cloneable so that the same failure can be delivered to several consumers, e.g. the error
/// channel of a watch and a log line.
#[derive(Debug, Clone)]
pub struct CoordError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, e.g. several store requests that failed independently.
    Many {
        errors: Vec<CoordError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while coordinating through the store.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Store Errors
    StoreUnavailable,
    StoreTimeout,
    TxnConflict,
    WatchCompacted,
    WatchClosed,

    // Data & Encoding Errors
    SerializationError,
    DeserializationError,
    InvalidData,
    InvalidKey,
    ConversionError,

    // Configuration Errors
    ConfigError,
    ValidationError,

    // Binding Errors
    SourceConfigNotFound,

    // General Errors
    IoError,
    InvalidState,
    Unknown,

    // Error kinds used by tests that inject faults through failpoints.
    #[cfg(feature = "failpoints")]
    WithRetry,
    #[cfg(feature = "failpoints")]
    WithNoRetry,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed when issued again.
    ///
    /// [`ErrorKind::TxnConflict`] is retryable but only by the owner of the compare-and-swap
    /// loop, since the write has to be re-evaluated against the new stored value.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::StoreUnavailable | ErrorKind::StoreTimeout | ErrorKind::TxnConflict => true,
            #[cfg(feature = "failpoints")]
            ErrorKind::WithRetry => true,
            _ => false,
        }
    }
}

impl CoordError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        CoordError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for CoordError {
    fn eq(&self, other: &CoordError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl Hash for CoordError {
    /// Hashes only the kind, consistent with [`PartialEq`], so that repeated occurrences of the
    /// same failure group together regardless of keys or revisions in the detail.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)?;
                write_backtrace(payload.backtrace.as_ref(), f, 1)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for CoordError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    let indent_str = "  ".repeat(indent);
    if detail.trim().is_empty() {
        return write!(f, "\n{indent_str}Detail: <empty>");
    }

    write!(f, "\n{indent_str}Detail:")?;
    for line in detail.lines() {
        if line.trim().is_empty() {
            write!(f, "\n{indent_str}  ")?;
        } else {
            write!(f, "\n{indent_str}  {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`CoordError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for CoordError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> CoordError {
        CoordError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`CoordError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for CoordError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> CoordError {
        CoordError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`CoordError`] from a vector of errors for aggregation.
///
/// A vector holding exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for CoordError
where
    E: Into<CoordError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> CoordError {
        let location = Location::caller();

        let mut errors: Vec<CoordError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        CoordError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`CoordError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for CoordError {
    #[track_caller]
    fn from(err: std::io::Error) -> CoordError {
        let detail = err.to_string();
        CoordError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_json::Error`] to [`CoordError`].
///
/// Syntax, data and EOF failures come from decoding a stored payload and map to
/// [`ErrorKind::DeserializationError`].
impl From<serde_json::Error> for CoordError {
    #[track_caller]
    fn from(err: serde_json::Error) -> CoordError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (
                ErrorKind::SerializationError,
                "JSON serialization failed",
            ),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        CoordError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::str::Utf8Error`] to [`CoordError`] with [`ErrorKind::ConversionError`].
impl From<std::str::Utf8Error> for CoordError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> CoordError {
        let detail = err.to_string();
        CoordError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::string::FromUtf8Error`] to [`CoordError`] with [`ErrorKind::ConversionError`].
impl From<std::string::FromUtf8Error> for CoordError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> CoordError {
        let detail = err.to_string();
        CoordError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 string conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`hex::FromHexError`] to [`CoordError`] with [`ErrorKind::InvalidKey`].
///
/// Key segments are hex encoded, so a decoding failure means a key was not written by
/// this layout.
impl From<hex::FromHexError> for CoordError {
    #[track_caller]
    fn from(err: hex::FromHexError) -> CoordError {
        let detail = err.to_string();
        CoordError::from_components(
            ErrorKind::InvalidKey,
            Cow::Borrowed("Key segment is not valid hex"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`tokio::time::error::Elapsed`] to [`CoordError`] with [`ErrorKind::StoreTimeout`].
impl From<tokio::time::error::Elapsed> for CoordError {
    #[track_caller]
    fn from(err: tokio::time::error::Elapsed) -> CoordError {
        CoordError::from_components(
            ErrorKind::StoreTimeout,
            Cow::Borrowed("Store request timed out"),
            None,
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`shardddl_config::shared::ValidationError`] to [`CoordError`] with
/// [`ErrorKind::ValidationError`].
impl From<shardddl_config::shared::ValidationError> for CoordError {
    #[track_caller]
    fn from(err: shardddl_config::shared::ValidationError) -> CoordError {
        let detail = err.to_string();
        CoordError::from_components(
            ErrorKind::ValidationError,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
