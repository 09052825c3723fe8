//! Error type shared by every rowpipe crate.
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = RowpipeError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// The orchestrator uses the kind to decide how an error is surfaced. Every
/// kind except `Cancelled` is fatal to a running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Something that should never happen given a consistent topology.
    Internal,
    /// A configuration value could not be parsed or is out of range.
    InvalidConfig,
    /// The pipeline graph or its wiring is malformed.
    InvalidTopology,
    /// A stage copy failed to initialize.
    Initialization,
    /// Safe-mode structural row check failed.
    RowLayoutMismatch,
    /// The error budget of a stage was exceeded.
    RejectionThresholdExceeded,
    /// Socket failure on a remote row transport.
    ChannelIo,
    /// The pipeline was stopped on request.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Internal => "internal",
            Self::InvalidConfig => "invalid config",
            Self::InvalidTopology => "invalid topology",
            Self::Initialization => "initialization",
            Self::RowLayoutMismatch => "row layout mismatch",
            Self::RejectionThresholdExceeded => "rejection threshold exceeded",
            Self::ChannelIo => "channel io",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct RowpipeError {
    inner: Box<RowpipeErrorInner>,
}

#[derive(Debug)]
struct RowpipeErrorInner {
    kind: ErrorKind,
    msg: Cow<'static, str>,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(Cow<'static, str>, String)>,
    backtrace: Backtrace,
}

impl RowpipeError {
    pub fn new(msg: impl Into<Cow<'static, str>>) -> Self {
        RowpipeError {
            inner: Box::new(RowpipeErrorInner {
                kind: ErrorKind::Internal,
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(
        msg: impl Into<Cow<'static, str>>,
        source: Box<dyn Error + Send + Sync>,
    ) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Set the kind of this error.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Attach a context field to the error.
    ///
    /// Fields are rendered in insertion order after the message.
    pub fn with_field(mut self, key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        self.inner.msg.as_ref()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .fields
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    /// Get a field value by key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn is_fatal(&self) -> bool {
        self.inner.kind != ErrorKind::Cancelled
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }
}

impl fmt::Display for RowpipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for (key, value) in &self.inner.fields {
            write!(f, "\n  {key}: {value}")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

impl Error for RowpipeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for RowpipeError {
    fn from(err: std::io::Error) -> Self {
        RowpipeError::with_source("IO error", Box::new(err)).with_kind(ErrorKind::ChannelIo)
    }
}

impl From<std::fmt::Error> for RowpipeError {
    fn from(err: std::fmt::Error) -> Self {
        RowpipeError::with_source("Format error", Box::new(err))
    }
}

/// Wrap foreign errors with a message.
pub trait ResultExt<T, E> {
    fn context(self, msg: &'static str) -> Result<T>;
    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<Cow<'static, str>>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| RowpipeError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<Cow<'static, str>>,
    {
        self.map_err(|e| RowpipeError::with_source(f(), Box::new(e)))
    }
}

pub trait OptionExt<T> {
    fn required(self, what: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &'static str) -> Result<T> {
        self.ok_or_else(|| RowpipeError::new(format!("Missing required value: {what}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_fields_and_source() {
        let io = std::io::Error::other("connection reset");
        let err = RowpipeError::with_source("Failed to read frame", Box::new(io))
            .with_field("stage", "lookup")
            .with_field("copy", 2);

        let s = err.to_string();
        assert!(s.starts_with("Failed to read frame"));
        assert!(s.contains("stage: lookup"));
        assert!(s.contains("copy: 2"));
        assert!(s.contains("connection reset"));
        assert_eq!(Some("2"), err.field("copy"));
    }

    #[test]
    fn io_errors_are_channel_errors() {
        let err: RowpipeError = std::io::Error::other("broken pipe").into();
        assert_eq!(ErrorKind::ChannelIo, err.kind());
        assert!(err.is_fatal());
    }

    #[test]
    fn cancelled_is_not_fatal() {
        let err = RowpipeError::new("stopped").with_kind(ErrorKind::Cancelled);
        assert!(!err.is_fatal());
    }

    #[test]
    fn required_option() {
        let v: Option<i32> = None;
        let err = v.required("partition config").unwrap_err();
        assert!(err.message().contains("partition config"));
    }
}
