//! The main Error type for GenAgent3D

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all GenAgent3D operations.
///
/// This error type provides:
/// - `kind`: What type of error occurred
/// - `message`: Human-readable description
/// - `status`: Whether the error is retryable
/// - `operation`: What operation caused the error
/// - `context`: Key-value pairs for debugging
/// - `source`: The underlying error (if any)
///
/// # Example
///
/// ```rust
/// use genagent_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::InferenceFailed, "model returned empty response")
///     .with_operation("planner::plan")
///     .with_status(ErrorStatus::Temporary)
///     .with_context("model", "qwen-plus")
///     .with_context("iteration", "2");
///
/// assert_eq!(err.kind(), ErrorKind::InferenceFailed);
/// assert!(err.status().is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error status
    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Get the operation that caused this error
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Get the context key-value pairs
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up a context value by key (first match)
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    /// Override the retry status derived from the kind
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// If an operation was already set, the previous one is moved to context
    /// as "called" to preserve the call chain.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

/// `kind in operation: message [key=value, ...] (retryable)`; one line, for
/// terminals and log fields.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.operation.is_empty() {
            write!(f, " in {}", self.operation)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }

        if !self.context.is_empty() {
            let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }

        match self.status {
            ErrorStatus::Permanent => Ok(()),
            status => write!(f, " ({})", status),
        }
    }
}

/// Multi-line report including the whole source chain.
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.kind, self.status)?;
        if !self.operation.is_empty() {
            writeln!(f, "  operation: {}", self.operation)?;
        }
        if !self.message.is_empty() {
            writeln!(f, "  message:   {}", self.message)?;
        }
        for (key, value) in &self.context {
            writeln!(f, "  {:<10} {}", format!("{}:", key), value)?;
        }
        if let Some(source) = &self.source {
            for (depth, cause) in source.chain().enumerate() {
                writeln!(f, "  cause {}:   {}", depth, cause)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// Only io errors get a blanket conversion; everything else is wrapped
// explicitly with `set_source` so the kind is always chosen by the caller.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    /// Create an Unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Create an Unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Create a ConfigInvalid error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create an InferenceFailed error
    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }

    /// Create a ResponseMalformed error
    pub fn response_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResponseMalformed, message)
    }

    /// Create a ScriptFailed error carrying the script's error output
    pub fn script_failed(error_text: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptFailed, error_text)
    }

    /// Create a RenderFailed error
    pub fn render_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RenderFailed, message)
    }

    /// Create a RenderTimeout error
    pub fn render_timeout(secs: u64) -> Self {
        Self::new(
            ErrorKind::RenderTimeout,
            format!("blender did not finish within {}s", secs),
        )
        .with_context("timeout_secs", secs.to_string())
    }

    /// Create an ImageUnreadable error
    pub fn image_unreadable(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorKind::ImageUnreadable, format!("cannot read image '{}'", path))
            .with_context("path", path)
    }

    /// Create a MemoryFailed error
    pub fn memory_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MemoryFailed, message)
    }

    /// Create a SerializationFailed error
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::ConfigInvalid, "render.resolution must be positive");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.message(), "render.resolution must be positive");
        assert_eq!(err.status(), ErrorStatus::Permanent);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::new(ErrorKind::InferenceFailed, "timeout")
            .with_operation("verifier::verify")
            .with_context("model", "qwen-vl-max")
            .with_context("image", "output/scene_1.png");

        assert_eq!(err.operation(), "verifier::verify");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()[0], ("model", "qwen-vl-max".to_string()));
        assert_eq!(err.context_value("image"), Some("output/scene_1.png"));
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::new(ErrorKind::IoFailed, "write failed")
            .with_operation("memory::persist")
            .with_operation("pipeline::run");

        assert_eq!(err.operation(), "pipeline::run");
        assert_eq!(err.context().len(), 1);
        assert_eq!(err.context()[0], ("called", "memory::persist".to_string()));
    }

    #[test]
    fn test_temporary_status() {
        let err = Error::new(ErrorKind::InferenceFailed, "rate limited");
        assert!(err.is_retryable());

        let err = Error::new(ErrorKind::ScriptFailed, "NameError: name 'bpyy' is not defined");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persist() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused");
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::InferenceFailed, "model unavailable")
            .with_operation("planner::plan")
            .with_context("model", "qwen-plus")
            .with_context("attempt", "3");
        assert_eq!(
            err.to_string(),
            "InferenceFailed in planner::plan: model unavailable [model=qwen-plus, attempt=3] (temporary)"
        );

        let err = Error::script_failed("NameError: name 'bpyy' is not defined");
        assert_eq!(err.to_string(), "ScriptFailed: NameError: name 'bpyy' is not defined");
    }

    #[test]
    fn test_debug_lists_causes() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::memory_failed("could not save memories").set_source(io_err);
        let debug = format!("{:?}", err);
        assert!(debug.contains("message:   could not save memories"));
        assert!(debug.contains("cause 0:   disk full"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::image_unreadable("missing.png");
        assert_eq!(err.kind(), ErrorKind::ImageUnreadable);
        assert!(err.message().contains("missing.png"));

        let err = Error::render_timeout(300);
        assert_eq!(err.kind(), ErrorKind::RenderTimeout);
        assert!(err.is_retryable());

        let err = Error::script_failed("Traceback ...");
        assert_eq!(err.kind(), ErrorKind::ScriptFailed);
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert!(std::error::Error::source(&err).is_some());
    }
}
