//! Error kinds for GenAgent3D operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to react: re-prompt the model,
/// hand a script error back to the fix loop, or abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// The provider rejected our credentials
    AuthenticationFailed,

    /// The model answered, but not in a shape we can use
    ResponseMalformed,

    // =========================================================================
    // Scene execution errors
    // =========================================================================
    /// A generated Blender script raised an error
    ScriptFailed,

    /// Blender finished without producing the expected image
    RenderFailed,

    /// Blender did not finish within the configured time
    RenderTimeout,

    /// The rendered image could not be read for verification
    ImageUnreadable,

    // =========================================================================
    // Memory errors
    // =========================================================================
    /// Scene memory could not be loaded or persisted
    MemoryFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ErrorKind::ResponseMalformed => "ResponseMalformed",

            // Scene execution
            ErrorKind::ScriptFailed => "ScriptFailed",
            ErrorKind::RenderFailed => "RenderFailed",
            ErrorKind::RenderTimeout => "RenderTimeout",
            ErrorKind::ImageUnreadable => "ImageUnreadable",

            // Memory
            ErrorKind::MemoryFailed => "MemoryFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
                | ErrorKind::RenderTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
