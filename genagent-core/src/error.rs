//! Core error helpers
//!
//! Re-exports genagent-error and provides scene-pipeline conveniences.

pub use genagent_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

// =============================================================================
// Core-specific error constructors
// =============================================================================

/// Create an IoFailed error
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

/// Create a SerializationFailed error
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::serialization_failed(message)
}

/// Create a ConfigInvalid error
pub fn config_invalid(message: impl Into<String>) -> Error {
    Error::config_invalid(message)
}

/// Create a ResponseMalformed error
pub fn response_malformed(message: impl Into<String>) -> Error {
    Error::response_malformed(message)
}

/// Create a MemoryFailed error
pub fn memory_failed(message: impl Into<String>) -> Error {
    Error::memory_failed(message)
}

/// Create an InvalidArgument error for an unknown scene object type
pub fn unknown_object_type(kind: impl Into<String>) -> Error {
    let kind = kind.into();
    Error::invalid_argument(format!("unsupported object type: {}", kind))
        .with_context("object_type", kind)
}

/// Convert a provider failure into the unified error, picking the kind from
/// the failure class so retry decisions keep working upstream.
pub fn from_provider(err: ProviderError, model: &str) -> Error {
    let kind = match &err {
        ProviderError::Network(_) => ErrorKind::NetworkFailed,
        ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
        ProviderError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
        ProviderError::Parse(_) => ErrorKind::ResponseMalformed,
        ProviderError::InvalidRequest(_) => ErrorKind::InvalidArgument,
        ProviderError::ModelNotFound(_) => ErrorKind::ConfigInvalid,
        ProviderError::Unsupported(_) => ErrorKind::Unsupported,
        ProviderError::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
        ProviderError::Api { .. } | ProviderError::Other(_) => ErrorKind::InferenceFailed,
    };
    Error::new(kind, err.to_string())
        .with_context("model", model)
        .set_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_provider_kinds() {
        let err = from_provider(ProviderError::RateLimited { retry_after: Some(3) }, "qwen-plus");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());
        assert_eq!(err.context_value("model"), Some("qwen-plus"));

        let err = from_provider(
            ProviderError::Api { status: 503, message: "overloaded".into() },
            "qwen-plus",
        );
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);

        let err = from_provider(ProviderError::AuthenticationFailed, "gpt-4o");
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_object_type() {
        let err = unknown_object_type("spaceship");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.context_value("object_type"), Some("spaceship"));
    }
}
