use thiserror::Error;

use crate::{coprocessor::CoprocessorError, progress::Step};

/// Caller-facing message for network-classified failures
pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "the coprocessor service could not be reached, check connectivity and retry";

/// Errors surfaced by the orchestration layer.
///
/// Nothing here is fatal to the process. Only [`FheBridgeError::ServiceUnavailable`] is meant
/// to be retried by the caller, no retry happens internally.
#[derive(Debug, Error)]
pub enum FheBridgeError {
    #[error("No usable runtime environment: {0}")]
    Environment(String),
    #[error("Failed to create coprocessor instance: {0}")]
    InstanceCreation(String),
    #[error("No coprocessor instance has been initialized")]
    NotInitialized,
    #[error("Encryption failed at step `{step}`: {message}")]
    Encryption { step: Step, message: String },
    #[error("Decryption failed at step `{step}`{}: {reason}", display_handle(.handle.as_deref()))]
    Decryption {
        step: Step,
        handle: Option<String>,
        reason: String,
    },
    #[error("Service unavailable at step `{step}` ({message}): {cause}")]
    ServiceUnavailable {
        step: Step,
        message: &'static str,
        cause: String,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unrecognized coprocessor response shape: {0}")]
    UnrecognizedResponseShape(String),
}

fn display_handle(handle: Option<&str>) -> String {
    handle.map_or_else(String::new, |handle| format!(" for handle `{handle}`"))
}

impl FheBridgeError {
    /// Whether the caller may retry the operation as is
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// Classifies a coprocessor failure on the encryption path.
    #[must_use]
    pub fn encryption(step: Step, error: CoprocessorError) -> Self {
        if error.is_network() {
            return Self::service_unavailable(step, &error);
        }
        Self::Encryption {
            step,
            message: error.to_string(),
        }
    }

    /// Classifies a coprocessor failure on either decryption path.
    #[must_use]
    pub fn decryption(step: Step, error: CoprocessorError) -> Self {
        if error.is_network() {
            return Self::service_unavailable(step, &error);
        }
        Self::Decryption {
            step,
            handle: None,
            reason: error.to_string(),
        }
    }

    /// A decryption failure tied to one handle
    #[must_use]
    pub fn decryption_for_handle(
        step: Step,
        handle: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Decryption {
            step,
            handle: Some(handle.to_string()),
            reason: reason.into(),
        }
    }

    fn service_unavailable(step: Step, error: &CoprocessorError) -> Self {
        Self::ServiceUnavailable {
            step,
            message: SERVICE_UNAVAILABLE_MESSAGE,
            cause: error.to_string(),
        }
    }
}
