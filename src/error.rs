//! Error types for the board onboarding controller.

use crate::onboarding::state::ConversationPhase;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures reported by an onboarding session collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Request failed: {reason}")]
    Network { reason: String },

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed session payload: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Whether the payload itself was unusable (as opposed to the call failing).
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Errors surfaced by the onboarding controller's handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnboardingError {
    #[error("{operation} failed: {reason}")]
    Network {
        operation: Operation,
        reason: String,
    },

    #[error("{operation} returned a malformed session: {reason}")]
    MalformedResponse {
        operation: Operation,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidUserInput(String),

    #[error("An answer is already being submitted")]
    DuplicateSubmission,

    #[error("Cannot {action} while {phase}")]
    NotAllowed {
        action: &'static str,
        phase: ConversationPhase,
    },

    #[error("Controller has been shut down")]
    ShutDown,
}

impl OnboardingError {
    /// Classify a collaborator failure for the given operation.
    pub fn from_api(operation: Operation, err: ApiError) -> Self {
        if err.is_malformed() {
            Self::MalformedResponse {
                operation,
                reason: err.to_string(),
            }
        } else {
            Self::Network {
                operation,
                reason: err.to_string(),
            }
        }
    }

    /// Whether `retry` can recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::MalformedResponse { .. })
    }
}

/// The collaborator call an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Refresh,
    Answer,
    Confirm,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Refresh => "refresh",
            Self::Answer => "answer",
            Self::Confirm => "confirm",
        };
        write!(f, "{s}")
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
