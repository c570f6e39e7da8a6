// Error types for the agent execution core
//
// Recovered vs fatal: dispatch-level failures (unknown action, bad arguments,
// rejected state writes, tool panics) are converted to failure text and fed
// back to the conversation by the dispatcher. Everything that reaches the
// caller through this enum is fatal to the current invocation.

use thiserror::Error;

/// Result type alias for agent core operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur during agent execution
#[derive(Debug, Error)]
pub enum AgentError {
    /// A state field's pre-write policy rejected the write
    #[error("state write to `{field}` rejected by policy `{policy}`: {reason}")]
    StateWrite {
        field: String,
        policy: String,
        reason: String,
    },

    /// Referenced state field does not exist or is not accessible
    #[error("unknown state field: {0}")]
    UnknownField(String),

    /// Field exists but its access mode forbids this operation
    #[error("field `{field}` is not {mode}-accessible")]
    FieldAccess { field: String, mode: &'static str },

    /// Requested action name is not in the eligible descriptor set
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Tool arguments failed to decode against the parameter schema
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A phase transition guard failed to evaluate (configuration defect)
    #[error("phase guard `{from}` -> `{to}` failed: {source}")]
    Guard {
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    /// Provider inference error (transport-level, fatal to the invocation)
    #[error("provider error: {0}")]
    Provider(String),

    /// Schema or configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Create a state write rejection error
    pub fn state_write(
        field: impl Into<String>,
        policy: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        AgentError::StateWrite {
            field: field.into(),
            policy: policy.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an unknown action error
    pub fn unknown_action(name: impl Into<String>) -> Self {
        AgentError::UnknownAction(name.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        AgentError::InvalidArguments(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        AgentError::Provider(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Configuration(msg.into())
    }
}
