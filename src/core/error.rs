use std::fmt;
use thiserror::Error;

/// Which generative capability produced a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Analysis,
    Planning,
    Script,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Analysis => "analysis",
            Capability::Planning => "planning",
            Capability::Script => "script",
        };
        f.write_str(name)
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// Bad input to a controller operation. Raised before any capability call.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("pipeline is busy")]
    Busy,

    #[error("episode {0} is already being generated")]
    EpisodeInFlight(u32),

    /// The capability errored, or answered with an empty or unparseable payload.
    #[error("{capability} capability failed: {message}")]
    CapabilityFailure {
        capability: Capability,
        message: String,
    },

    /// The payload parsed but broke the expected shape or invariants.
    #[error("{capability} output violates schema: {message}")]
    SchemaViolation {
        capability: Capability,
        message: String,
    },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }

    pub fn capability(capability: Capability, message: impl Into<String>) -> Self {
        PipelineError::CapabilityFailure {
            capability,
            message: message.into(),
        }
    }

    pub fn schema(capability: Capability, message: impl Into<String>) -> Self {
        PipelineError::SchemaViolation {
            capability,
            message: message.into(),
        }
    }

    /// Wraps a transport error, keeping the whole context chain in the message.
    pub fn from_transport(capability: Capability, err: &anyhow::Error) -> Self {
        Self::capability(capability, format!("{:#}", err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
