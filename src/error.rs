use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error category reported alongside every failure event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InputValidation,
    Resolution,
    Timeout,
    Transport,
    Protocol,
    Cancelled,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InputValidation => "input",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unexpected => "unexpected",
        };
        f.write_str(name)
    }
}

/// Port specification parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortSpecError {
    #[error("Port specification is empty")]
    Empty,
    #[error("Invalid port specification: '{token}'")]
    Format { token: String },
}

#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    PortSpec(#[from] PortSpecError),

    /// `temporary` marks lookups that could succeed on retry (EAI_AGAIN)
    #[error("Could not resolve host '{target}'")]
    Resolution { target: String, temporary: bool },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Transport(String),

    #[error("Query failed with response code: {0}")]
    Protocol(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::InvalidInput(_) | ProbeError::PortSpec(_) => ErrorKind::InputValidation,
            ProbeError::Resolution { .. } => ErrorKind::Resolution,
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::Transport(_) => ErrorKind::Transport,
            ProbeError::Protocol(_) => ErrorKind::Protocol,
            ProbeError::Cancelled => ErrorKind::Cancelled,
            ProbeError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ProbeError::InvalidInput(message.into())
    }

    pub(crate) fn unresolved(target: &str) -> Self {
        ProbeError::Resolution {
            target: target.to_string(),
            temporary: false,
        }
    }

    pub(crate) fn unresolved_for_now(target: &str) -> Self {
        ProbeError::Resolution {
            target: target.to_string(),
            temporary: true,
        }
    }

    /// True when the name definitively does not exist
    pub fn is_host_not_found(&self) -> bool {
        matches!(self, ProbeError::Resolution { temporary: false, .. })
    }
}
