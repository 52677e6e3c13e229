use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Validation,
    TransientGateway,
    Data,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialization => "initialization error",
            Self::Validation => "validation error",
            Self::TransientGateway => "transient gateway error",
            Self::Data => "data error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("initialization error: {0}")]
    Initialization(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transient gateway error: {0}")]
    TransientGateway(String),
    #[error("data error: {0}")]
    Data(String),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Initialization(_) => ErrorKind::Initialization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientGateway(_) => ErrorKind::TransientGateway,
            Self::Data(_) => ErrorKind::Data,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Initialization(message)
            | Self::Validation(message)
            | Self::TransientGateway(message)
            | Self::Data(message) => message,
        }
    }
}

/// Failure reported by a device or sensor collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Network, auth or timeout trouble; the next cadence tick is the retry.
    #[error("{0}")]
    Transient(String),
    /// The remote side refused the request as malformed.
    #[error("{0}")]
    Validation(String),
}

impl From<GatewayError> for ControllerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transient(message) => Self::TransientGateway(message),
            GatewayError::Validation(message) => Self::Validation(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_keep_their_kind() {
        let transient: ControllerError = GatewayError::Transient("timed out".into()).into();
        let rejected: ControllerError = GatewayError::Validation("bad setpoint".into()).into();

        assert_eq!(transient.kind(), ErrorKind::TransientGateway);
        assert_eq!(rejected.kind(), ErrorKind::Validation);
        assert_eq!(rejected.message(), "bad setpoint");
        assert_eq!(transient.to_string(), "transient gateway error: timed out");
    }

    #[test]
    fn kind_names_match_error_prefixes() {
        let errors = [
            ControllerError::Initialization("x".into()),
            ControllerError::Validation("x".into()),
            ControllerError::TransientGateway("x".into()),
            ControllerError::Data("x".into()),
        ];

        for err in errors {
            assert_eq!(err.to_string(), format!("{}: {}", err.kind(), err.message()));
        }
    }
}
