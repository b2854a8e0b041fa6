use std::error::Error as StdError;
use thiserror::Error;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Flight, bet, user or settings absent.
    NotFound,
    /// Duplicate side bet.
    Conflict,
    /// Insufficient balance or a rule violation.
    Forbidden,
    /// Storage or collaborator failure.
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Internal => 500,
        }
    }
}

/// Error returned by every service operation.
///
/// `message` is safe to show to callers; `cause` is kept for diagnostics only.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

/// Map a collaborator failure to `Internal` with `message`, keeping the failure as the cause.
pub(crate) fn internal(message: &'static str) -> impl FnOnce(anyhow::Error) -> ServiceError {
    move |err| ServiceError::internal(message).with_cause(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_codes() {
        assert_eq!(ServiceError::not_found("x").status_code(), 404);
        assert_eq!(ServiceError::conflict("x").status_code(), 409);
        assert_eq!(ServiceError::forbidden("x").status_code(), 403);
        assert_eq!(ServiceError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let err = ServiceError::internal("failed to place bet")
            .with_cause(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "failed to place bet");
        assert_eq!(err.kind(), ErrorKind::Internal);
        let source = err.source().expect("cause should be attached");
        assert_eq!(source.to_string(), "connection refused");
    }

    #[test]
    fn test_internal_mapper_keeps_cause() {
        let err = internal("failed to read bets")(anyhow::anyhow!("timeout"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "failed to read bets");
        assert_eq!(err.source().map(|source| source.to_string()), Some("timeout".to_string()));
    }

    #[test]
    fn test_no_cause_by_default() {
        let err = ServiceError::conflict("duplicate");
        assert!(err.source().is_none());
        assert_eq!(err.message(), "duplicate");
    }
}
