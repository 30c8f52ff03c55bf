//! Caller-facing error kinds and the classification of guarded calls.
//!
//! A guarded call can fail in three places, checked in this order:
//! the breaker refused it, the call itself failed, or the call succeeded
//! but the reply carries a soft error.

use crate::circuit_breaker::BreakerError;
use crate::gateway::{FaultCode, GatewayError, GatewayFault};
use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorKind {
    Unavailable = 1,
    NotFound = 2,
    AlreadyExists = 3,
    InvalidArgument = 4,
    Internal = 5,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Internal => "internal",
        }
    }

    /// Transport and soft faults share this mapping. `Unavailable` is
    /// reserved for breaker rejections, so a dependency that reports itself
    /// unavailable still surfaces as `Internal`.
    pub fn from_fault(code: FaultCode) -> Self {
        match code {
            FaultCode::NotFound => ErrorKind::NotFound,
            FaultCode::AlreadyExists => ErrorKind::AlreadyExists,
            FaultCode::InvalidArgument => ErrorKind::InvalidArgument,
            FaultCode::Unavailable | FaultCode::DeadlineExceeded | FaultCode::Internal => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// Admission denied, no attempt made.
    CircuitOpen,
    /// Attempt made, the dependency returned an error.
    CallFailed,
    /// Attempt succeeded but the reply encodes a business failure.
    SoftError,
    /// Rejected before any call was attempted.
    Validation,
}

/// Classified failure of a user operation. `message` is safe to show to
/// untrusted clients; dependency detail only goes to the log.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub origin: FailureOrigin,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, origin: FailureOrigin, message: impl Into<String>) -> Self {
        Self { kind, origin, message: message.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, FailureOrigin::Validation, message)
    }

    /// Tiers one and two: breaker rejection, then transport failure.
    pub fn from_breaker(op: &str, err: BreakerError<GatewayError>) -> Self {
        match err {
            BreakerError::Open { name } => {
                warn!(op, breaker = %name, "call short-circuited, dependency presumed down");
                Self::new(ErrorKind::Unavailable, FailureOrigin::CircuitOpen, public_message(ErrorKind::Unavailable, op))
            }
            BreakerError::Inner(e) => {
                let kind = ErrorKind::from_fault(e.code);
                if kind == ErrorKind::Internal {
                    error!(op, code = %e.code, detail = %e.message, "gateway call failed");
                } else {
                    warn!(op, code = %e.code, detail = %e.message, "gateway call rejected");
                }
                Self::new(kind, FailureOrigin::CallFailed, public_message(kind, op))
            }
        }
    }

    /// Tier three: soft error inside a successful reply.
    pub fn from_soft(op: &str, fault: &GatewayFault) -> Self {
        let code = fault.code();
        let kind = ErrorKind::from_fault(code);
        warn!(op, code = %code, detail = %fault.message, "gateway reply carried an error");
        Self::new(kind, FailureOrigin::SoftError, public_message(kind, op))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

fn public_message(kind: ErrorKind, op: &str) -> String {
    match kind {
        ErrorKind::Unavailable => "user store is temporarily unavailable".to_string(),
        ErrorKind::NotFound => "user not found".to_string(),
        ErrorKind::AlreadyExists => "user with this email already exists".to_string(),
        ErrorKind::InvalidArgument => format!("invalid request: {op}"),
        ErrorKind::Internal => format!("failed to {op}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(code: FaultCode, msg: &str) -> BreakerError<GatewayError> {
        BreakerError::Inner(GatewayError::new(code, msg))
    }

    fn soft(msg: &str) -> GatewayFault {
        GatewayFault { code: None, message: msg.to_string() }
    }

    #[test]
    fn breaker_rejection_is_always_unavailable() {
        let err = ServiceError::from_breaker("get user", BreakerError::Open { name: "DBGateway".into() });
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(err.origin, FailureOrigin::CircuitOpen);
        assert!(!err.message.contains("not found"));
    }

    #[test]
    fn transport_sentinels_map_to_kinds() {
        let nf = ServiceError::from_breaker("get user", transport(FaultCode::NotFound, "no rows"));
        assert_eq!((nf.kind, nf.origin), (ErrorKind::NotFound, FailureOrigin::CallFailed));

        let dup = ServiceError::from_breaker("create user", transport(FaultCode::AlreadyExists, "dup"));
        assert_eq!(dup.kind, ErrorKind::AlreadyExists);

        let down = ServiceError::from_breaker("create user", transport(FaultCode::Unavailable, "refused"));
        assert_eq!(down.kind, ErrorKind::Internal);

        let slow = ServiceError::from_breaker("create user", transport(FaultCode::DeadlineExceeded, "late"));
        assert_eq!(slow.kind, ErrorKind::Internal);
    }

    #[test]
    fn soft_errors_are_classified_by_fault() {
        assert_eq!(ServiceError::from_soft("get user", &soft("user not found")).kind, ErrorKind::NotFound);
        assert_eq!(
            ServiceError::from_soft("create user", &soft("duplicate key value")).kind,
            ErrorKind::AlreadyExists
        );
        let other = ServiceError::from_soft("delete user", &soft("deadlock detected"));
        assert_eq!((other.kind, other.origin), (ErrorKind::Internal, FailureOrigin::SoftError));
    }

    #[test]
    fn raw_detail_is_not_echoed() {
        let err = ServiceError::from_breaker(
            "get users",
            transport(FaultCode::Internal, "pq: password authentication failed for user \"app\""),
        );
        assert_eq!(err.message, "failed to get users");
        assert_eq!(err.to_string(), "failed to get users");
    }
}
