use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use session_account_types::{CallFailure, SessionKeyId};

/// Reasons a permission set is refused at registration or `set_policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PermissionSetError {
    #[error("allow list is empty")]
    EmptyAllowList,
    #[error("expiry is in the past")]
    ExpiryInPast,
    #[error("validity window is empty")]
    EmptyValidity,
    #[error("rule {0} has a zero-length window with a nonzero cap")]
    ZeroWindowWithCap(usize),
    #[error("rule {0} has an empty validity window")]
    RuleValidityEmpty(usize),
    #[error("rule {0} duplicates the target/selector of an earlier rule")]
    DuplicateRule(usize),
    #[error("too many rules")]
    TooManyRules,
}

/// Errors during session-key registration and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SessionKeyError {
    #[error("unknown session key {0}")]
    Unknown(SessionKeyId),
    #[error("session key {0} is revoked")]
    Revoked(SessionKeyId),
    #[error("session key {0} is expired")]
    Expired(SessionKeyId),
    #[error("session key {0} is not yet valid")]
    NotYetValid(SessionKeyId),
    #[error("bad session key signature")]
    BadSignature,
    #[error("signer already has an active session key {0}")]
    DuplicateKey(SessionKeyId),
    #[error("invalid permission set: {0}")]
    InvalidPermissionSet(#[from] PermissionSetError),
}

/// Why a single call was denied by policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Denial {
    #[error("call is deny-listed")]
    DenyListed,
    #[error("no rule matches the call")]
    NoMatchingRule,
    #[error("matching rule {rule} is expired")]
    Expired { rule: usize },
    #[error("matching rule {rule} is not yet valid")]
    NotYetValid { rule: usize },
    #[error("value {value} exceeds per-call cap {max} of rule {rule}")]
    PerCallCapExceeded { rule: usize, value: U256, max: U256 },
    #[error("value would bring period spend to {attempted}, above cap {cap} of rule {rule}")]
    CapExceeded { rule: usize, attempted: U256, cap: U256 },
}

/// Denial of one call inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("call {index} denied: {reason}")]
pub struct Denied {
    pub index: usize,
    pub reason: Denial,
}

/// Distinguishes administrative misuse from a foreign submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnauthorizedReason {
    NotEntryGateway,
    NotOwner,
}

/// Errors during validation/execution of an operation. Every variant is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Rejection {
    #[error("unauthorized caller ({0:?})")]
    UnauthorizedCaller(UnauthorizedReason),
    #[error("replay rejected: expected nonce {expected}, got {got}")]
    ReplayRejected { expected: U256, got: U256 },
    #[error("bad signature")]
    BadSignature,
    #[error(transparent)]
    SessionKey(SessionKeyError),
    #[error(transparent)]
    Denied(#[from] Denied),
    #[error("invalid permission set: {0}")]
    InvalidPermissionSet(#[from] PermissionSetError),
    #[error("invalid admin call {index}: {reason}")]
    InvalidAdminCall { index: usize, reason: String },
    #[error("call {index} failed: {failure:?}")]
    ExecutionFailed { index: usize, failure: CallFailure },
}

impl From<SessionKeyError> for Rejection {
    fn from(err: SessionKeyError) -> Self {
        match err {
            SessionKeyError::BadSignature => Rejection::BadSignature,
            SessionKeyError::InvalidPermissionSet(inner) => Rejection::InvalidPermissionSet(inner),
            other => Rejection::SessionKey(other),
        }
    }
}

impl Rejection {
    /// Stable reason code for the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnauthorizedCaller(UnauthorizedReason::NotEntryGateway) => {
                "UnauthorizedCaller.NotEntryGateway"
            }
            Rejection::UnauthorizedCaller(UnauthorizedReason::NotOwner) => {
                "UnauthorizedCaller.NotOwner"
            }
            Rejection::ReplayRejected { .. } => "ReplayRejected",
            Rejection::BadSignature => "BadSignature",
            Rejection::SessionKey(err) => match err {
                SessionKeyError::Unknown(_) => "Unknown",
                SessionKeyError::Revoked(_) => "Revoked",
                SessionKeyError::Expired(_) => "Expired",
                SessionKeyError::NotYetValid(_) => "NotYetValid",
                SessionKeyError::BadSignature => "BadSignature",
                SessionKeyError::DuplicateKey(_) => "DuplicateKey",
                SessionKeyError::InvalidPermissionSet(_) => "InvalidPermissionSet",
            },
            Rejection::Denied(denied) => match denied.reason {
                Denial::DenyListed => "DenyListed",
                Denial::NoMatchingRule => "NoMatchingRule",
                Denial::Expired { .. } => "Expired",
                Denial::NotYetValid { .. } => "NotYetValid",
                Denial::PerCallCapExceeded { .. } => "PerCallCapExceeded",
                Denial::CapExceeded { .. } => "CapExceeded",
            },
            Rejection::InvalidPermissionSet(_) => "InvalidPermissionSet",
            Rejection::InvalidAdminCall { .. } => "InvalidAdminCall",
            Rejection::ExecutionFailed { .. } => "ExecutionFailed",
        }
    }

    /// Denial reason, if the operation was refused by policy evaluation.
    pub fn denial(&self) -> Option<Denial> {
        match self {
            Rejection::Denied(denied) => Some(denied.reason),
            _ => None,
        }
    }
}
