//! Types shared by the session-key smart account engine and its off-chain tooling.
//!
//! Keeping these in one crate guarantees the engine and the encoder agree on rule shapes,
//! digests and admin calldata.

pub mod abi;
pub mod host;
pub mod operation;
pub mod rules;
pub mod signer;

pub use host::{CallFailure, ExecutionHost};
pub use operation::{
    call_bundle_hash, operation_digest, Call, OperationDomain, OperationRequest, SessionKeyId,
    SignerHint, SIGNATURE_LEN,
};
pub use rules::{
    CallRule, DenyEntry, PermissionSet, Selector, SelectorMatch, SpendCap, TargetMatch,
};
pub use signer::address_of;
