//! Authorization core of a session-key smart account.
//!
//! Three components, evaluated leaf-first:
//! - [`PolicyManager`]: call-level constraints (target, selector, value, time window,
//!   per-period spend caps), independent of who signed.
//! - [`SessionKeyManager`]: delegated signing credentials with an expiry and a permission set.
//! - [`SmartAccount`]: resolves the signer, consults both managers and executes the batch
//!   atomically.
//!
//! The engine is synchronous and holds no locks; callers serialize submissions per account.

pub mod account;
pub mod constants;
pub mod errors;
pub mod events;
pub mod memory_host;
pub mod policy_manager;
pub mod session_keys;
pub mod utils;

pub use account::{AccountConfig, ExecutionResult, OperationStage, SmartAccount, ValidatedOperation};
pub use errors::{Denial, Denied, PermissionSetError, Rejection, SessionKeyError, UnauthorizedReason};
pub use events::{AuditEvent, AuditLog, EventKind, Outcome, SignerIdentity};
pub use memory_host::MemoryHost;
pub use policy_manager::{Policy, PolicyManager, PolicyRef, WindowUsage};
pub use session_keys::{KeyStatus, SessionGrant, SessionKey, SessionKeyGrant, SessionKeyManager};

pub use session_account_types as types;
