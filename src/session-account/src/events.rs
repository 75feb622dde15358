//! Append-only audit log.
//!
//! Every registration, revocation, policy change, configuration change, accepted execution
//! and rejection lands here with a monotonically increasing sequence number. Entries are
//! mirrored to `tracing` as they are appended.

use alloy_primitives::{Address, FixedBytes};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use session_account_types::{SessionKeyId, SignerHint};

use crate::{errors::Rejection, policy_manager::PolicyRef};

/// Who an event is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerIdentity {
    Owner(Address),
    SessionKey { id: SessionKeyId, signer: Address },
    /// Signer could not be resolved; records what the request claimed.
    Claimed(SignerHint),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    SessionKeyRegistered { id: SessionKeyId, signer: Address },
    SessionKeyRevoked { id: SessionKeyId },
    PolicyChanged { policy: PolicyRef },
    OwnerRotated { previous: Address, new: Address },
    EntryGatewayChanged { previous: Address, new: Address },
    OperationExecuted { calls: usize },
    OperationRejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Accepted,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: u64,
    pub signer: SignerIdentity,
    pub operation_digest: FixedBytes<32>,
    pub kind: EventKind,
    pub outcome: Outcome,
    /// Stable reason code (see `Rejection::code`).
    pub reason_code: Option<String>,
    pub reason: Option<String>,
}

/// Event fields known before the sequence number is assigned.
#[derive(Clone, Debug)]
pub(crate) struct PendingEvent {
    pub timestamp: u64,
    pub signer: SignerIdentity,
    pub operation_digest: FixedBytes<32>,
    pub kind: EventKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEvent> {
        self.events.last()
    }

    pub(crate) fn record_accepted(&mut self, pending: PendingEvent) {
        info!(
            digest = %pending.operation_digest,
            signer = ?pending.signer,
            kind = ?pending.kind,
            "accepted"
        );
        self.push(pending, Outcome::Accepted, None);
    }

    pub(crate) fn record_rejected(&mut self, pending: PendingEvent, rejection: &Rejection) {
        warn!(
            digest = %pending.operation_digest,
            signer = ?pending.signer,
            code = rejection.code(),
            %rejection,
            "rejected"
        );
        self.push(pending, Outcome::Rejected, Some(rejection));
    }

    fn push(&mut self, pending: PendingEvent, outcome: Outcome, rejection: Option<&Rejection>) {
        let sequence = self.events.len() as u64;
        self.events.push(AuditEvent {
            sequence,
            timestamp: pending.timestamp,
            signer: pending.signer,
            operation_digest: pending.operation_digest,
            kind: pending.kind,
            outcome,
            reason_code: rejection.map(|r| r.code().to_string()),
            reason: rejection.map(|r| r.to_string()),
        });
    }
}
