//! Session-key arena.
//!
//! Records are never removed and ids are never reused: revocation flips a status flag.
//! Registering a signer whose earlier record was revoked yields a fresh record under a fresh
//! id, while the revoked id keeps failing validation forever.

use alloy_primitives::{Address, FixedBytes};
use serde::{Deserialize, Serialize};
use tracing::debug;

use session_account_types::{PermissionSet, SessionKeyId};

use crate::{
    errors::{PermissionSetError, SessionKeyError},
    policy_manager::{check_rules, PolicyRef},
    utils::crypto::recover_signer,
};

/// Owner-supplied registration parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyGrant {
    /// Address derived from the session public key.
    pub signer: Address,
    pub permissions: PermissionSet,
    pub valid_from: u64,
    /// Exclusive expiry.
    pub valid_until: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Active,
    Revoked { at: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub id: SessionKeyId,
    pub signer: Address,
    /// Permission set as registered; the live rules and counters sit in the PolicyManager.
    pub permissions: PermissionSet,
    pub valid_from: u64,
    pub valid_until: u64,
    pub registered_at: u64,
    pub status: KeyStatus,
}

impl SessionKey {
    pub fn is_revoked(&self) -> bool {
        matches!(self.status, KeyStatus::Revoked { .. })
    }

    pub fn is_live(&self, now: u64) -> bool {
        !self.is_revoked() && now >= self.valid_from && now < self.valid_until
    }
}

/// Result of a successful validation.
#[derive(Clone, Copy, Debug)]
pub struct SessionGrant<'a> {
    pub id: SessionKeyId,
    pub signer: Address,
    pub permissions: &'a PermissionSet,
    /// Handle the PolicyManager uses for this key's counters.
    pub policy: PolicyRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyManager {
    address: Address,
    keys: Vec<SessionKey>,
}

impl SessionKeyManager {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            keys: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn get(&self, id: SessionKeyId) -> Option<&SessionKey> {
        usize::try_from(id.0).ok().and_then(|i| self.keys.get(i))
    }

    pub fn keys(&self) -> &[SessionKey] {
        &self.keys
    }

    /// Active (non-revoked) record for `signer`, if any.
    pub fn active_for(&self, signer: Address) -> Option<&SessionKey> {
        self.keys
            .iter()
            .find(|key| key.signer == signer && !key.is_revoked())
    }

    /// Append a new record. Authorisation is the caller's job.
    pub fn register(
        &mut self,
        grant: SessionKeyGrant,
        now: u64,
    ) -> Result<SessionKeyId, SessionKeyError> {
        if let Some(existing) = self.active_for(grant.signer) {
            return Err(SessionKeyError::DuplicateKey(existing.id));
        }
        if grant.permissions.is_empty() {
            return Err(PermissionSetError::EmptyAllowList.into());
        }
        if grant.valid_until <= now {
            return Err(PermissionSetError::ExpiryInPast.into());
        }
        if grant.valid_until <= grant.valid_from {
            return Err(PermissionSetError::EmptyValidity.into());
        }
        check_rules(&grant.permissions)?;

        let id = SessionKeyId(self.keys.len() as u64);
        self.keys.push(SessionKey {
            id,
            signer: grant.signer,
            permissions: grant.permissions,
            valid_from: grant.valid_from,
            valid_until: grant.valid_until,
            registered_at: now,
            status: KeyStatus::Active,
        });
        Ok(id)
    }

    /// Mark a key revoked. Returns `false` if it already was.
    pub fn revoke(&mut self, id: SessionKeyId, now: u64) -> Result<bool, SessionKeyError> {
        let key = usize::try_from(id.0)
            .ok()
            .and_then(|i| self.keys.get_mut(i))
            .ok_or(SessionKeyError::Unknown(id))?;
        if key.is_revoked() {
            return Ok(false);
        }
        key.status = KeyStatus::Revoked { at: now };
        Ok(true)
    }

    /// Check that `signature` over `digest` comes from a live session key.
    ///
    /// Status and validity are checked before the signature, so a revoked key reports
    /// `Revoked` whatever it signed.
    pub fn validate(
        &self,
        id: SessionKeyId,
        digest: FixedBytes<32>,
        signature: &[u8],
        now: u64,
    ) -> Result<SessionGrant<'_>, SessionKeyError> {
        let key = self.get(id).ok_or(SessionKeyError::Unknown(id))?;
        if key.is_revoked() {
            return Err(SessionKeyError::Revoked(id));
        }
        if now < key.valid_from {
            return Err(SessionKeyError::NotYetValid(id));
        }
        if now >= key.valid_until {
            return Err(SessionKeyError::Expired(id));
        }
        match recover_signer(digest, signature) {
            Some(recovered) if recovered == key.signer => {}
            other => {
                debug!(%id, recovered = ?other, expected = %key.signer, "session signature mismatch");
                return Err(SessionKeyError::BadSignature);
            }
        }
        Ok(SessionGrant {
            id,
            signer: key.signer,
            permissions: &key.permissions,
            policy: PolicyRef::SessionKey(id),
        })
    }
}
