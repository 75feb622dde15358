//! Cryptographic helpers used by the account.
//!
//! Purpose: recover the address that produced an operation signature so it can be compared
//! with the owner or a registered session key.

use alloy_primitives::{Address, FixedBytes};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use session_account_types::{address_of, SIGNATURE_LEN};

/// Recover an EOA address from a 32-byte digest and an ECDSA signature (r || s || v).
///
/// Notes:
/// - v is accepted in {0,1,27,28}; anything else is rejected rather than guessed.
/// - Returns `None` for malformed signatures or failed recovery.
pub fn recover_signer(digest: FixedBytes<32>, sig: &[u8]) -> Option<Address> {
    if sig.len() != SIGNATURE_LEN {
        return None;
    }
    let v = match sig[64] {
        27 | 28 => sig[64] - 27,
        0 | 1 => sig[64],
        _ => return None,
    };
    let signature = Signature::from_slice(&sig[..64]).ok()?;
    let recovery_id = RecoveryId::from_byte(v)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id).ok()?;
    Some(address_of(&key))
}
