//! Operation requests and the digest their signature must cover.
//!
//! The digest follows the EIP-712 layout so wallets can display what they sign:
//! `keccak256("\x19\x01" || domainSeparator || structHash)`.

use core::fmt;

use alloy_primitives::{keccak256, Address, Bytes, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use crate::rules::Selector;

/// Length of an ECDSA signature (r || s || v).
pub const SIGNATURE_LEN: usize = 65;

/// A single downstream call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(target: Address, value: U256, data: Bytes) -> Self {
        Self {
            target,
            value,
            data,
        }
    }

    /// Function selector, or `None` when calldata is shorter than 4 bytes.
    pub fn selector(&self) -> Option<Selector> {
        if self.data.len() < 4 {
            return None;
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&self.data[..4]);
        Some(FixedBytes(sel))
    }
}

/// Stable arena index of a session key. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKeyId(pub u64);

impl fmt::Display for SessionKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which credential claims to have signed the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerHint {
    Owner,
    SessionKey(SessionKeyId),
}

impl SignerHint {
    fn class_byte(&self) -> u8 {
        match self {
            SignerHint::Owner => 0,
            SignerHint::SessionKey(_) => 1,
        }
    }

    fn session_key_word(&self) -> u64 {
        match self {
            SignerHint::Owner => 0,
            SignerHint::SessionKey(id) => id.0,
        }
    }
}

/// A signed batch of calls submitted through the entry gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub calls: Vec<Call>,
    pub nonce: U256,
    pub signer: SignerHint,
    /// ECDSA signature (r || s || v) over [`operation_digest`].
    pub signature: Bytes,
}

/// Domain separation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDomain {
    pub chain_id: u64,
    pub account: Address,
}

/// keccak256 over `target || value || keccak256(data)` for every call, in order.
pub fn call_bundle_hash(calls: &[Call]) -> FixedBytes<32> {
    let mut buf = Vec::with_capacity(calls.len() * (20 + 32 + 32));
    for call in calls {
        buf.extend_from_slice(call.target.as_slice());
        buf.extend_from_slice(&call.value.to_be_bytes::<32>());
        buf.extend_from_slice(keccak256(&call.data).as_slice());
    }
    keccak256(buf)
}

/// Digest the operation signature must cover.
pub fn operation_digest(
    domain: &OperationDomain,
    signer: SignerHint,
    nonce: U256,
    calls: &[Call],
) -> FixedBytes<32> {
    let domain_type_hash = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );
    let domain_name_hash = keccak256(b"Session Smart Account");
    let domain_version_hash = keccak256(b"1");

    let mut domain_buf = Vec::with_capacity(32 * 5);
    domain_buf.extend_from_slice(domain_type_hash.as_slice());
    domain_buf.extend_from_slice(domain_name_hash.as_slice());
    domain_buf.extend_from_slice(domain_version_hash.as_slice());
    domain_buf.extend_from_slice(&U256::from(domain.chain_id).to_be_bytes::<32>());
    domain_buf.extend_from_slice(&pad_address(domain.account));
    let domain_separator = keccak256(domain_buf);

    let msg_type_hash = keccak256(
        b"Operation(address account,uint8 signerClass,uint64 sessionKeyId,uint256 nonce,bytes32 callBundleHash)",
    );

    let mut struct_buf = Vec::with_capacity(32 * 6);
    struct_buf.extend_from_slice(msg_type_hash.as_slice());
    struct_buf.extend_from_slice(&pad_address(domain.account));
    struct_buf.extend_from_slice(&U256::from(signer.class_byte()).to_be_bytes::<32>());
    struct_buf.extend_from_slice(&U256::from(signer.session_key_word()).to_be_bytes::<32>());
    struct_buf.extend_from_slice(&nonce.to_be_bytes::<32>());
    struct_buf.extend_from_slice(call_bundle_hash(calls).as_slice());
    let struct_hash = keccak256(struct_buf);

    let mut final_buf = Vec::with_capacity(2 + 32 + 32);
    final_buf.extend_from_slice(b"\x19\x01");
    final_buf.extend_from_slice(domain_separator.as_slice());
    final_buf.extend_from_slice(struct_hash.as_slice());
    keccak256(final_buf)
}

fn pad_address(addr: Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(addr.as_slice());
    padded
}
