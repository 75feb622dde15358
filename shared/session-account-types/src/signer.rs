use alloy_primitives::{keccak256, Address};
use k256::ecdsa::VerifyingKey;

/// Ethereum address of a secp256k1 public key: last 20 bytes of keccak256 of the
/// uncompressed point (without the 0x04 prefix).
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}
