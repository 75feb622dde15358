use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_sol_types::SolCall;
use k256::ecdsa::SigningKey;

use session_account_types::{
    abi::{permission_set_to_abi, ISmartAccount},
    address_of, operation_digest, Call, OperationRequest, PermissionSet, SessionKeyId,
};

use crate::types::UnsignedOperation;

/// Ethereum address controlled by `key`.
pub fn signer_address(key: &SigningKey) -> Address {
    address_of(key.verifying_key())
}

/// Digest of an unsigned operation (must match the account's `operation_digest`).
pub fn unsigned_digest(op: &UnsignedOperation) -> FixedBytes<32> {
    operation_digest(&op.domain, op.signer, op.nonce, &op.calls)
}

/// Sign a 32-byte digest, producing `r || s || v` with `v` in {27, 28}.
pub fn sign_digest(digest: FixedBytes<32>, key: &SigningKey) -> Result<Bytes, k256::ecdsa::Error> {
    let (signature, recovery_id) = key.sign_prehash_recoverable(digest.as_slice())?;
    let mut sig_bytes = Vec::with_capacity(65);
    sig_bytes.extend_from_slice(&signature.to_bytes());
    sig_bytes.push(27 + recovery_id.to_byte());
    Ok(Bytes::from(sig_bytes))
}

/// Sign an operation and turn it into a submittable request.
pub fn sign_operation(
    op: UnsignedOperation,
    key: &SigningKey,
) -> Result<OperationRequest, k256::ecdsa::Error> {
    let signature = sign_digest(unsigned_digest(&op), key)?;
    Ok(op.into_request(signature))
}

/// Build a call from a selector and already ABI-encoded arguments.
pub fn encode_call(target: Address, value: U256, selector: [u8; 4], args: &[u8]) -> Call {
    let mut data = Vec::with_capacity(4 + args.len());
    data.extend_from_slice(&selector);
    data.extend_from_slice(args);
    Call::new(target, value, Bytes::from(data))
}

fn self_call(account: Address, data: Vec<u8>) -> Call {
    Call::new(account, U256::ZERO, Bytes::from(data))
}

pub fn rotate_owner(account: Address, new_owner: Address) -> Call {
    self_call(
        account,
        ISmartAccount::rotateOwnerCall {
            newOwner: new_owner,
        }
        .abi_encode(),
    )
}

pub fn set_entry_gateway(account: Address, gateway: Address) -> Call {
    self_call(account, ISmartAccount::setEntryGatewayCall { gateway }.abi_encode())
}

pub fn register_session_key(
    account: Address,
    signer: Address,
    permissions: &PermissionSet,
    valid_from: u64,
    valid_until: u64,
) -> Call {
    let (rules, deny) = permission_set_to_abi(permissions);
    self_call(
        account,
        ISmartAccount::registerSessionKeyCall {
            signer,
            rules,
            deny,
            validFrom: valid_from,
            validUntil: valid_until,
        }
        .abi_encode(),
    )
}

pub fn revoke_session_key(account: Address, id: SessionKeyId) -> Call {
    self_call(account, ISmartAccount::revokeSessionKeyCall { id: id.0 }.abi_encode())
}

pub fn set_default_policy(account: Address, permissions: &PermissionSet) -> Call {
    let (rules, deny) = permission_set_to_abi(permissions);
    self_call(
        account,
        ISmartAccount::setDefaultPolicyCall { rules, deny }.abi_encode(),
    )
}

pub fn set_session_policy(account: Address, id: SessionKeyId, permissions: &PermissionSet) -> Call {
    let (rules, deny) = permission_set_to_abi(permissions);
    self_call(
        account,
        ISmartAccount::setSessionPolicyCall {
            id: id.0,
            rules,
            deny,
        }
        .abi_encode(),
    )
}
