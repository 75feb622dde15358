use alloy_primitives::{address, Address, FixedBytes, U256};
use alloy_sol_types::SolCall;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use session_account_types::{
    abi::ISmartAccount, address_of, CallRule, OperationDomain, PermissionSet, SessionKeyId, SignerHint,
};

use crate::encoder::{
    encode_call, register_session_key, revoke_session_key, rotate_owner, sign_operation,
    signer_address, unsigned_digest,
};
use crate::types::UnsignedOperation;

const ACCOUNT: Address = address!("00000000000000000000000000000000000000aa");
const TOKEN: Address = address!("1000000000000000000000000000000000000001");

fn unsigned(signer: SignerHint) -> UnsignedOperation {
    UnsignedOperation {
        domain: OperationDomain {
            chain_id: 421614,
            account: ACCOUNT,
        },
        signer,
        nonce: U256::from(3u64),
        calls: vec![encode_call(TOKEN, U256::ZERO, [0xa9, 0x05, 0x9c, 0xbb], &[0u8; 64])],
    }
}

#[test]
fn test_signature_recovers_to_signer() {
    let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    let op = unsigned(SignerHint::Owner);
    let digest = unsigned_digest(&op);
    let request = sign_operation(op, &key).unwrap();

    assert_eq!(request.signature.len(), 65);
    let v = request.signature[64];
    assert!(v == 27 || v == 28);

    let sig = Signature::from_slice(&request.signature[..64]).unwrap();
    let recid = RecoveryId::from_byte(v - 27).unwrap();
    let recovered = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recid).unwrap();
    assert_eq!(address_of(&recovered), signer_address(&key));
}

#[test]
fn test_digest_differs_per_signer_class() {
    let owner = unsigned_digest(&unsigned(SignerHint::Owner));
    let session = unsigned_digest(&unsigned(SignerHint::SessionKey(SessionKeyId(0))));
    assert_ne!(owner, session);
}

#[test]
fn test_admin_calls_target_the_account() {
    let set = PermissionSet::new(vec![CallRule::exact(TOKEN, FixedBytes([1, 2, 3, 4]))]);
    let register = register_session_key(ACCOUNT, TOKEN, &set, 0, 100);
    assert_eq!(register.target, ACCOUNT);
    assert_eq!(register.value, U256::ZERO);
    assert_eq!(
        register.selector(),
        Some(FixedBytes(ISmartAccount::registerSessionKeyCall::SELECTOR))
    );

    let revoke = revoke_session_key(ACCOUNT, SessionKeyId(4));
    let decoded = ISmartAccount::revokeSessionKeyCall::abi_decode(&revoke.data, true).unwrap();
    assert_eq!(decoded.id, 4);

    let rotate = rotate_owner(ACCOUNT, TOKEN);
    assert_eq!(rotate.data.len(), 4 + 32);
}
