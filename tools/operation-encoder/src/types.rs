use alloy_primitives::{Bytes, U256};

use session_account_types::{Call, OperationDomain, OperationRequest, SignerHint};

/// Operation awaiting a signature.
#[derive(Clone, Debug)]
pub struct UnsignedOperation {
    /// Domain separation parameters (used for digest construction).
    pub domain: OperationDomain,
    /// Credential that will sign.
    pub signer: SignerHint,
    /// Per-signer replay nonce.
    pub nonce: U256,
    /// Calls executed in order, all-or-nothing.
    pub calls: Vec<Call>,
}

impl UnsignedOperation {
    pub fn into_request(self, signature: Bytes) -> OperationRequest {
        OperationRequest {
            calls: self.calls,
            nonce: self.nonce,
            signer: self.signer,
            signature,
        }
    }
}
