use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::operation::Call;

/// Errors raised by the host while executing a downstream call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallFailure {
    /// The target reverted, optionally with return data.
    Reverted(Bytes),
    /// The account cannot cover the call's value.
    InsufficientBalance,
    /// Used by off-chain mocks or partially implemented hosts.
    NotImplemented,
}

/// Execution environment the account runs against, implemented differently on-chain vs off-chain.
///
/// The account snapshots the host before executing a batch and restores the snapshot if any
/// call fails, so hosts must make `restore` undo every effect of `call`.
pub trait ExecutionHost {
    type Snapshot;

    fn block_timestamp(&self) -> u64;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);

    fn call(&mut self, _from: Address, _call: &Call) -> Result<Bytes, CallFailure> {
        Err(CallFailure::NotImplemented)
    }
}
