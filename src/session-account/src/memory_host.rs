//! In-memory execution host for off-chain simulation and tests.
//!
//! Calls move native value between balances and are recorded in a call log. Targets can be
//! marked as reverting to exercise batch rollback.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes, U256};

use session_account_types::{Call, CallFailure, ExecutionHost};

#[derive(Clone, Debug, Default)]
pub struct MemoryHost {
    pub block_timestamp: u64,
    balances: BTreeMap<Address, U256>,
    reverting: BTreeSet<Address>,
    log: Vec<(Address, Call)>,
}

/// Everything `call` can change.
#[derive(Clone, Debug)]
pub struct MemorySnapshot {
    balances: BTreeMap<Address, U256>,
    log_len: usize,
}

impl MemoryHost {
    pub fn new(block_timestamp: u64) -> Self {
        Self {
            block_timestamp,
            ..Self::default()
        }
    }

    pub fn fund(&mut self, who: Address, amount: U256) {
        let balance = self.balances.entry(who).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn set_reverting(&mut self, target: Address) {
        self.reverting.insert(target);
    }

    pub fn advance(&mut self, seconds: u64) {
        self.block_timestamp = self.block_timestamp.saturating_add(seconds);
    }

    pub fn balance_of(&self, who: Address) -> U256 {
        self.balances.get(&who).copied().unwrap_or_default()
    }

    /// Successfully executed calls as `(from, call)`.
    pub fn call_log(&self) -> &[(Address, Call)] {
        &self.log
    }
}

impl ExecutionHost for MemoryHost {
    type Snapshot = MemorySnapshot;

    fn block_timestamp(&self) -> u64 {
        self.block_timestamp
    }

    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            balances: self.balances.clone(),
            log_len: self.log.len(),
        }
    }

    fn restore(&mut self, snapshot: MemorySnapshot) {
        self.balances = snapshot.balances;
        self.log.truncate(snapshot.log_len);
    }

    fn call(&mut self, from: Address, call: &Call) -> Result<Bytes, CallFailure> {
        if self.reverting.contains(&call.target) {
            return Err(CallFailure::Reverted(Bytes::new()));
        }
        if call.value > U256::ZERO {
            let available = self.balance_of(from);
            if available < call.value {
                return Err(CallFailure::InsufficientBalance);
            }
            self.balances.insert(from, available - call.value);
            self.fund(call.target, call.value);
        }
        self.log.push((from, call.clone()));
        Ok(Bytes::new())
    }
}
