//! The account of record.
//!
//! Design notes:
//! - `submit` is the only gateway-facing entry point: signature resolution, session-key
//!   validation, policy evaluation and execution happen in one call, so there is no window
//!   between checking and using the account state.
//! - A batch runs against a staged copy of the account state and a host snapshot. Any
//!   failure drops the copy and restores the snapshot; only the rejection event survives.
//! - Each external call is checked against the staged policy right before it runs, so a
//!   policy change earlier in the batch governs the calls after it.
//! - Administration (owner rotation, gateway change, session keys, policies) is performed by
//!   calls whose target is the account itself, and only an owner-authorised batch may
//!   contain them.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_sol_types::{SolCall, SolInterface};
use serde::{Deserialize, Serialize};
use tracing::debug;

use session_account_types::{
    abi::{permission_set_from_abi, ISmartAccount},
    call_bundle_hash, operation_digest, Call, ExecutionHost, OperationDomain, OperationRequest,
    SessionKeyId, SignerHint,
};

use crate::{
    errors::{Rejection, SessionKeyError, UnauthorizedReason},
    events::{AuditLog, EventKind, PendingEvent, SignerIdentity},
    policy_manager::{PolicyManager, PolicyRef},
    session_keys::{SessionKey, SessionKeyGrant, SessionKeyManager},
    utils::crypto::recover_signer,
};

/// Construction-time wiring of the three components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub address: Address,
    pub chain_id: u64,
    pub owner: Address,
    pub entry_gateway: Address,
    pub policy_manager: Address,
    pub session_key_manager: Address,
}

/// Per-operation progress, logged at debug level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStage {
    Received,
    SignatureResolved,
    SessionChecked,
    PolicyChecked,
    Executed,
    Rejected,
}

/// Outcome of a successful read-only validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatedOperation {
    pub digest: FixedBytes<32>,
    pub signer: SignerIdentity,
    pub policy: PolicyRef,
}

/// Outcome of an executed batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub digest: FixedBytes<32>,
    pub signer: SignerIdentity,
    /// Return data per call, in batch order.
    pub returns: Vec<Bytes>,
}

/// Mutable account state. Cloned to stage a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct AccountState {
    owner: Address,
    entry_gateway: Address,
    owner_nonce: U256,
    session_nonces: BTreeMap<SessionKeyId, U256>,
    policies: PolicyManager,
    session_keys: SessionKeyManager,
}

impl AccountState {
    fn next_nonce(&self, signer: SignerHint) -> U256 {
        match signer {
            SignerHint::Owner => self.owner_nonce,
            SignerHint::SessionKey(id) => self.session_nonces.get(&id).copied().unwrap_or_default(),
        }
    }

    fn consume_nonce(&mut self, signer: SignerHint) {
        let next = self.next_nonce(signer).saturating_add(U256::from(1u64));
        match signer {
            SignerHint::Owner => self.owner_nonce = next,
            SignerHint::SessionKey(id) => {
                self.session_nonces.insert(id, next);
            }
        }
    }
}

/// Resolved authority for one batch.
#[derive(Clone, Copy, Debug)]
struct Authorization {
    identity: SignerIdentity,
    policy: PolicyRef,
    /// Nonce slot to consume on success; `None` for direct owner execution.
    nonce: Option<SignerHint>,
}

impl Authorization {
    fn is_owner(&self) -> bool {
        matches!(self.identity, SignerIdentity::Owner(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAccount {
    address: Address,
    chain_id: u64,
    state: AccountState,
    audit: AuditLog,
}

impl SmartAccount {
    /// Wire a fresh account. The default policy starts as allow-all.
    pub fn new(config: AccountConfig) -> Self {
        Self {
            address: config.address,
            chain_id: config.chain_id,
            state: AccountState {
                owner: config.owner,
                entry_gateway: config.entry_gateway,
                owner_nonce: U256::ZERO,
                session_nonces: BTreeMap::new(),
                policies: PolicyManager::new(config.policy_manager),
                session_keys: SessionKeyManager::new(config.session_key_manager),
            },
            audit: AuditLog::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn owner(&self) -> Address {
        self.state.owner
    }

    pub fn entry_gateway(&self) -> Address {
        self.state.entry_gateway
    }

    pub fn config(&self) -> AccountConfig {
        AccountConfig {
            address: self.address,
            chain_id: self.chain_id,
            owner: self.state.owner,
            entry_gateway: self.state.entry_gateway,
            policy_manager: self.state.policies.address(),
            session_key_manager: self.state.session_keys.address(),
        }
    }

    pub fn domain(&self) -> OperationDomain {
        OperationDomain {
            chain_id: self.chain_id,
            account: self.address,
        }
    }

    /// Nonce the next operation from `signer` must carry.
    pub fn next_nonce(&self, signer: SignerHint) -> U256 {
        self.state.next_nonce(signer)
    }

    pub fn policies(&self) -> &PolicyManager {
        &self.state.policies
    }

    pub fn session_keys(&self) -> &SessionKeyManager {
        &self.state.session_keys
    }

    pub fn session_key(&self, id: SessionKeyId) -> Option<&SessionKey> {
        self.state.session_keys.get(id)
    }

    pub fn remaining_in_period(&self, policy: PolicyRef, rule: usize, now: u64) -> Option<U256> {
        self.state.policies.remaining_in_period(policy, rule, now)
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Digest the request's signature must cover.
    pub fn operation_digest(&self, request: &OperationRequest) -> FixedBytes<32> {
        operation_digest(&self.domain(), request.signer, request.nonce, &request.calls)
    }

    /// Validate and execute a gateway-submitted operation as one atomic step.
    pub fn submit<H: ExecutionHost>(
        &mut self,
        caller: Address,
        request: &OperationRequest,
        host: &mut H,
    ) -> Result<ExecutionResult, Rejection> {
        let now = host.block_timestamp();
        let digest = self.operation_digest(request);
        trace_stage(digest, OperationStage::Received);

        let auth = match self.authorize(caller, request, digest, now) {
            Ok(auth) => auth,
            Err(rejection) => {
                let signer = SignerIdentity::Claimed(request.signer);
                return Err(self.reject(digest, signer, now, rejection));
            }
        };
        self.run_batch(auth, &request.calls, digest, now, host)
    }

    /// Read-only dry run of `submit` up to (and including) policy evaluation.
    ///
    /// Admin calls are replayed on a scratch copy so later calls are checked against the policy
    /// they would meet during execution. Nothing is consumed or recorded.
    pub fn validate_operation(
        &self,
        caller: Address,
        request: &OperationRequest,
        now: u64,
    ) -> Result<ValidatedOperation, Rejection> {
        let digest = self.operation_digest(request);
        let auth = self.authorize(caller, request, digest, now)?;
        self.check_admin_calls(&auth, &request.calls)?;
        let mut scratch = self.state.clone();
        let mut events = Vec::new();
        for (index, call) in request.calls.iter().enumerate() {
            self.stage_call(&mut scratch, &auth, index, call, digest, now, &mut events)?;
        }
        Ok(ValidatedOperation {
            digest,
            signer: auth.identity,
            policy: auth.policy,
        })
    }

    /// Owner-initiated execution that bypasses the gateway. Same policy and atomicity rules;
    /// no nonce is involved.
    pub fn execute_direct<H: ExecutionHost>(
        &mut self,
        caller: Address,
        calls: &[Call],
        host: &mut H,
    ) -> Result<ExecutionResult, Rejection> {
        let now = host.block_timestamp();
        let digest = call_bundle_hash(calls);
        if caller != self.state.owner {
            let rejection = Rejection::UnauthorizedCaller(UnauthorizedReason::NotOwner);
            let signer = SignerIdentity::Claimed(SignerHint::Owner);
            return Err(self.reject(digest, signer, now, rejection));
        }
        let auth = Authorization {
            identity: SignerIdentity::Owner(caller),
            policy: PolicyRef::Default,
            nonce: None,
        };
        self.run_batch(auth, calls, digest, now, host)
    }

    fn authorize(
        &self,
        caller: Address,
        request: &OperationRequest,
        digest: FixedBytes<32>,
        now: u64,
    ) -> Result<Authorization, Rejection> {
        if caller != self.state.entry_gateway {
            return Err(Rejection::UnauthorizedCaller(UnauthorizedReason::NotEntryGateway));
        }

        let expected = self.state.next_nonce(request.signer);
        if request.nonce != expected {
            return Err(Rejection::ReplayRejected {
                expected,
                got: request.nonce,
            });
        }

        let auth = match request.signer {
            SignerHint::Owner => {
                let recovered = recover_signer(digest, &request.signature);
                if recovered != Some(self.state.owner) {
                    return Err(Rejection::BadSignature);
                }
                Authorization {
                    identity: SignerIdentity::Owner(self.state.owner),
                    policy: PolicyRef::Default,
                    nonce: Some(SignerHint::Owner),
                }
            }
            SignerHint::SessionKey(id) => {
                let grant = self
                    .state
                    .session_keys
                    .validate(id, digest, &request.signature, now)?;
                trace_stage(digest, OperationStage::SessionChecked);
                Authorization {
                    identity: SignerIdentity::SessionKey {
                        id,
                        signer: grant.signer,
                    },
                    policy: grant.policy,
                    nonce: Some(request.signer),
                }
            }
        };
        trace_stage(digest, OperationStage::SignatureResolved);
        Ok(auth)
    }

    fn check_admin_calls(&self, auth: &Authorization, calls: &[Call]) -> Result<(), Rejection> {
        let has_admin_call = calls.iter().any(|call| call.target == self.address);
        if has_admin_call && !auth.is_owner() {
            return Err(Rejection::UnauthorizedCaller(UnauthorizedReason::NotOwner));
        }
        Ok(())
    }

    fn run_batch<H: ExecutionHost>(
        &mut self,
        auth: Authorization,
        calls: &[Call],
        digest: FixedBytes<32>,
        now: u64,
        host: &mut H,
    ) -> Result<ExecutionResult, Rejection> {
        let mut staged = self.state.clone();
        let mut events = Vec::new();

        let outcome = self.check_admin_calls(&auth, calls).and_then(|()| {
            self.execute(&mut staged, &auth, calls, digest, now, host, &mut events)
        });

        let returns = match outcome {
            Ok(returns) => returns,
            Err(rejection) => return Err(self.reject(digest, auth.identity, now, rejection)),
        };

        if let Some(slot) = auth.nonce {
            staged.consume_nonce(slot);
        }
        self.state = staged;
        for event in events {
            self.audit.record_accepted(event);
        }
        self.audit.record_accepted(PendingEvent {
            timestamp: now,
            signer: auth.identity,
            operation_digest: digest,
            kind: EventKind::OperationExecuted { calls: calls.len() },
        });
        trace_stage(digest, OperationStage::Executed);

        Ok(ExecutionResult {
            digest,
            signer: auth.identity,
            returns,
        })
    }

    /// Execute calls strictly in order; on the first failure the host is restored.
    #[allow(clippy::too_many_arguments)]
    fn execute<H: ExecutionHost>(
        &self,
        staged: &mut AccountState,
        auth: &Authorization,
        calls: &[Call],
        digest: FixedBytes<32>,
        now: u64,
        host: &mut H,
        events: &mut Vec<PendingEvent>,
    ) -> Result<Vec<Bytes>, Rejection> {
        let snapshot = host.snapshot();
        let mut returns = Vec::with_capacity(calls.len());
        for (index, call) in calls.iter().enumerate() {
            let result = self
                .stage_call(staged, auth, index, call, digest, now, events)
                .and_then(|admin_return| match admin_return {
                    Some(data) => Ok(data),
                    None => host
                        .call(self.address, call)
                        .map_err(|failure| Rejection::ExecutionFailed { index, failure }),
                });
            match result {
                Ok(data) => returns.push(data),
                Err(rejection) => {
                    host.restore(snapshot);
                    return Err(rejection);
                }
            }
        }
        trace_stage(digest, OperationStage::PolicyChecked);
        Ok(returns)
    }

    /// Apply a self-call to `staged`, or check an external call against the staged policy.
    ///
    /// Returns the self-call's return data, or `None` when an external call may go to the host.
    /// Each check sees the effects of every earlier call in the batch.
    #[allow(clippy::too_many_arguments)]
    fn stage_call(
        &self,
        staged: &mut AccountState,
        auth: &Authorization,
        index: usize,
        call: &Call,
        digest: FixedBytes<32>,
        now: u64,
        events: &mut Vec<PendingEvent>,
    ) -> Result<Option<Bytes>, Rejection> {
        if call.target == self.address {
            let ctx = AdminContext {
                index,
                now,
                digest,
                signer: auth.identity,
            };
            return apply_admin_call(staged, &ctx, call, events).map(Some);
        }
        staged.policies.evaluate(auth.policy, [(index, call)], now)?;
        Ok(None)
    }

    fn reject(
        &mut self,
        digest: FixedBytes<32>,
        signer: SignerIdentity,
        now: u64,
        rejection: Rejection,
    ) -> Rejection {
        trace_stage(digest, OperationStage::Rejected);
        self.audit.record_rejected(
            PendingEvent {
                timestamp: now,
                signer,
                operation_digest: digest,
                kind: EventKind::OperationRejected,
            },
            &rejection,
        );
        rejection
    }
}

fn trace_stage(digest: FixedBytes<32>, stage: OperationStage) {
    debug!(%digest, ?stage, "operation stage");
}

struct AdminContext {
    index: usize,
    now: u64,
    digest: FixedBytes<32>,
    signer: SignerIdentity,
}

impl AdminContext {
    fn invalid(&self, reason: impl Into<String>) -> Rejection {
        Rejection::InvalidAdminCall {
            index: self.index,
            reason: reason.into(),
        }
    }

    fn event(&self, kind: EventKind) -> PendingEvent {
        PendingEvent {
            timestamp: self.now,
            signer: self.signer,
            operation_digest: self.digest,
            kind,
        }
    }
}

/// Apply one self-call to the staged state.
fn apply_admin_call(
    state: &mut AccountState,
    ctx: &AdminContext,
    call: &Call,
    events: &mut Vec<PendingEvent>,
) -> Result<Bytes, Rejection> {
    if call.value != U256::ZERO {
        return Err(ctx.invalid("admin calls carry no value"));
    }
    let decoded = ISmartAccount::ISmartAccountCalls::abi_decode(&call.data, true)
        .map_err(|err| ctx.invalid(err.to_string()))?;

    match decoded {
        ISmartAccount::ISmartAccountCalls::rotateOwner(args) => {
            if args.newOwner == Address::ZERO {
                return Err(ctx.invalid("owner cannot be the zero address"));
            }
            let previous = std::mem::replace(&mut state.owner, args.newOwner);
            events.push(ctx.event(EventKind::OwnerRotated {
                previous,
                new: args.newOwner,
            }));
            Ok(Bytes::new())
        }
        ISmartAccount::ISmartAccountCalls::setEntryGateway(args) => {
            if args.gateway == Address::ZERO {
                return Err(ctx.invalid("entry gateway cannot be the zero address"));
            }
            let previous = std::mem::replace(&mut state.entry_gateway, args.gateway);
            events.push(ctx.event(EventKind::EntryGatewayChanged {
                previous,
                new: args.gateway,
            }));
            Ok(Bytes::new())
        }
        ISmartAccount::ISmartAccountCalls::registerSessionKey(args) => {
            let permissions = permission_set_from_abi(&args.rules, &args.deny);
            let grant = SessionKeyGrant {
                signer: args.signer,
                permissions: permissions.clone(),
                valid_from: args.validFrom,
                valid_until: args.validUntil,
            };
            let id = state.session_keys.register(grant, ctx.now)?;
            state
                .policies
                .set_policy(PolicyRef::SessionKey(id), permissions)?;
            events.push(ctx.event(EventKind::SessionKeyRegistered {
                id,
                signer: args.signer,
            }));
            Ok(ISmartAccount::registerSessionKeyCall::abi_encode_returns(&(id.0,)).into())
        }
        ISmartAccount::ISmartAccountCalls::revokeSessionKey(args) => {
            let id = SessionKeyId(args.id);
            if state.session_keys.revoke(id, ctx.now)? {
                events.push(ctx.event(EventKind::SessionKeyRevoked { id }));
            }
            Ok(Bytes::new())
        }
        ISmartAccount::ISmartAccountCalls::setDefaultPolicy(args) => {
            let permissions = permission_set_from_abi(&args.rules, &args.deny);
            state.policies.set_policy(PolicyRef::Default, permissions)?;
            events.push(ctx.event(EventKind::PolicyChanged {
                policy: PolicyRef::Default,
            }));
            Ok(Bytes::new())
        }
        ISmartAccount::ISmartAccountCalls::setSessionPolicy(args) => {
            let id = SessionKeyId(args.id);
            if state.session_keys.get(id).is_none() {
                return Err(SessionKeyError::Unknown(id).into());
            }
            let permissions = permission_set_from_abi(&args.rules, &args.deny);
            let policy = PolicyRef::SessionKey(id);
            state.policies.set_policy(policy, permissions)?;
            events.push(ctx.event(EventKind::PolicyChanged { policy }));
            Ok(Bytes::new())
        }
    }
}
