//! Call-level constraint storage and evaluation.
//!
//! Evaluation order per call: deny list (the default policy's deny list applies to every
//! signer), most specific matching allow rule, rule validity window, per-call cap, then the
//! rule's fixed-window cumulative cap.
//!
//! Cumulative caps use a fixed window rather than a sliding log: one `(period_start, spent)`
//! pair per rule. A signer can therefore spend up to twice the cap across a window boundary.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use session_account_types::{Call, CallRule, PermissionSet, SessionKeyId, SpendCap};

use crate::{
    constants::MAX_RULES_PER_POLICY,
    errors::{Denial, Denied, PermissionSetError},
};

/// Which policy a signer is evaluated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyRef {
    /// Applies to owner-signed operations.
    Default,
    SessionKey(SessionKeyId),
}

/// Usage counters of one capped rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub period_start: u64,
    pub spent_in_period: U256,
}

impl WindowUsage {
    fn elapsed(&self, cap: &SpendCap, now: u64) -> bool {
        now.saturating_sub(self.period_start) >= cap.window
    }

    /// Counters after spending `value` at `now`, or the total that would have exceeded the cap.
    pub fn try_spend(&self, cap: &SpendCap, value: U256, now: u64) -> Result<WindowUsage, U256> {
        let base = if self.elapsed(cap, now) {
            WindowUsage {
                period_start: now,
                spent_in_period: U256::ZERO,
            }
        } else {
            *self
        };
        let attempted = base.spent_in_period.saturating_add(value);
        if attempted > cap.cap {
            return Err(attempted);
        }
        Ok(WindowUsage {
            period_start: base.period_start,
            spent_in_period: attempted,
        })
    }

    /// Amount still spendable at `now`.
    pub fn remaining(&self, cap: &SpendCap, now: u64) -> U256 {
        if self.elapsed(cap, now) {
            cap.cap
        } else {
            cap.cap.saturating_sub(self.spent_in_period)
        }
    }
}

/// A rule set plus one counter slot per rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    permissions: PermissionSet,
    /// Parallel to `permissions.rules`; `None` until the rule's cap is first used.
    usage: Vec<Option<WindowUsage>>,
}

impl Policy {
    fn new(permissions: PermissionSet) -> Self {
        let usage = vec![None; permissions.rules.len()];
        Self { permissions, usage }
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn usage(&self, rule: usize) -> Option<WindowUsage> {
        self.usage.get(rule).copied().flatten()
    }

    /// Index of the most specific rule whose target and selector match.
    ///
    /// Rule shapes are unique per policy, so at most one matching rule exists per specificity
    /// level and the result does not depend on storage order.
    pub fn resolve_rule(&self, call: &Call) -> Option<usize> {
        self.permissions
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(call))
            .max_by_key(|(_, rule)| rule.specificity())
            .map(|(i, _)| i)
    }

    fn is_denied(&self, call: &Call) -> bool {
        self.permissions.deny.iter().any(|entry| entry.matches(call))
    }
}

/// Structural checks shared by `set_policy` and session-key registration.
pub(crate) fn check_rules(set: &PermissionSet) -> Result<(), PermissionSetError> {
    if set.rules.len() > MAX_RULES_PER_POLICY || set.deny.len() > MAX_RULES_PER_POLICY {
        return Err(PermissionSetError::TooManyRules);
    }
    for (i, rule) in set.rules.iter().enumerate() {
        if let Some(cap) = rule.spend_cap {
            if cap.window == 0 && cap.cap != U256::ZERO {
                return Err(PermissionSetError::ZeroWindowWithCap(i));
            }
        }
        if matches!(rule.valid_until, Some(until) if until <= rule.valid_from) {
            return Err(PermissionSetError::RuleValidityEmpty(i));
        }
        if set.rules[..i].iter().any(|earlier| earlier.same_shape(rule)) {
            return Err(PermissionSetError::DuplicateRule(i));
        }
    }
    Ok(())
}

fn check_rule_window(rule_index: usize, rule: &CallRule, now: u64) -> Result<(), Denial> {
    if now < rule.valid_from {
        return Err(Denial::NotYetValid { rule: rule_index });
    }
    if matches!(rule.valid_until, Some(until) if now >= until) {
        return Err(Denial::Expired { rule: rule_index });
    }
    Ok(())
}

/// Stores the default policy and one policy per session key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyManager {
    address: Address,
    default: Policy,
    sessions: BTreeMap<SessionKeyId, Policy>,
}

impl PolicyManager {
    /// New manager whose default policy allows every call.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            default: Policy::new(PermissionSet::new(vec![CallRule::allow_all()])),
            sessions: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn policy(&self, policy_ref: PolicyRef) -> Option<&Policy> {
        match policy_ref {
            PolicyRef::Default => Some(&self.default),
            PolicyRef::SessionKey(id) => self.sessions.get(&id),
        }
    }

    /// Replace a policy wholesale. Counters start fresh.
    pub fn set_policy(
        &mut self,
        policy_ref: PolicyRef,
        permissions: PermissionSet,
    ) -> Result<(), PermissionSetError> {
        check_rules(&permissions)?;
        let policy = Policy::new(permissions);
        match policy_ref {
            PolicyRef::Default => self.default = policy,
            PolicyRef::SessionKey(id) => {
                self.sessions.insert(id, policy);
            }
        }
        Ok(())
    }

    /// Evaluate a whole batch; counters are written back only if every call passes.
    pub fn evaluate_batch(
        &mut self,
        policy_ref: PolicyRef,
        calls: &[Call],
        now: u64,
    ) -> Result<(), Denied> {
        self.evaluate(policy_ref, calls.iter().enumerate(), now)
    }

    /// Evaluate `(batch index, call)` pairs in order against `policy_ref`.
    pub fn evaluate<'a, I>(&mut self, policy_ref: PolicyRef, calls: I, now: u64) -> Result<(), Denied>
    where
        I: IntoIterator<Item = (usize, &'a Call)>,
    {
        let usage = {
            let Some(policy) = self.policy(policy_ref) else {
                // Unknown session policy: fail closed on the first call, accept an empty batch.
                return match calls.into_iter().next() {
                    Some((index, _)) => Err(Denied {
                        index,
                        reason: Denial::NoMatchingRule,
                    }),
                    None => Ok(()),
                };
            };

            let mut usage = policy.usage.clone();
            for (index, call) in calls {
                self.evaluate_call(policy, &mut usage, call, now)
                    .map_err(|reason| {
                        debug!(?policy_ref, index, %reason, "call denied");
                        Denied { index, reason }
                    })?;
            }
            usage
        };

        match policy_ref {
            PolicyRef::Default => self.default.usage = usage,
            PolicyRef::SessionKey(id) => {
                if let Some(policy) = self.sessions.get_mut(&id) {
                    policy.usage = usage;
                }
            }
        }
        Ok(())
    }

    fn evaluate_call(
        &self,
        policy: &Policy,
        usage: &mut [Option<WindowUsage>],
        call: &Call,
        now: u64,
    ) -> Result<(), Denial> {
        if self.default.is_denied(call) || policy.is_denied(call) {
            return Err(Denial::DenyListed);
        }

        let rule_index = policy.resolve_rule(call).ok_or(Denial::NoMatchingRule)?;
        let rule = &policy.permissions.rules[rule_index];
        check_rule_window(rule_index, rule, now)?;

        if let Some(max) = rule.max_value_per_call {
            if call.value > max {
                return Err(Denial::PerCallCapExceeded {
                    rule: rule_index,
                    value: call.value,
                    max,
                });
            }
        }

        if let Some(cap) = rule.spend_cap {
            // A counter slot per rule; a short vector only comes from a damaged state file.
            let slot = usage.get_mut(rule_index).ok_or(Denial::NoMatchingRule)?;
            let current = slot.unwrap_or(WindowUsage {
                period_start: now,
                spent_in_period: U256::ZERO,
            });
            let next = current
                .try_spend(&cap, call.value, now)
                .map_err(|attempted| Denial::CapExceeded {
                    rule: rule_index,
                    attempted,
                    cap: cap.cap,
                })?;
            *slot = Some(next);
        }
        Ok(())
    }

    /// Amount still spendable under a capped rule at `now`; `None` if the rule has no cap.
    pub fn remaining_in_period(&self, policy_ref: PolicyRef, rule: usize, now: u64) -> Option<U256> {
        let policy = self.policy(policy_ref)?;
        let cap = policy.permissions.rules.get(rule)?.spend_cap?;
        Some(match policy.usage(rule) {
            Some(usage) => usage.remaining(&cap, now),
            None => cap.cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Bytes, FixedBytes};
    use session_account_types::{DenyEntry, SelectorMatch};

    const MANAGER: Address = address!("00000000000000000000000000000000000000b0");
    const TOKEN: Address = address!("1000000000000000000000000000000000000001");
    const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
    const SESSION: PolicyRef = PolicyRef::SessionKey(SessionKeyId(0));

    fn call(value: u64, selector: [u8; 4]) -> Call {
        Call::new(TOKEN, U256::from(value), Bytes::from(selector.to_vec()))
    }

    fn manager_with(rules: Vec<CallRule>) -> PolicyManager {
        let mut pm = PolicyManager::new(MANAGER);
        pm.set_policy(SESSION, PermissionSet::new(rules)).unwrap();
        pm
    }

    #[test]
    fn empty_session_policy_denies_everything() {
        let mut pm = manager_with(vec![]);
        let err = pm
            .evaluate_batch(SESSION, &[call(0, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(err.reason, Denial::NoMatchingRule);
    }

    #[test]
    fn unknown_session_policy_fails_closed() {
        let mut pm = PolicyManager::new(MANAGER);
        let err = pm
            .evaluate_batch(PolicyRef::SessionKey(SessionKeyId(7)), &[call(0, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(err.reason, Denial::NoMatchingRule);
    }

    #[test]
    fn deny_list_takes_precedence_over_allow() {
        let mut pm = PolicyManager::new(MANAGER);
        pm.set_policy(
            SESSION,
            PermissionSet::new(vec![CallRule::exact(TOKEN, FixedBytes(TRANSFER))])
                .with_deny(vec![DenyEntry::selector(TOKEN, FixedBytes(TRANSFER))]),
        )
        .unwrap();
        let err = pm
            .evaluate_batch(SESSION, &[call(0, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(err.reason, Denial::DenyListed);
    }

    #[test]
    fn default_deny_list_applies_to_session_keys() {
        let mut pm = manager_with(vec![CallRule::any_selector(TOKEN)]);
        pm.set_policy(
            PolicyRef::Default,
            PermissionSet::new(vec![CallRule::allow_all()]).with_deny(vec![DenyEntry::target(TOKEN)]),
        )
        .unwrap();
        let err = pm
            .evaluate_batch(SESSION, &[call(0, [1, 1, 1, 1])], 0)
            .unwrap_err();
        assert_eq!(err.reason, Denial::DenyListed);
    }

    #[test]
    fn most_specific_rule_caps_the_call() {
        // Storage order puts the wildcard first; specificity must still win.
        let mut pm = manager_with(vec![
            CallRule::any_selector(TOKEN).with_max_value_per_call(U256::from(1000u64)),
            CallRule::exact(TOKEN, FixedBytes(TRANSFER)).with_max_value_per_call(U256::from(10u64)),
        ]);
        let err = pm
            .evaluate_batch(SESSION, &[call(20, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(
            err.reason,
            Denial::PerCallCapExceeded {
                rule: 1,
                value: U256::from(20u64),
                max: U256::from(10u64)
            }
        );
        // Other selectors fall through to the wildcard rule.
        pm.evaluate_batch(SESSION, &[call(20, [9, 9, 9, 9])], 0).unwrap();
    }

    #[test]
    fn window_resets_after_boundary() {
        let rule = CallRule::any_selector(TOKEN).with_spend_cap(U256::from(100u64), 3600);
        let mut pm = manager_with(vec![rule]);

        pm.evaluate_batch(SESSION, &[call(90, TRANSFER)], 1_000).unwrap();
        let err = pm
            .evaluate_batch(SESSION, &[call(50, TRANSFER)], 1_000 + 3_599)
            .unwrap_err();
        assert_eq!(
            err.reason,
            Denial::CapExceeded {
                rule: 0,
                attempted: U256::from(140u64),
                cap: U256::from(100u64)
            }
        );

        pm.evaluate_batch(SESSION, &[call(50, TRANSFER)], 1_000 + 3_600).unwrap();
        let usage = pm.policy(SESSION).unwrap().usage(0).unwrap();
        assert_eq!(usage.spent_in_period, U256::from(50u64));
        assert_eq!(usage.period_start, 4_600);
    }

    #[test]
    fn failed_batch_leaves_counters_untouched() {
        let rule = CallRule::any_selector(TOKEN).with_spend_cap(U256::from(100u64), 3600);
        let mut pm = manager_with(vec![rule]);
        let err = pm
            .evaluate_batch(SESSION, &[call(60, TRANSFER), call(60, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(pm.policy(SESSION).unwrap().usage(0), None);
        assert_eq!(pm.remaining_in_period(SESSION, 0, 0), Some(U256::from(100u64)));
    }

    #[test]
    fn missing_counter_slot_denies_instead_of_panicking() {
        let mut pm = PolicyManager::new(MANAGER);
        pm.set_policy(
            PolicyRef::Default,
            PermissionSet::new(vec![
                CallRule::any_selector(TOKEN).with_spend_cap(U256::from(100u64), 3600)
            ]),
        )
        .unwrap();
        let mut state = serde_json::to_value(&pm).unwrap();
        state["default"]["usage"] = serde_json::json!([]);
        let mut damaged: PolicyManager = serde_json::from_value(state).unwrap();

        let err = damaged
            .evaluate_batch(PolicyRef::Default, &[call(1, TRANSFER)], 0)
            .unwrap_err();
        assert_eq!(err.reason, Denial::NoMatchingRule);
        assert_eq!(damaged.remaining_in_period(PolicyRef::Default, 0, 0), Some(U256::from(100u64)));
    }

    #[test]
    fn rule_validity_window_is_enforced() {
        let rule = CallRule::any_selector(TOKEN).with_validity(100, Some(200));
        let mut pm = manager_with(vec![rule]);
        let early = pm.evaluate_batch(SESSION, &[call(0, TRANSFER)], 99).unwrap_err();
        assert_eq!(early.reason, Denial::NotYetValid { rule: 0 });
        pm.evaluate_batch(SESSION, &[call(0, TRANSFER)], 100).unwrap();
        let late = pm.evaluate_batch(SESSION, &[call(0, TRANSFER)], 200).unwrap_err();
        assert_eq!(late.reason, Denial::Expired { rule: 0 });
    }

    #[test]
    fn set_policy_rejects_unsatisfiable_and_duplicate_rules() {
        let mut pm = PolicyManager::new(MANAGER);
        let zero_window = CallRule::allow_all().with_spend_cap(U256::from(1u64), 0);
        assert_eq!(
            pm.set_policy(SESSION, PermissionSet::new(vec![zero_window])),
            Err(PermissionSetError::ZeroWindowWithCap(0))
        );
        let dup = vec![
            CallRule::any_selector(TOKEN),
            CallRule::any_selector(TOKEN).with_max_value_per_call(U256::from(1u64)),
        ];
        assert_eq!(
            pm.set_policy(SESSION, PermissionSet::new(dup)),
            Err(PermissionSetError::DuplicateRule(1))
        );
        let selector_only = CallRule {
            selector: SelectorMatch::Exact(FixedBytes(TRANSFER)),
            ..CallRule::allow_all()
        };
        pm.set_policy(SESSION, PermissionSet::new(vec![selector_only, CallRule::allow_all()]))
            .unwrap();
    }
}
