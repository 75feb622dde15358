//! Solidity ABI for the account's self-administration calls.
//!
//! Admin operations are ordinary calls whose target is the account itself, so they travel
//! through the same signed-operation path as everything else.

use alloy_primitives::{Address, FixedBytes, U256};
use alloy_sol_types::sol;

use crate::rules::{CallRule, DenyEntry, PermissionSet, SelectorMatch, SpendCap, TargetMatch};

sol! {
    /// Flat encoding of a [`CallRule`]. `validUntil == 0` means open-ended.
    struct CallRuleInput {
        address target;
        bool anyTarget;
        bytes4 selector;
        bool anySelector;
        bool hasMaxValuePerCall;
        uint256 maxValuePerCall;
        bool hasSpendCap;
        uint256 spendCap;
        uint64 windowSeconds;
        uint64 validFrom;
        uint64 validUntil;
    }

    /// Flat encoding of a [`DenyEntry`].
    struct DenyInput {
        address target;
        bytes4 selector;
        bool anySelector;
    }

    interface ISmartAccount {
        function rotateOwner(address newOwner) external;
        function setEntryGateway(address gateway) external;
        function registerSessionKey(
            address signer,
            CallRuleInput[] rules,
            DenyInput[] deny,
            uint64 validFrom,
            uint64 validUntil
        ) external returns (uint64 id);
        function revokeSessionKey(uint64 id) external;
        function setDefaultPolicy(CallRuleInput[] rules, DenyInput[] deny) external;
        function setSessionPolicy(uint64 id, CallRuleInput[] rules, DenyInput[] deny) external;
    }
}

impl From<&CallRule> for CallRuleInput {
    fn from(rule: &CallRule) -> Self {
        let (target, any_target) = match rule.target {
            TargetMatch::Exact(addr) => (addr, false),
            TargetMatch::Any => (Address::ZERO, true),
        };
        let (selector, any_selector) = match rule.selector {
            SelectorMatch::Exact(sel) => (sel, false),
            SelectorMatch::Any => (FixedBytes::ZERO, true),
        };
        let cap = rule.spend_cap.unwrap_or(SpendCap {
            cap: U256::ZERO,
            window: 0,
        });
        CallRuleInput {
            target,
            anyTarget: any_target,
            selector,
            anySelector: any_selector,
            hasMaxValuePerCall: rule.max_value_per_call.is_some(),
            maxValuePerCall: rule.max_value_per_call.unwrap_or(U256::ZERO),
            hasSpendCap: rule.spend_cap.is_some(),
            spendCap: cap.cap,
            windowSeconds: cap.window,
            validFrom: rule.valid_from,
            validUntil: rule.valid_until.unwrap_or(0),
        }
    }
}

impl From<&CallRuleInput> for CallRule {
    fn from(input: &CallRuleInput) -> Self {
        CallRule {
            target: if input.anyTarget {
                TargetMatch::Any
            } else {
                TargetMatch::Exact(input.target)
            },
            selector: if input.anySelector {
                SelectorMatch::Any
            } else {
                SelectorMatch::Exact(input.selector)
            },
            max_value_per_call: input.hasMaxValuePerCall.then_some(input.maxValuePerCall),
            spend_cap: input.hasSpendCap.then_some(SpendCap {
                cap: input.spendCap,
                window: input.windowSeconds,
            }),
            valid_from: input.validFrom,
            valid_until: (input.validUntil != 0).then_some(input.validUntil),
        }
    }
}

impl From<&DenyEntry> for DenyInput {
    fn from(entry: &DenyEntry) -> Self {
        let (selector, any_selector) = match entry.selector {
            SelectorMatch::Exact(sel) => (sel, false),
            SelectorMatch::Any => (FixedBytes::ZERO, true),
        };
        DenyInput {
            target: entry.target,
            selector,
            anySelector: any_selector,
        }
    }
}

impl From<&DenyInput> for DenyEntry {
    fn from(input: &DenyInput) -> Self {
        DenyEntry {
            target: input.target,
            selector: if input.anySelector {
                SelectorMatch::Any
            } else {
                SelectorMatch::Exact(input.selector)
            },
        }
    }
}

/// Split a permission set into its ABI arrays.
pub fn permission_set_to_abi(set: &PermissionSet) -> (Vec<CallRuleInput>, Vec<DenyInput>) {
    (
        set.rules.iter().map(CallRuleInput::from).collect(),
        set.deny.iter().map(DenyInput::from).collect(),
    )
}

/// Rebuild a permission set from its ABI arrays.
pub fn permission_set_from_abi(rules: &[CallRuleInput], deny: &[DenyInput]) -> PermissionSet {
    PermissionSet {
        rules: rules.iter().map(CallRule::from).collect(),
        deny: deny.iter().map(DenyEntry::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_sol_types::{SolCall, SolInterface};

    #[test]
    fn register_call_survives_abi_encoding() {
        let token = address!("2000000000000000000000000000000000000002");
        let set = PermissionSet::new(vec![
            CallRule::exact(token, FixedBytes([0xa9, 0x05, 0x9c, 0xbb]))
                .with_max_value_per_call(U256::from(10u64))
                .with_spend_cap(U256::from(100u64), 3600),
            CallRule::allow_all().with_validity(5, Some(50)),
        ])
        .with_deny(vec![DenyEntry::target(Address::ZERO)]);

        let (rules, deny) = permission_set_to_abi(&set);
        let data = ISmartAccount::registerSessionKeyCall {
            signer: token,
            rules,
            deny,
            validFrom: 1,
            validUntil: 99,
        }
        .abi_encode();

        let decoded = ISmartAccount::ISmartAccountCalls::abi_decode(&data, true)
            .expect("valid calldata");
        match decoded {
            ISmartAccount::ISmartAccountCalls::registerSessionKey(call) => {
                assert_eq!(permission_set_from_abi(&call.rules, &call.deny), set);
                assert_eq!(call.validUntil, 99);
            }
            _ => panic!("expected registerSessionKey"),
        }
    }
}
