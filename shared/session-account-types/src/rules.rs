use alloy_primitives::{Address, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use crate::operation::Call;

/// 4-byte function selector (first bytes of calldata).
pub type Selector = FixedBytes<4>;

/// Target side of a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMatch {
    Exact(Address),
    Any,
}

/// Selector side of a rule or deny entry.
///
/// `Exact` never matches a call without calldata (a plain value transfer has no selector).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorMatch {
    Exact(Selector),
    Any,
}

impl TargetMatch {
    pub fn matches(&self, target: Address) -> bool {
        match self {
            TargetMatch::Exact(addr) => *addr == target,
            TargetMatch::Any => true,
        }
    }
}

impl SelectorMatch {
    pub fn matches(&self, selector: Option<Selector>) -> bool {
        match (self, selector) {
            (SelectorMatch::Any, _) => true,
            (SelectorMatch::Exact(want), Some(got)) => *want == got,
            (SelectorMatch::Exact(_), None) => false,
        }
    }
}

/// Cumulative spend cap over a fixed window of `window` seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCap {
    pub cap: U256,
    pub window: u64,
}

/// A single allow rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRule {
    pub target: TargetMatch,
    pub selector: SelectorMatch,
    /// `None` means no per-call limit.
    pub max_value_per_call: Option<U256>,
    pub spend_cap: Option<SpendCap>,
    pub valid_from: u64,
    /// Exclusive upper bound. `None` means open-ended.
    pub valid_until: Option<u64>,
}

impl CallRule {
    /// Unrestricted rule: any target, any selector, no caps, always valid.
    pub fn allow_all() -> Self {
        Self {
            target: TargetMatch::Any,
            selector: SelectorMatch::Any,
            max_value_per_call: None,
            spend_cap: None,
            valid_from: 0,
            valid_until: None,
        }
    }

    pub fn exact(target: Address, selector: Selector) -> Self {
        Self {
            target: TargetMatch::Exact(target),
            selector: SelectorMatch::Exact(selector),
            ..Self::allow_all()
        }
    }

    pub fn any_selector(target: Address) -> Self {
        Self {
            target: TargetMatch::Exact(target),
            ..Self::allow_all()
        }
    }

    pub fn with_max_value_per_call(mut self, max: U256) -> Self {
        self.max_value_per_call = Some(max);
        self
    }

    pub fn with_spend_cap(mut self, cap: U256, window: u64) -> Self {
        self.spend_cap = Some(SpendCap { cap, window });
        self
    }

    pub fn with_validity(mut self, valid_from: u64, valid_until: Option<u64>) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    /// Whether target and selector both match the call.
    pub fn matches(&self, call: &Call) -> bool {
        self.target.matches(call.target) && self.selector.matches(call.selector())
    }

    /// Rank used to pick between several matching rules. Higher wins.
    ///
    /// An exact target outranks an exact selector, so a per-contract rule always beats a
    /// selector-only rule that happens to cover the same call.
    pub fn specificity(&self) -> u8 {
        match (self.target, self.selector) {
            (TargetMatch::Exact(_), SelectorMatch::Exact(_)) => 3,
            (TargetMatch::Exact(_), SelectorMatch::Any) => 2,
            (TargetMatch::Any, SelectorMatch::Exact(_)) => 1,
            (TargetMatch::Any, SelectorMatch::Any) => 0,
        }
    }

    /// Two rules with the same shape would match exactly the same calls.
    pub fn same_shape(&self, other: &CallRule) -> bool {
        self.target == other.target && self.selector == other.selector
    }
}

/// Deny-list entry. `SelectorMatch::Any` denies the whole target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyEntry {
    pub target: Address,
    pub selector: SelectorMatch,
}

impl DenyEntry {
    pub fn target(target: Address) -> Self {
        Self {
            target,
            selector: SelectorMatch::Any,
        }
    }

    pub fn selector(target: Address, selector: Selector) -> Self {
        Self {
            target,
            selector: SelectorMatch::Exact(selector),
        }
    }

    pub fn matches(&self, call: &Call) -> bool {
        self.target == call.target && self.selector.matches(call.selector())
    }
}

/// Ordered allow rules plus a deny list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub rules: Vec<CallRule>,
    pub deny: Vec<DenyEntry>,
}

impl PermissionSet {
    pub fn new(rules: Vec<CallRule>) -> Self {
        Self {
            rules,
            deny: Vec::new(),
        }
    }

    pub fn with_deny(mut self, deny: Vec<DenyEntry>) -> Self {
        self.deny = deny;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
