//! Engine-wide limits.

/// Upper bound on allow rules (and, separately, deny entries) in one policy.
pub const MAX_RULES_PER_POLICY: usize = 64;
