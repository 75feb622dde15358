//! Shared utilities for the account engine.

pub mod crypto;
