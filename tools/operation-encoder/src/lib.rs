//! Off-chain helpers for building and signing session-account operations.

pub mod encoder;
pub mod types;

#[cfg(test)]
mod tests;

pub use encoder::*;
pub use types::UnsignedOperation;
