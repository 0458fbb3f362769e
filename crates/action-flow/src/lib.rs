//! Chain execution layer
//!
//! Runs server-approved batches of actions without a reasoning round-trip
//! between them, with optional local verification after each step.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod types;

pub use errors::ChainError;
pub use executor::{ChainExecutor, VerificationChecker};
pub use strategies::{VerificationDecision, VerificationFailurePolicy};
pub use types::ChainExecutorConfig;
