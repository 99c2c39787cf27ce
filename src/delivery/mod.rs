//! Delivery module.
//!
//! Owns the send lifecycle:
//! 1. Accept a request and policy from the admin API
//! 2. Select a channel using live health state
//! 3. Run the bounded retry round on the primary
//! 4. Convert the payload and run the fallback round when needed
//! 5. Report every attempt to health, alerting and the delivery log
//! 6. Return an outcome to the caller, success or not

pub mod convert;
mod orchestrator;
mod retry;
mod types;

pub use orchestrator::Orchestrator;
pub use retry::{RetryExecutor, RetryRound};
pub use types::{
    canonicalize_phone, is_canonical_phone, AttemptResult, DeliveryOutcome, MediaKind, Priority,
    SendPolicy, SendRequest,
};
