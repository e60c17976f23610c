//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Provider identity: rejects requests without identity headers
//! 2. Audit logger: logs after auth, has provider_id

pub mod audit;
pub mod auth;
