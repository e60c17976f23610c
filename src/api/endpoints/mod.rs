//! API endpoint handlers.
//!
//! Handlers translate HTTP into `DispatchService` calls and back.

pub mod callbacks;
pub mod encounters;
pub mod health;
pub mod providers;
pub mod triage;
