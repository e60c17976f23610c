//! Callback dispatch engine.
//!
//! Classified encounters that need live follow-up become callbacks in a
//! priority-ordered queue; providers claim, complete or release them
//! through the assignment coordinator.

pub mod coordinator;
pub mod error;
pub mod locks;
pub mod queue;
pub mod service;
pub mod sweeper;
pub mod traits;

pub use coordinator::AssignmentCoordinator;
pub use error::DispatchError;
pub use queue::{parse_priority, CallbackQueue};
pub use service::{CallbackRequest, DispatchService, QueueStats, SubmitResult};
pub use sweeper::{start_release_sweeper, SweeperHandle};
pub use traits::{CallbackLedger, DispatchStore, EncounterStore};
