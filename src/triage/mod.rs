//! Risk classification for incoming triage submissions.
//!
//! Pure and deterministic: keyword rules over the complaint narrative,
//! structured menu answers, age and duration. No I/O.

mod classifier;
mod rules;

pub use classifier::{classify, requires_callback, Assessment};
