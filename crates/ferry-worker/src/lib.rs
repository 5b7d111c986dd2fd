//! Ferry Worker Library
//!
//! The per-object migration [`Pipeline`] and its two drivers: the batch
//! [`Orchestrator`] and the realtime [`IntakeQueue`].

pub mod admission;
pub mod intake;
pub mod orchestrator;
pub mod pipeline;
pub mod reaper;
pub mod retry;
pub mod staging;

pub use admission::{AdmissionDecision, AdmissionPolicy};
pub use intake::{Admission, AdmitError, IntakeQueue};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineSettings};
pub use reaper::spawn_claim_reaper;
pub use retry::RetryPolicy;
pub use staging::{StagedObject, Staging};
