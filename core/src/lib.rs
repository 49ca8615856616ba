//! Reconciliation core for the document import wizard.
//!
//! An uploaded clinical document is analysed by an external service into
//! extracted exercises, exercise sets and clinical notes. The operator then
//! decides per entity whether to create it, reuse an existing catalog entry
//! or skip it. This crate owns that decision state and turns it into a
//! dependency-consistent write request for the backend.

pub mod analysis;
pub mod bulk;
pub mod config;
pub mod decisions;
pub mod error;
pub mod executor;
pub mod filter;
pub mod heuristic;
pub mod request;
pub mod stats;
pub mod upload;
pub mod wizard;

pub use error::{CoreError, Result};
