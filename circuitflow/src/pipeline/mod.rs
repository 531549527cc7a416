//! Stage coordination.
//!
//! This module provides:
//! - Stage controllers that correlate responses with the outstanding request
//! - The dependency graph and the invalidation sweep
//! - The [`Pipeline`] facade owning one controller per stage

mod controller;
mod invalidation;
mod session;

#[cfg(test)]
mod integration_tests;

pub use controller::StageController;
pub use invalidation::{DependencyGraph, InvalidationCoordinator};
pub use session::{
    DispatchOptions, Pipeline, PipelineSnapshot, ResponseDisposition, StageInput,
};
