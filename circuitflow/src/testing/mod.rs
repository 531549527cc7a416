//! Testing utilities for circuitflow pipelines.
//!
//! This module provides:
//! - A deterministic mock engine with configurable failures
//! - Assertions over stage states

mod assertions;
mod engine;

pub use assertions::{
    assert_consistent, assert_stage_error_contains, assert_stage_idle, assert_stage_status,
    assert_stage_succeeded,
};
pub use engine::{CallLog, MockConfig, MockEngine};
