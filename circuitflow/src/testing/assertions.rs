//! Assertion helpers for pipeline state.

use crate::core::{StageId, StageStatus};
use crate::pipeline::Pipeline;

/// Asserts that a stage has the expected status.
///
/// # Panics
///
/// Panics if the status differs.
pub fn assert_stage_status(pipeline: &Pipeline, stage: StageId, expected: StageStatus) {
    let actual = pipeline.status(stage);
    assert_eq!(
        actual, expected,
        "Expected stage '{stage}' to be {expected}, got {actual} ({:?})",
        pipeline.state(stage)
    );
}

/// Asserts that a stage is idle.
///
/// # Panics
///
/// Panics if the stage is not idle.
pub fn assert_stage_idle(pipeline: &Pipeline, stage: StageId) {
    assert_stage_status(pipeline, stage, StageStatus::Idle);
}

/// Asserts that a stage succeeded.
///
/// # Panics
///
/// Panics if the stage is not in success.
pub fn assert_stage_succeeded(pipeline: &Pipeline, stage: StageId) {
    assert_stage_status(pipeline, stage, StageStatus::Success);
}

/// Asserts that a stage failed with a message containing `needle`.
///
/// # Panics
///
/// Panics if the stage is not in error or the message does not match.
pub fn assert_stage_error_contains(pipeline: &Pipeline, stage: StageId, needle: &str) {
    match pipeline.error(stage) {
        Some(message) => assert!(
            message.contains(needle),
            "Expected error of '{stage}' to contain '{needle}', got '{message}'"
        ),
        None => panic!(
            "Expected stage '{stage}' to be in error, got {}",
            pipeline.status(stage)
        ),
    }
}

/// Asserts that no success was built from outdated upstream results.
///
/// # Panics
///
/// Panics if the pipeline is inconsistent.
pub fn assert_consistent(pipeline: &Pipeline) {
    assert!(
        pipeline.is_consistent(),
        "Pipeline holds a result derived from outdated upstream results: {:?}",
        StageId::ALL
            .iter()
            .map(|s| (s.as_str(), pipeline.status(*s)))
            .collect::<Vec<_>>()
    );
}
