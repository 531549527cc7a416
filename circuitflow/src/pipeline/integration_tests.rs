//! End-to-end tests of the pipeline against the mock engine.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::core::{AbiVersion, StageId, StageStatus};
    use crate::errors::PipelineError;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{DispatchOptions, Pipeline, ResponseDisposition, StageInput};
    use crate::resolver::{DirectorySource, ProjectFiles};
    use crate::testing::{
        assert_consistent, assert_stage_error_contains, assert_stage_idle, assert_stage_status,
        assert_stage_succeeded, MockConfig, MockEngine,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn pipeline(config: MockConfig) -> Pipeline {
        Pipeline::spawn(
            MockEngine::factory(config),
            PipelineConfig::new().with_dispatch_delay(Duration::ZERO),
        )
        .unwrap()
    }

    async fn settle(pipeline: &mut Pipeline) -> usize {
        tokio::time::timeout(TIMEOUT, pipeline.settle())
            .await
            .expect("pipeline settles in time")
    }

    async fn next(pipeline: &mut Pipeline) -> (StageId, ResponseDisposition) {
        tokio::time::timeout(TIMEOUT, pipeline.next_response())
            .await
            .expect("response in time")
            .expect("subscriptions open")
    }

    async fn run_all(pipeline: &mut Pipeline) {
        pipeline.compile("def main(field x) -> field { return x; }", "main.zok").unwrap();
        settle(pipeline).await;
        pipeline.setup().unwrap();
        pipeline.compute_witness(["3"]).unwrap();
        settle(pipeline).await;
        pipeline.export_verifier(AbiVersion::V2).unwrap();
        pipeline.generate_proof().unwrap();
        settle(pipeline).await;
        pipeline.verify().unwrap();
        settle(pipeline).await;
        for stage in StageId::ALL {
            assert_stage_succeeded(pipeline, stage);
        }
    }

    #[tokio::test]
    async fn test_full_run_verifies_proof() {
        let mut pipeline = pipeline(MockConfig::new());
        run_all(&mut pipeline).await;

        let snapshot = pipeline.snapshot();
        assert!(snapshot.verification().unwrap().valid);
        assert_eq!(snapshot.proof().unwrap().inputs, vec!["3".to_string()]);
        assert!(snapshot
            .verifier()
            .unwrap()
            .source
            .contains("ABIEncoderV2"));
        assert_consistent(&pipeline);
    }

    // ---- staleness ----

    #[tokio::test]
    async fn test_superseded_response_is_dropped() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = pipeline(MockConfig::new().with_latency(Duration::from_millis(20)))
            .with_event_sink(sink.clone());

        let first = pipeline.compile("// first", "main.zok").unwrap();
        let second = pipeline.compile("// second", "main.zok").unwrap();
        assert!(second > first);

        assert_eq!(next(&mut pipeline).await, (StageId::Compile, ResponseDisposition::Stale));
        assert_stage_status(&pipeline, StageId::Compile, StageStatus::Loading);
        assert_eq!(next(&mut pipeline).await, (StageId::Compile, ResponseDisposition::Accepted));

        let program = pipeline.snapshot().program().unwrap().clone();
        assert_eq!(String::from_utf8(program.program).unwrap(), "// second\n");

        let dropped = sink.events_of_type("response.dropped");
        assert_eq!(dropped.len(), 1);
        assert_eq!(
            dropped[0].data.as_ref().unwrap()["request_id"],
            serde_json::json!(first.get())
        );
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_response() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;

        pipeline.setup().unwrap();
        pipeline.reset(StageId::Setup);
        assert_stage_idle(&pipeline, StageId::Setup);

        assert_eq!(next(&mut pipeline).await, (StageId::Setup, ResponseDisposition::Stale));
        assert_stage_idle(&pipeline, StageId::Setup);
        assert_stage_succeeded(&pipeline, StageId::Compile);
    }

    #[tokio::test]
    async fn test_sweep_discards_downstream_in_flight_response() {
        let mut pipeline = pipeline(MockConfig::new().with_latency(Duration::from_millis(20)));
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;

        pipeline.setup().unwrap();
        pipeline.compile("def main() { return; }", "main.zok").unwrap();
        assert_stage_idle(&pipeline, StageId::Setup);

        settle(&mut pipeline).await;
        let handled = pipeline.process_ready();
        assert!(handled
            .iter()
            .all(|(_, disposition)| *disposition == ResponseDisposition::Stale));
        assert_stage_idle(&pipeline, StageId::Setup);
        assert_consistent(&pipeline);
    }

    // ---- invalidation ----

    #[tokio::test]
    async fn test_new_witness_invalidates_proof_and_verification_only() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = pipeline(MockConfig::new()).with_event_sink(sink.clone());
        run_all(&mut pipeline).await;
        sink.clear();

        pipeline.compute_witness(["4"]).unwrap();
        assert_stage_status(&pipeline, StageId::ComputeWitness, StageStatus::Loading);
        assert_stage_idle(&pipeline, StageId::GenerateProof);
        assert_stage_idle(&pipeline, StageId::Verify);
        assert_stage_succeeded(&pipeline, StageId::Setup);
        assert_stage_succeeded(&pipeline, StageId::ExportVerifier);

        let invalidated: Vec<String> = sink
            .events_of_type("stage.invalidated")
            .iter()
            .filter_map(|e| e.field("stage").map(str::to_string))
            .collect();
        assert_eq!(invalidated, vec!["generate_proof", "verify"]);

        settle(&mut pipeline).await;
        assert_stage_succeeded(&pipeline, StageId::ComputeWitness);
        assert_consistent(&pipeline);
    }

    #[tokio::test]
    async fn test_explicit_reset_sweeps_descendants() {
        let mut pipeline = pipeline(MockConfig::new());
        run_all(&mut pipeline).await;

        pipeline.reset(StageId::Setup);
        for stage in [
            StageId::Setup,
            StageId::ExportVerifier,
            StageId::GenerateProof,
            StageId::Verify,
        ] {
            assert_stage_idle(&pipeline, stage);
        }
        assert_stage_succeeded(&pipeline, StageId::Compile);
        assert_stage_succeeded(&pipeline, StageId::ComputeWitness);
        assert_consistent(&pipeline);
    }

    #[tokio::test]
    async fn test_failed_upstream_blocks_downstream() {
        let mut pipeline = pipeline(MockConfig::new().setup_fails("keygen exhausted memory"));
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;

        pipeline.setup().unwrap();
        settle(&mut pipeline).await;
        assert_stage_error_contains(&pipeline, StageId::Setup, "keygen exhausted memory");

        let err = pipeline.export_verifier(AbiVersion::V1).unwrap_err();
        assert!(matches!(err, PipelineError::DependencyNotReady(_)));
    }

    #[tokio::test]
    async fn test_failed_redispatch_leaves_downstream_idle() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        pipeline.setup().unwrap();
        settle(&mut pipeline).await;
        pipeline.export_verifier(AbiVersion::V1).unwrap();
        settle(&mut pipeline).await;
        assert_stage_succeeded(&pipeline, StageId::Setup);
        assert_stage_succeeded(&pipeline, StageId::ExportVerifier);

        pipeline.compile("import \"./missing\"", "main.zok").unwrap();
        settle(&mut pipeline).await;

        assert_stage_error_contains(&pipeline, StageId::Compile, "./missing");
        assert_stage_idle(&pipeline, StageId::Setup);
        assert_stage_idle(&pipeline, StageId::ExportVerifier);
        assert!(pipeline.snapshot().verifier().is_none());
        assert_consistent(&pipeline);
    }

    // ---- resolver ----

    #[tokio::test]
    async fn test_recompile_with_same_imports_is_deterministic() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.set_project_files(
            ProjectFiles::new()
                .with_file("lib/math.zok", "import \"../util\"\n// math")
                .with_file("util.zok", "// util"),
        );
        let source = "from \"ecc/babyjubjubParams\" import params;\nimport \"./lib/math\"\n// main";

        pipeline.compile(source, "main.zok").unwrap();
        settle(&mut pipeline).await;
        let first = pipeline.published(StageId::Compile).unwrap().id.clone();

        pipeline.compile(source, "main.zok").unwrap();
        settle(&mut pipeline).await;
        let second = pipeline.published(StageId::Compile).unwrap().id.clone();

        assert_eq!(first, second);
        let program = pipeline.snapshot().program().unwrap().clone();
        assert_eq!(
            String::from_utf8(program.program).unwrap(),
            "def params() -> field { return 168700; }\n// util\n// math\n// main\n"
        );
    }

    #[tokio::test]
    async fn test_import_cycle_fails_compile() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.set_project_files(
            ProjectFiles::new()
                .with_file("a.zok", "import \"./b\"")
                .with_file("b.zok", "import \"./a\""),
        );

        pipeline.compile("import \"./a\"", "main.zok").unwrap();
        settle(&mut pipeline).await;

        assert_stage_error_contains(&pipeline, StageId::Compile, "Cyclic import");
        assert_stage_error_contains(&pipeline, StageId::Compile, "a.zok -> b.zok -> a.zok");
    }

    #[tokio::test]
    async fn test_unresolved_import_fails_compile() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.compile("import \"./missing\"", "src/main.zok").unwrap();
        settle(&mut pipeline).await;

        assert_stage_error_contains(
            &pipeline,
            StageId::Compile,
            "Could not resolve import './missing' from 'src/main.zok'",
        );
    }

    #[tokio::test]
    async fn test_project_files_loaded_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("helper.zok"), "// helper").unwrap();

        let mut pipeline = pipeline(MockConfig::new());
        let count = pipeline
            .load_project_files(&DirectorySource::new(dir.path()).with_extension("zok"))
            .await
            .unwrap();
        assert_eq!(count, 1);

        pipeline.compile("import \"./lib/helper\"", "").unwrap();
        settle(&mut pipeline).await;
        assert_stage_succeeded(&pipeline, StageId::Compile);
    }

    // ---- dependency gate ----

    #[tokio::test]
    async fn test_gate_refuses_without_sending() {
        let config = MockConfig::new();
        let log = config.call_log();
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = pipeline(config).with_event_sink(sink.clone());

        let err = pipeline.generate_proof().unwrap_err();
        match err {
            PipelineError::DependencyNotReady(err) => {
                assert_eq!(err.stage, StageId::GenerateProof);
                assert_eq!(
                    err.missing,
                    vec![StageId::Compile, StageId::Setup, StageId::ComputeWitness]
                );
            }
            other => panic!("expected DependencyNotReady, got {other:?}"),
        }

        assert_stage_idle(&pipeline, StageId::GenerateProof);
        assert_eq!(pipeline.channel().pending_count(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.calls().is_empty());
        assert!(pipeline.process_ready().is_empty());
        assert_eq!(sink.events_of_type("stage.blocked").len(), 1);
    }

    #[tokio::test]
    async fn test_gate_refuses_while_upstream_loading() {
        let mut pipeline = pipeline(MockConfig::new().with_latency(Duration::from_millis(20)));
        pipeline.compile("def main() {}", "main.zok").unwrap();

        let err = pipeline.setup().unwrap_err();
        assert_eq!(err.to_string(), "Stage 'setup' is not ready: waiting on compile");
        settle(&mut pipeline).await;
        assert!(pipeline.setup().is_ok());
    }

    // ---- recompile scenario ----

    #[tokio::test]
    async fn test_recompile_hides_old_verifier() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        pipeline.setup().unwrap();
        settle(&mut pipeline).await;
        pipeline.export_verifier(AbiVersion::V1).unwrap();
        settle(&mut pipeline).await;
        assert!(pipeline.snapshot().verifier().is_some());

        pipeline.compile("def main() { return; }", "main.zok").unwrap();
        assert_stage_idle(&pipeline, StageId::Setup);
        assert_stage_idle(&pipeline, StageId::ExportVerifier);
        assert!(pipeline.snapshot().verifier().is_none());
        assert!(pipeline.snapshot().keypair().is_none());

        settle(&mut pipeline).await;
        assert_stage_succeeded(&pipeline, StageId::Compile);
        assert_stage_idle(&pipeline, StageId::Setup);
        assert!(pipeline.snapshot().verifier().is_none());
        assert_consistent(&pipeline);
    }

    // ---- engine availability ----

    #[tokio::test]
    async fn test_engine_crash_fails_stage_and_restart_recovers() {
        let mut pipeline = pipeline(MockConfig::new().panics_on(StageId::Setup));
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;

        pipeline.setup().unwrap();
        settle(&mut pipeline).await;
        assert_stage_error_contains(&pipeline, StageId::Setup, "Engine worker exited");
        assert!(!pipeline.channel().is_available());

        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        assert_stage_error_contains(&pipeline, StageId::Compile, "not running");

        pipeline.restart_engine().unwrap();
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        assert_stage_succeeded(&pipeline, StageId::Compile);
    }

    #[tokio::test]
    async fn test_restart_fails_in_flight_request() {
        let mut pipeline = pipeline(MockConfig::new().with_latency(Duration::from_millis(100)));
        pipeline.compile("def main() {}", "main.zok").unwrap();
        pipeline.restart_engine().unwrap();

        settle(&mut pipeline).await;
        assert_stage_error_contains(&pipeline, StageId::Compile, "restarted");
    }

    #[tokio::test]
    async fn test_init_failure_reports_unavailable() {
        let mut pipeline = pipeline(MockConfig::new().init_fails());
        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        assert_stage_status(&pipeline, StageId::Compile, StageStatus::Error);
    }

    // ---- lifecycle ----

    #[tokio::test]
    async fn test_dispatch_delay_postpones_send() {
        let config = MockConfig::new();
        let log = config.call_log();
        let mut pipeline = pipeline(config);

        pipeline
            .dispatch_with(
                StageInput::Compile {
                    source: "def main() {}".to_string(),
                    location: "main.zok".to_string(),
                },
                DispatchOptions::with_delay(Duration::from_millis(50)),
            )
            .unwrap();
        assert_stage_status(&pipeline, StageId::Compile, StageStatus::Loading);
        assert_eq!(pipeline.channel().pending_count(), 0);
        assert!(log.calls().is_empty());

        settle(&mut pipeline).await;
        assert_eq!(log.count(StageId::Compile), 1);
    }

    #[tokio::test]
    async fn test_superseded_delayed_request_is_never_sent() {
        let config = MockConfig::new();
        let log = config.call_log();
        let mut pipeline = pipeline(config);
        let delayed = DispatchOptions::with_delay(Duration::from_millis(50));

        for source in ["// first", "// second"] {
            pipeline
                .dispatch_with(
                    StageInput::Compile {
                        source: source.to_string(),
                        location: "main.zok".to_string(),
                    },
                    delayed,
                )
                .unwrap();
        }

        settle(&mut pipeline).await;
        assert_eq!(log.count(StageId::Compile), 1);
        let program = pipeline.snapshot().program().unwrap().clone();
        assert_eq!(String::from_utf8(program.program).unwrap(), "// second\n");
    }

    #[tokio::test]
    async fn test_reset_during_delay_cancels_send() {
        let config = MockConfig::new();
        let log = config.call_log();
        let mut pipeline = pipeline(config);

        pipeline
            .dispatch_with(
                StageInput::Compile {
                    source: "def main() {}".to_string(),
                    location: "main.zok".to_string(),
                },
                DispatchOptions::with_delay(Duration::from_millis(30)),
            )
            .unwrap();
        pipeline.reset(StageId::Compile);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(log.calls().is_empty());
        assert_eq!(pipeline.channel().pending_count(), 0);
        assert!(pipeline.process_ready().is_empty());
        assert_stage_idle(&pipeline, StageId::Compile);
    }

    #[tokio::test]
    async fn test_clear_session_keeps_project_files() {
        let mut pipeline = pipeline(MockConfig::new());
        pipeline.set_project_files(ProjectFiles::new().with_file("lib.zok", "// lib"));
        run_all(&mut pipeline).await;

        pipeline.clear_session();
        for stage in StageId::ALL {
            assert_stage_idle(&pipeline, stage);
        }
        assert_eq!(pipeline.project_files().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_unsubscribes_and_refuses_dispatch() {
        let mut pipeline = pipeline(MockConfig::new());
        let channel = pipeline.channel().clone();
        assert_eq!(channel.listener_count(), StageId::ALL.len());

        pipeline.teardown();
        assert_eq!(channel.listener_count(), 0);
        assert!(matches!(
            pipeline.compile("def main() {}", "main.zok"),
            Err(PipelineError::EngineUnavailable(_))
        ));
        assert!(pipeline.next_response().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let pipeline = pipeline(MockConfig::new());
        let channel = pipeline.channel().clone();
        drop(pipeline);
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_events_follow_stage_lifecycle() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = pipeline(MockConfig::new()).with_event_sink(sink.clone());

        pipeline.compile("def main() {}", "main.zok").unwrap();
        settle(&mut pipeline).await;
        let result_id = pipeline.published(StageId::Compile).unwrap().id.clone();
        pipeline.reset(StageId::Compile);

        assert_eq!(
            sink.event_types(),
            vec!["stage.loading", "stage.succeeded", "stage.reset"]
        );
        let succeeded = &sink.events_of_type("stage.succeeded")[0];
        assert_eq!(succeeded.field("stage"), Some("compile"));
        assert_eq!(succeeded.field("result_id"), Some(result_id.as_str()));
    }
}
