//! End-to-end flows through the pipeline with a scripted language model.

mod common;

use cadplan::error::ErrorKind;
use cadplan::llm::ModelError;
use cadplan::models::*;
use cadplan::pipeline::{BatchOptions, ItemOutcome};
use cadplan_core::{FeatureKind, FeatureShape, Plan, Rule, Sketch};
use common::*;

fn dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

// ============================================================
// Create
// ============================================================

mod create {
    use super::*;

    #[tokio::test]
    async fn builds_square_plate_with_center_hole() {
        let dir = dir();
        let model = ScriptedModel::new([plate_with_hole(50.0, 5.0)]);
        let pipeline = pipeline(&dir, model.clone());

        let created = pipeline
            .create("A square plate 50mm with a 10mm center hole")
            .await
            .expect("create failed");

        assert_eq!(created.plan.sketch, Sketch::Square { size: 50.0 });
        assert_eq!(created.plan.extrude.height, Some(5.0));
        assert_eq!(created.plan.features.len(), 1);
        let hole = &created.plan.features[0];
        assert_eq!(hole.kind, FeatureKind::Hole);
        assert_eq!(hole.shape, FeatureShape::Circle);
        assert_eq!(hole.dim("radius"), Some(5.0));

        assert_eq!(created.design.state, DesignState::Exported);
        assert_eq!(created.design.revision, 1);
        assert!(created.build.mesh.volume > 0.0);
        assert!(created.build.mesh.path.exists());

        let source = std::fs::read_to_string(&created.build.program_path).unwrap();
        assert!(source.contains("hole(\">Z\", circle(max(0.1, 5)), 0, 0)"));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn stored_plan_round_trips() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new([plate_with_hole(50.0, 5.0)]));

        let created = pipeline.create("plate with a hole").await.unwrap();
        let loaded = pipeline.store().load(&created.design.id).unwrap();
        assert_eq!(loaded, created.plan);
    }

    #[tokio::test]
    async fn reprompts_once_after_fenced_response() {
        let dir = dir();
        let fenced = format!("```json\n{}\n```", plate_with_hole(50.0, 5.0));
        let model = ScriptedModel::new([fenced, plate_with_hole(50.0, 5.0)]);
        let pipeline = pipeline(&dir, model.clone());

        pipeline.create("plate with a hole").await.expect("repair failed");
        assert_eq!(model.calls(), 2);
        assert!(model.request(1).system.contains("previous response was rejected"));
    }

    #[tokio::test]
    async fn grammar_violation_is_reported_with_its_rule() {
        let dir = dir();
        let model = ScriptedModel::new([plate_with_hole(50.0, 25.0), plate_with_hole(50.0, 25.0)]);
        let pipeline = pipeline(&dir, model.clone());

        let err = pipeline.create("plate with a huge hole").await.unwrap_err();
        assert_eq!(err.stage, Stage::Translate);
        assert_eq!(err.kind(), ErrorKind::GrammarViolation);
        assert_eq!(err.report().rule, Some(Rule::HalfSize));
        assert!(model.request(1).system.contains("[half-size]"));
        assert!(pipeline.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_model_fails_translation() {
        let dir = dir();
        let model = ScriptedModel::failing(ModelError::Service {
            status: 503,
            body: "overloaded".to_string(),
        });
        let pipeline = pipeline(&dir, model);

        let err = pipeline.create("plate").await.unwrap_err();
        assert_eq!(err.stage, Stage::Translate);
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(err.design_id.is_none());
    }

    #[tokio::test]
    async fn kernel_failure_discards_the_new_design() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new([plate(40.0, FAILING_HEIGHT)]));

        let err = pipeline.create("a 13mm thick plate").await.unwrap_err();
        assert_eq!(err.stage, Stage::Execute);
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let id = err.design_id.expect("failure should name the design");
        assert!(pipeline.list().unwrap().is_empty());
        assert!(!pipeline.store().plan_path(&id).exists());
        assert!(!pipeline.store().program_path(&id).exists());
    }
}

// ============================================================
// Refine
// ============================================================

mod refine {
    use super::*;

    #[tokio::test]
    async fn make_the_hole_bigger_changes_only_the_radius() {
        let dir = dir();
        let model = ScriptedModel::new([plate_with_hole(50.0, 5.0), plate_with_hole(50.0, 8.0)]);
        let pipeline = pipeline(&dir, model.clone());
        let created = pipeline.create("A square plate 50mm with a 10mm center hole").await.unwrap();

        let refined = pipeline
            .refine(&created.design.id, "make the hole bigger")
            .await
            .expect("refine failed");

        let mut expected = created.plan.clone();
        expected.features[0].dimensions.insert("radius".to_string(), 8.0);
        assert_eq!(refined.plan, expected);
        assert!(refined.adjustments.is_empty());
        assert_eq!(refined.design.revision, 2);
        assert_eq!(refined.design.state, DesignState::Exported);
        assert!(refined.snapshot.is_some());
        assert!(refined.build.mesh.volume < created.build.mesh.volume);
    }

    #[tokio::test]
    async fn oversized_radius_is_clamped_below_half_size() {
        let dir = dir();
        let model = ScriptedModel::new([plate_with_hole(50.0, 5.0), plate_with_hole(50.0, 30.0)]);
        let pipeline = pipeline(&dir, model);
        let created = pipeline.create("plate with a hole").await.unwrap();

        let refined = pipeline
            .refine(&created.design.id, "make the hole bigger")
            .await
            .unwrap();

        let radius = refined.plan.features[0].dim("radius").unwrap();
        assert!(radius > 5.0 && radius <= 24.9 + 1e-9);
        assert_eq!(refined.adjustments.len(), 1);

        let history = pipeline.history(&created.design.id).unwrap();
        assert!(history
            .iter()
            .any(|e| e.stage == Stage::Edit && e.outcome == EventOutcome::Adjusted));
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_program_and_mesh() {
        let dir = dir();
        let model = ScriptedModel::new([plate_with_hole(50.0, 5.0)]);
        let pipeline = pipeline(&dir, model.clone());
        let created = pipeline.create("plate with a hole").await.unwrap();
        let id = created.design.id.clone();
        let mesh_before = std::fs::read(&created.build.mesh.path).unwrap();
        let program_before = pipeline.store().load_program(&id).unwrap();

        let mut thicker = Plan::from_json(&plate_with_hole(50.0, 5.0)).unwrap();
        thicker.extrude.height = Some(FAILING_HEIGHT);
        model.push(thicker.to_json_pretty());

        let err = pipeline
            .refine(&id, "make the plate 13mm thick")
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Execute);

        assert_eq!(std::fs::read(&created.build.mesh.path).unwrap(), mesh_before);
        assert_eq!(pipeline.store().load_program(&id).unwrap(), program_before);
        let design = pipeline.store().design(&id).unwrap();
        assert_eq!(design.state, DesignState::Planned);
        assert_eq!(design.revision, 2);
        assert_eq!(pipeline.store().load(&id).unwrap().extrude.height, Some(FAILING_HEIGHT));
    }

    #[tokio::test]
    async fn unknown_design_is_not_found() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        let id: DesignId = "deadbeef".parse().unwrap();

        let err = pipeline.refine(&id, "make it bigger").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn concurrent_writer_is_rejected() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new([plate_with_hole(50.0, 5.0)]));
        let created = pipeline.create("plate with a hole").await.unwrap();

        let _held = pipeline.locks().acquire(&created.design.id).unwrap();
        let err = pipeline
            .refine(&created.design.id, "make the hole bigger")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DesignBusy);
    }

    #[tokio::test]
    async fn missing_target_is_unresolved() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new([plate(40.0, 5.0)]));
        let created = pipeline.create("a plain plate").await.unwrap();

        let err = pipeline
            .refine(&created.design.id, "remove the hole")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedTarget);
        assert_eq!(err.stage, Stage::Edit);
    }
}

// ============================================================
// Export and batch
// ============================================================

mod export {
    use super::*;

    #[tokio::test]
    async fn re_export_is_byte_identical() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new([plate_with_hole(50.0, 5.0)]));
        let created = pipeline.create("plate with a hole").await.unwrap();
        let first = std::fs::read(&created.build.mesh.path).unwrap();

        let exported = pipeline.export(&created.design.id).await.unwrap();
        assert_eq!(std::fs::read(&exported.mesh.path).unwrap(), first);
    }

    #[tokio::test]
    async fn export_requires_a_program() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        let plan = Plan::from_json(&plate(40.0, 5.0)).unwrap();
        let id = pipeline.store().create(&plan).unwrap();

        let err = pipeline.export(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn compile_then_export() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        let plan = Plan::from_json(&plate_with_hole(30.0, 3.0)).unwrap();
        let id = pipeline.store().create(&plan).unwrap();

        let compiled = pipeline.compile(&id).await.unwrap();
        assert_eq!(compiled.design.state, DesignState::Compiled);
        assert_eq!(compiled.result_name, "assembly");

        let exported = pipeline.export(&id).await.unwrap();
        assert_eq!(exported.design.state, DesignState::Exported);

        let stages: Vec<Stage> = pipeline.history(&id).unwrap().iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Compile, Stage::Export]);
    }
}

mod batch {
    use super::*;

    #[tokio::test]
    async fn isolates_a_failing_item() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        let ids: Vec<DesignId> = [5.0, 6.0, FAILING_HEIGHT, 7.0, 8.0]
            .iter()
            .map(|height| {
                let plan = Plan::from_json(&plate(40.0, *height)).unwrap();
                pipeline.store().create(&plan).unwrap()
            })
            .collect();

        let report = pipeline.run_batch(&ids, &BatchOptions::default()).await.unwrap();

        assert_eq!(report.items.len(), 5);
        assert_eq!(report.succeeded(), 4);
        let failed: Vec<&DesignId> = report.failed().map(|item| &item.design_id).collect();
        assert_eq!(failed, vec![&ids[2]]);
        for (n, id) in ids.iter().enumerate() {
            let exported = pipeline.store().mesh_path(id, cadplan_core::ExportFormat::Stl).exists();
            assert_eq!(exported, n != 2, "item {}", n + 1);
        }
    }

    #[tokio::test]
    async fn simulate_writes_nothing() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        let plan = Plan::from_json(&plate_with_hole(40.0, 4.0)).unwrap();
        let id = pipeline.store().create(&plan).unwrap();

        let options = BatchOptions {
            simulate: true,
            limit: None,
        };
        let report = pipeline.run_batch(&[], &options).await.unwrap();

        assert_eq!(report.items.len(), 1);
        assert!(matches!(report.items[0].outcome, ItemOutcome::Simulated { .. }));
        assert!(!pipeline.store().program_path(&id).exists());
        assert_eq!(pipeline.store().design(&id).unwrap().state, DesignState::Planned);
    }

    #[tokio::test]
    async fn limit_bounds_the_batch() {
        let dir = dir();
        let pipeline = pipeline(&dir, ScriptedModel::new(Vec::<String>::new()));
        for size in [20.0, 30.0, 40.0] {
            let plan = Plan::from_json(&plate(size, 4.0)).unwrap();
            pipeline.store().create(&plan).unwrap();
        }

        let options = BatchOptions {
            simulate: true,
            limit: Some(2),
        };
        let report = pipeline.run_batch(&[], &options).await.unwrap();
        assert_eq!(report.items.len(), 2);
    }
}
