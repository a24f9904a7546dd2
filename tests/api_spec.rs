mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use cadplan::api::create_router;
use cadplan::models::*;
use common::*;
use serde_json::{json, Value};
use tempfile::TempDir;

fn setup(responses: Vec<String>) -> (TestServer, TempDir, Arc<ScriptedModel>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let model = ScriptedModel::new(responses);
    let app = create_router(pipeline(&dir, model.clone()));
    let server = TestServer::new(app).expect("Failed to create test server");
    (server, dir, model)
}

async fn create_plate(server: &TestServer) -> Value {
    let response = server
        .post("/api/v1/designs")
        .json(&json!({ "description": "A square plate 50mm with a 10mm center hole" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let (server, _dir, _model) = setup(vec![]);
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }
}

mod designs {
    use super::*;

    #[tokio::test]
    async fn lists_nothing_initially() {
        let (server, _dir, _model) = setup(vec![]);
        let response = server.get("/api/v1/designs").await;
        response.assert_status_ok();
        assert!(response.json::<Vec<Design>>().is_empty());
    }

    #[tokio::test]
    async fn create_returns_exported_design() {
        let (server, _dir, _model) = setup(vec![plate_with_hole(50.0, 5.0)]);
        let created = create_plate(&server).await;

        assert_eq!(created["design"]["state"], "exported");
        assert_eq!(created["plan"]["features"][0]["dimensions"]["radius"], 5.0);
        assert!(created["build"]["mesh"]["volume"].as_f64().unwrap() > 0.0);

        let designs = server.get("/api/v1/designs").await.json::<Vec<Design>>();
        assert_eq!(designs.len(), 1);
    }

    #[tokio::test]
    async fn get_shows_plan_and_program() {
        let (server, _dir, _model) = setup(vec![plate_with_hole(50.0, 5.0)]);
        let created = create_plate(&server).await;
        let id = created["design"]["id"].as_str().unwrap();

        let response = server.get(&format!("/api/v1/designs/{}", id)).await;
        response.assert_status_ok();
        let view = response.json::<Value>();
        assert_eq!(view["plan"]["sketch"]["size"], 50.0);
        assert!(view["program"].as_str().unwrap().contains("assembly = part"));
        assert!(view["mesh_path"].is_string());
    }

    #[tokio::test]
    async fn unknown_design_is_404() {
        let (server, _dir, _model) = setup(vec![]);
        let response = server.get("/api/v1/designs/abcdef12").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["kind"], "not_found");
    }

    #[tokio::test]
    async fn invalid_id_is_rejected() {
        let (server, _dir, _model) = setup(vec![]);
        let response = server.get("/api/v1/designs/not..valid").await;
        assert!(response.status_code().is_client_error());
    }

    #[tokio::test]
    async fn grammar_failure_is_422_with_rule() {
        let (server, _dir, _model) = setup(vec![
            plate_with_hole(50.0, 25.0),
            plate_with_hole(50.0, 25.0),
        ]);
        let response = server
            .post("/api/v1/designs")
            .json(&json!({ "description": "plate with a 50mm hole" }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let report = response.json::<Value>();
        assert_eq!(report["kind"], "grammar_violation");
        assert_eq!(report["stage"], "translate");
        assert_eq!(report["rule"], "half-size");
    }
}

mod refine {
    use super::*;

    #[tokio::test]
    async fn grows_the_hole() {
        let (server, _dir, model) = setup(vec![plate_with_hole(50.0, 5.0)]);
        let created = create_plate(&server).await;
        let id = created["design"]["id"].as_str().unwrap();
        model.push(plate_with_hole(50.0, 8.0));

        let response = server
            .post(&format!("/api/v1/designs/{}/refine", id))
            .json(&json!({ "request": "make the hole bigger" }))
            .await;

        response.assert_status_ok();
        let refined = response.json::<Value>();
        assert_eq!(refined["plan"]["features"][0]["dimensions"]["radius"], 8.0);
        assert_eq!(refined["design"]["revision"], 2);
        assert_eq!(refined["targets"][0]["target"], "feature");
    }

    #[tokio::test]
    async fn upstream_failure_is_503() {
        let (server, _dir, _model) = setup(vec![plate_with_hole(50.0, 5.0)]);
        let created = create_plate(&server).await;
        let id = created["design"]["id"].as_str().unwrap();

        let response = server
            .post(&format!("/api/v1/designs/{}/refine", id))
            .json(&json!({ "request": "make the hole bigger" }))
            .await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["stage"], "edit");
    }
}

mod artifacts {
    use super::*;

    #[tokio::test]
    async fn export_and_snapshot_and_history() {
        let (server, _dir, _model) = setup(vec![plate_with_hole(50.0, 5.0)]);
        let created = create_plate(&server).await;
        let id = created["design"]["id"].as_str().unwrap();

        let exported = server.post(&format!("/api/v1/designs/{}/export", id)).await;
        exported.assert_status_ok();
        assert_eq!(
            exported.json::<Value>()["mesh"]["bytes"],
            created["build"]["mesh"]["bytes"]
        );

        let snapshot = server.post(&format!("/api/v1/designs/{}/snapshots", id)).await;
        snapshot.assert_status(StatusCode::CREATED);
        assert!(snapshot.json::<Value>()["version_id"].is_string());

        let history = server
            .get(&format!("/api/v1/designs/{}/history", id))
            .await
            .json::<Vec<DesignEvent>>();
        let stages: Vec<Stage> = history.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Translate, Stage::Compile, Stage::Export, Stage::Export]
        );
    }
}
