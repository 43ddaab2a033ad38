//! API routes.

pub mod fleet;
pub mod health;
pub mod pipelines;

use crate::AppState;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(pipelines::router())
        .merge(fleet::router())
        .route("/version", get(health::version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use irgsh_core::artifact::{SignatureVerifier, SubmissionStorage};
    use irgsh_core::fleet::{FleetThresholds, InstanceInfo, InstanceType};
    use irgsh_core::pipeline::TaskState;
    use irgsh_core::{Error, Result, TaskUuid};
    use irgsh_db::{SqliteIsoJobRepo, SqliteJobRepo, create_memory_pool, run_migrations};
    use irgsh_fleet::{FleetRegistry, MemoryFleetStore};
    use irgsh_scheduler::{MemoryTaskQueue, PipelineOrchestrator};
    use serde_json::{Value, json};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct AcceptingStorage;

    #[async_trait]
    impl SubmissionStorage for AcceptingStorage {
        async fn store_upload(&self, upload_id: &str, _token: &[u8], _blob: &[u8]) -> Result<PathBuf> {
            Ok(PathBuf::from("/srv/submissions").join(format!("{}.token", upload_id)))
        }

        async fn discard_upload(&self, _upload_id: &str) -> Result<()> {
            Ok(())
        }

        async fn admit_upload(&self, _upload_id: &str, uuid: &TaskUuid) -> Result<PathBuf> {
            Ok(PathBuf::from("/srv/submissions").join(uuid.as_str()))
        }

        async fn tarball_exists(&self, _uuid: &TaskUuid) -> Result<bool> {
            Ok(true)
        }

        async fn copy_submission(&self, _from: &TaskUuid, _to: &TaskUuid) -> Result<()> {
            Ok(())
        }

        async fn reclaim_ownership(&self, _uuid: &TaskUuid) -> Result<()> {
            Ok(())
        }
    }

    /// Accepts every submission except those of the "evil" package.
    struct NameVerifier;

    #[async_trait]
    impl SignatureVerifier for NameVerifier {
        async fn verify_submission(&self, dir: &Path) -> Result<()> {
            if dir.to_string_lossy().ends_with("_evil") {
                return Err(Error::Unauthorized("bad signature".to_string()));
            }
            Ok(())
        }

        async fn verify_token(&self, _token: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct TestApp {
        router: Router,
        queue: Arc<MemoryTaskQueue>,
        fleet: FleetRegistry,
    }

    async fn app() -> TestApp {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let queue = Arc::new(MemoryTaskQueue::new());
        let orchestrator = PipelineOrchestrator::new(
            queue.clone(),
            Arc::new(AcceptingStorage),
            Arc::new(NameVerifier),
        )
        .with_job_tracking(
            Arc::new(SqliteJobRepo::new(pool.clone(), 100)),
            Arc::new(SqliteIsoJobRepo::new(pool, 100)),
        );
        let fleet = FleetRegistry::new(Arc::new(MemoryFleetStore::new()), FleetThresholds::default());
        let state = AppState::new(Arc::new(orchestrator), Some(fleet.clone()));

        TestApp {
            router: router(state),
            queue,
            fleet,
        }
    }

    fn bare_app() -> Router {
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(MemoryTaskQueue::new()),
            Arc::new(AcceptingStorage),
            Arc::new(NameVerifier),
        );
        router(AppState::new(Arc::new(orchestrator), None))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const BOUNDARY: &str = "irgsh-test-boundary";

    fn multipart(uri: &str, parts: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, data) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn submission(package: &str) -> Value {
        json!({
            "packageName": package,
            "packageVersion": "1.0-1",
            "packageUrl": "https://git.example.org/foo-pkg",
            "maintainer": "Jane <jane@example.org>",
            "maintainerFingerprint": "DEADBEEF",
            "component": "main",
            "tarball": "upload-1"
        })
    }

    async fn submit(router: &Router, package: &str) -> String {
        let (status, body) = send(router, post_json("/api/v1/submit", &submission(package))).await;
        assert_eq!(status, StatusCode::OK);
        body["pipelineId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = app().await;
        let (status, body) = send(&app.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = send(&app.router, get("/health/ready")).await;
        assert_eq!(body["jobTracking"], true);
        assert_eq!(body["monitoring"], true);

        let (status, body) = send(&app.router, get("/api/v1/version")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let app = app().await;
        let id = submit(&app.router, "foo").await;
        assert!(id.ends_with("_DEADBEEF_foo"));

        let (status, body) = send(&app.router, get(&format!("/api/v1/status?uuid={}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pipelineId"], id.as_str());
        assert_eq!(body["state"], "PENDING");

        let uuid = TaskUuid::parse(&id).unwrap();
        app.queue.set_state(&uuid, "build", TaskState::Success);
        let (_, body) = send(&app.router, get(&format!("/api/v1/status?uuid={}", id))).await;
        assert_eq!(body["state"], "REPO");
    }

    #[tokio::test]
    async fn test_submit_errors() {
        let app = app().await;

        let (status, body) = send(&app.router, post_json("/api/v1/submit", &submission("evil"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send(&app.router, post_json("/api/v1/submit", &json!({"packageName": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app.router, post_json("/api/v1/submit", &submission("foo bar"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("packageName"));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/submit")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_submission_upload() {
        let app = app().await;
        let gzip: &[u8] = &[0x1f, 0x8b, 0x08, 0x00, 0x00];

        let request = multipart(
            "/api/v1/submission-upload",
            &[("token", b"signed token".as_slice()), ("blob", gzip)],
        );
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["id"].as_str().unwrap();
        assert!(TaskUuid::parse(id).is_ok());

        let request = multipart(
            "/api/v1/submission-upload",
            &[("token", b"signed token".as_slice()), ("blob", b"plain text".as_slice())],
        );
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = multipart("/api/v1/submission-upload", &[("token", b"signed token".as_slice())]);
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "blob part is required");

        let request = post_json("/api/v1/submission-upload", &json!({"token": "x"}));
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_requires_valid_uuid() {
        let app = app().await;

        let (status, body) = send(&app.router, get("/api/v1/status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "uuid is required");

        let (status, _) = send(&app.router, get("/api/v1/status?uuid=../etc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_retry() {
        let app = app().await;
        let id = submit(&app.router, "foo").await;

        let (status, body) = send(&app.router, get(&format!("/api/v1/retry?uuid={}", id))).await;
        assert_eq!(status, StatusCode::OK);
        let new_id = body["pipelineId"].as_str().unwrap();
        assert_ne!(new_id, id);
        assert_eq!(app.queue.sent().len(), 2);

        let unknown = TaskUuid::mint("DEADBEEF", "foo");
        let (status, _) = send(&app.router, get(&format!("/api/v1/retry?uuid={}", unknown))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_job_listings() {
        let app = app().await;
        submit(&app.router, "foo").await;
        submit(&app.router, "bar").await;

        let (status, body) = send(&app.router, get("/api/v1/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["label"], "PENDING");

        let (_, body) = send(&app.router, get("/api/v1/jobs?limit=1")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_build_iso() {
        let app = app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/build-iso")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["taskUUID"].is_string());

        let (status, _) = send(
            &app.router,
            post_json("/api/v1/build-iso", &json!({"repo_url": "https://git.example.org/iso", "branch": "verbeek"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app.router, get("/api/v1/iso-jobs")).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_instances() {
        let app = app().await;
        app.fleet
            .update_instance(InstanceInfo::new("build01", InstanceType::Builder, 42, "1.0"))
            .await
            .unwrap();
        app.fleet
            .update_instance(InstanceInfo::new("repo01", InstanceType::Repo, 43, "1.0"))
            .await
            .unwrap();

        let (status, body) = send(&app.router, get("/api/v1/instances?type=builder")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instances"].as_array().unwrap().len(), 1);
        assert_eq!(body["instances"][0]["instance_id"], "build01-builder");
        assert_eq!(body["summary"]["total"], 2);
        assert_eq!(body["summary"]["online"], 2);

        let (status, _) = send(&app.router, get("/api/v1/instances?type=mainframe")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app.router, get("/api/v1/instances/repo01-repo")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pid"], 43);

        let (status, _) = send(&app.router, get("/api/v1/instances/ghost-iso")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for index in ["index", "builder:index"] {
            let (status, body) = send(&app.router, get(&format!("/api/v1/instances/{}", index))).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{index}");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_disabled_subsystems_are_unavailable() {
        let router = bare_app();
        let id = TaskUuid::mint("DEADBEEF", "foo");

        for uri in [
            format!("/api/v1/retry?uuid={}", id),
            "/api/v1/jobs".to_string(),
            "/api/v1/iso-jobs".to_string(),
            "/api/v1/instances".to_string(),
        ] {
            let (status, body) = send(&router, get(&uri)).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
            assert!(body["error"].is_string());
        }

        let (status, _) = send(&router, get(&format!("/api/v1/status?uuid={}", id))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
