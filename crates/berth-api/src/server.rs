//! HTTP routes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use berth_deploy::{DeployRequest, DeployService};
use berth_executor::SubmitResult;
use berth_store::{
    Document, Job, JobId, JobStatus, Page, ProjectId, Version, VersionId, VersionSummary,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::actor_from_headers;

/// Largest page a listing returns
pub const MAX_PAGE_SIZE: u32 = 200;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Deploy pipeline
    pub service: Arc<DeployService>,
}

/// Body of a version create
#[derive(Debug, Deserialize)]
pub struct CreateVersionBody {
    /// Commit-style message
    #[serde(default)]
    pub message: String,
    /// Raw multi-document YAML
    pub content: String,
}

/// Paging query parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> Result<Page> {
        let default = Page::default();
        let limit = self.limit.unwrap_or(default.limit);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(Error::BadRequest(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Page {
            limit,
            offset: self.offset.unwrap_or(default.offset),
        })
    }
}

/// A version with its documents
#[derive(Debug, Serialize)]
pub struct VersionDetail {
    /// Version record
    #[serde(flatten)]
    pub version: Version,
    /// Documents in manifest order
    pub documents: Vec<Document>,
}

/// Current state of a job
#[derive(Debug, Serialize)]
pub struct JobStatusBody {
    /// Job id
    pub job_id: JobId,
    /// Current state
    pub status: JobStatus,
}

/// Outcome of a teardown
#[derive(Debug, Serialize)]
pub struct TeardownBody {
    /// Documents deleted
    pub deleted: usize,
}

async fn create_version(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateVersionBody>,
) -> Result<(StatusCode, Json<Version>)> {
    let actor = actor_from_headers(&headers)?;
    let version = state
        .service
        .create_version(&actor, &ProjectId::new(project_id), &body.message, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

async fn list_versions(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<VersionSummary>>> {
    actor_from_headers(&headers)?;
    let versions = state
        .service
        .list_versions(&ProjectId::new(project_id), query.page()?)
        .await?;
    Ok(Json(versions))
}

async fn version_history(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Version>>> {
    actor_from_headers(&headers)?;
    Ok(Json(state.service.history(&ProjectId::new(project_id)).await?))
}

async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VersionDetail>> {
    actor_from_headers(&headers)?;
    let (version, documents) = state.service.version(&VersionId::new(id)).await?;
    Ok(Json(VersionDetail { version, documents }))
}

async fn delete_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let actor = actor_from_headers(&headers)?;
    state.service.delete_version(&actor, &VersionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn teardown_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TeardownBody>> {
    let actor = actor_from_headers(&headers)?;
    let deleted = state
        .service
        .teardown_instance(&actor, &VersionId::new(id))
        .await?;
    Ok(Json(TeardownBody { deleted }))
}

async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeployRequest>,
) -> Result<(StatusCode, Json<SubmitResult>)> {
    let actor = actor_from_headers(&headers)?;
    debug!(version_id = %request.version_id, user_id = %actor.user_id, "deploy requested");
    let result = state.service.deploy(&actor, request).await?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Job>> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.service.job(&actor, &JobId::new(id)).await?))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JobStatusBody>> {
    let actor = actor_from_headers(&headers)?;
    let job_id = JobId::new(id);
    let status = state.service.status(&actor, &job_id).await?;
    Ok(Json(JobStatusBody { job_id, status }))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let actor = actor_from_headers(&headers)?;
    state.service.cancel(&actor, &JobId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build the API router.
///
/// Routes:
/// - `POST /v1/projects/{project}/versions` create a version
/// - `GET /v1/projects/{project}/versions` paginated summaries
/// - `GET /v1/projects/{project}/versions/history` full history
/// - `GET|DELETE /v1/versions/{id}` read or delete a version
/// - `DELETE /v1/versions/{id}/instance` tear down the caller's instance
/// - `POST /v1/jobs` deploy a version
/// - `GET /v1/jobs/{id}`, `GET /v1/jobs/{id}/status`, `POST /v1/jobs/{id}/cancel`
/// - `GET /healthz`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/v1/projects/{project_id}/versions",
            post(create_version).get(list_versions),
        )
        .route(
            "/v1/projects/{project_id}/versions/history",
            get(version_history),
        )
        .route("/v1/versions/{id}", get(get_version).delete(delete_version))
        .route("/v1/versions/{id}/instance", delete(teardown_instance))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/jobs/{id}/status", get(job_status))
        .route("/v1/jobs/{id}/cancel", post(cancel_job))
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "starting API server");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use berth_deploy::{AuditQueue, DeployConfig, LogAuditWriter, StaticDirectory, Stores};
    use berth_executor::{ClusterClient, LocalBackend, VolumeBindRequest};
    use berth_manifest::SubmissionMode;
    use berth_store::{MemoryStore, ProjectStore};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::identity::{USERNAME_HEADER, USER_ID_HEADER};

    struct NoopCluster;

    #[async_trait]
    impl ClusterClient for NoopCluster {
        async fn ensure_namespace(
            &self,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> berth_common::Result<()> {
            Ok(())
        }
        async fn apply(&self, _: &str, _: &Value) -> berth_common::Result<()> {
            Ok(())
        }
        async fn delete(&self, _: &str, _: &Value) -> berth_common::Result<()> {
            Ok(())
        }
        async fn delete_workloads(
            &self,
            _: &str,
            _: SubmissionMode,
            _: &JobId,
        ) -> berth_common::Result<()> {
            Ok(())
        }
        async fn workflow_phase(&self, _: &str, _: &JobId) -> berth_common::Result<Option<String>> {
            Ok(None)
        }
        async fn bind_volume(&self, _: &VolumeBindRequest) -> berth_common::Result<()> {
            Ok(())
        }
    }

    const TENANCY: &str = r#"
projects:
  - id: p1
    name: vision
    group_id: g1
    gpu_quota: 1
    max_concurrent_jobs_per_user: 0
    max_queued_jobs_per_user: 0
    max_job_runtime_seconds: 0
groups:
  - id: g1
    members: { u1: member, u2: member }
images:
  - image: busybox:1.36
"#;

    const MANIFEST: &str = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: shell\nspec:\n  containers:\n    - name: main\n      image: busybox:1.36\n";

    async fn app() -> Router {
        let directory = Arc::new(StaticDirectory::from_yaml(TENANCY).unwrap());
        let store = Arc::new(MemoryStore::new());
        for project in &directory.projects {
            store.upsert(project).await.unwrap();
        }
        let cluster = Arc::new(NoopCluster);
        let backend = Arc::new(LocalBackend::new(store.clone(), cluster.clone()));
        let (audit, _) = AuditQueue::spawn(Arc::new(LogAuditWriter), 16);
        let service = DeployService::new(
            Stores::shared(store),
            backend,
            cluster,
            directory.clone(),
            directory,
            audit,
            DeployConfig::default(),
        );
        router(AppState {
            service: Arc::new(service),
        })
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder
                .header(USER_ID_HEADER, user)
                .header(USERNAME_HEADER, format!("name-{user}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(app: &Router, user: &str) -> String {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/projects/p1/versions",
                Some(user),
                Some(json!({"message": "init", "content": MANIFEST})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn healthz() {
        let response = app()
            .await
            .oneshot(request("GET", "/healthz", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn identity_is_required() {
        let response = app()
            .await
            .oneshot(request("GET", "/v1/projects/p1/versions", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_manifest_is_a_bad_request() {
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/v1/projects/p1/versions",
                Some("u1"),
                Some(json!({"content": ""})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], 400);
    }

    #[tokio::test]
    async fn version_lifecycle() {
        let app = app().await;
        let id = create(&app, "u1").await;

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/v1/versions/{id}"), Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = json_body(response).await;
        assert_eq!(detail["author"], "name-u1");
        assert_eq!(detail["documents"][0]["kind"], "Pod");

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/projects/p1/versions?limit=10", Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/projects/p1/versions?limit=0", Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/v1/versions/{id}"), Some("u2"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/v1/versions/{id}"), Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("GET", "/v1/projects/p1/versions/history", Some("u1"), None))
            .await
            .unwrap();
        assert!(json_body(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deploy_status_and_cancel() {
        let app = app().await;
        let version_id = create(&app, "u1").await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/jobs",
                Some("u1"),
                Some(json!({"version_id": version_id})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let submitted = json_body(response).await;
        assert_eq!(submitted["status"], "running");
        let job_id = submitted["job_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/v1/jobs/{job_id}/status"), Some("u2"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request("POST", &format!("/v1/jobs/{job_id}/cancel"), Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/v1/jobs/{job_id}"), Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "cancelled");

        let response = app
            .oneshot(request("POST", &format!("/v1/jobs/{job_id}/cancel"), Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let response = app()
            .await
            .oneshot(request("GET", "/v1/jobs/missing", Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
