//! HTTP surface over the plan controller.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::checks::PrereqCheckResult;
use crate::controller::{PlanController, PlanRequest, PlanUpdateRequest};
use crate::error::UpgradeError;
use crate::model::{HostRoleStatus, RequestId};

/// A create body is either one request or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(one) => vec![one],
            Self::Many(many) => many,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    pub status: HostRoleStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<PrereqCheckResult>,
}

/// Controller failure rendered as a JSON error.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let Some(err) = self.0.downcast_ref::<UpgradeError>() else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            e if e.is_host_selection() => StatusCode::UNPROCESSABLE_ENTITY,
            UpgradeError::NotFound(_) => StatusCode::NOT_FOUND,
            UpgradeError::Conflict(_) => StatusCode::CONFLICT,
            UpgradeError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            UpgradeError::DeleteNotSupported => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:#}", self.0);
        }
        let failed_checks = match self.0.downcast_ref::<UpgradeError>() {
            Some(UpgradeError::PreconditionFailed { failed, .. }) => failed.clone(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            failed_checks,
        };
        (status, Json(body)).into_response()
    }
}

/// Run a controller call on the blocking pool.
async fn blocking<T, F>(controller: &Arc<PlanController>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PlanController) -> anyhow::Result<T> + Send + 'static,
{
    let controller = controller.clone();
    tokio::task::spawn_blocking(move || f(&controller))
        .await
        .map_err(|e| ApiError(anyhow::anyhow!("Controller task failed: {e}")))?
        .map_err(ApiError)
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_upgrade(
    State(controller): State<Arc<PlanController>>,
    Path(cluster): Path<String>,
    Json(body): Json<OneOrMany<PlanRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let requests: Vec<PlanRequest> = body
        .into_vec()
        .into_iter()
        .map(|mut r| {
            r.cluster_name.clone_from(&cluster);
            r
        })
        .collect();

    let entity = blocking(&controller, move |c| c.start(requests)).await?;
    info!(
        "Created upgrade {} for {} (request {})",
        entity.upgrade_id, cluster, entity.request_id
    );
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn list_upgrades(
    State(controller): State<Arc<PlanController>>,
    Path(cluster): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let statuses = blocking(&controller, move |c| c.status(&cluster, query.request_id)).await?;
    Ok(Json(statuses))
}

async fn update_upgrade(
    State(controller): State<Arc<PlanController>>,
    Path((cluster, request_id)): Path<(String, RequestId)>,
    Json(body): Json<UpdateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let update = PlanUpdateRequest {
        request_id,
        status: body.status,
        reason: body.reason,
    };
    let outcome = blocking(&controller, move |c| c.update(&cluster, &update)).await?;
    Ok(Json(outcome))
}

async fn delete_upgrade(
    State(controller): State<Arc<PlanController>>,
    Path((cluster, request_id)): Path<(String, RequestId)>,
) -> Result<StatusCode, ApiError> {
    controller.delete(&cluster, request_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(controller: Arc<PlanController>) -> Router {
    Router::new()
        .route(
            "/api/v1/clusters/{cluster}/upgrades",
            get(list_upgrades).post(create_upgrade),
        )
        .route(
            "/api/v1/clusters/{cluster}/upgrades/{request_id}",
            put(update_upgrade).delete(delete_upgrade),
        )
        .with_state(controller)
}

/// Start the plan API server on the given port.
pub async fn serve(port: u16, controller: Arc<PlanController>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Plan API listening on port {}", port);
    if let Err(e) = axum::serve(listener, router(controller)).await {
        warn!("Plan API stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::checks::{CheckRule, RuleChecks};
    use crate::controller::Collaborators;
    use crate::testing;
    use crate::upgrade::PackExpander;
    use crate::upgrade::compiler::CompilerSettings;

    fn app(env: &testing::TestEnv, rules: &str) -> Router {
        let rules: Vec<CheckRule> = serde_yaml::from_str(rules).unwrap();
        let controller = PlanController::new(
            Collaborators {
                store: env.store.clone(),
                stacks: env.stacks.clone(),
                checks: Arc::new(RuleChecks::new(env.store.clone(), rules).unwrap()),
                scheduler: env.scheduler.clone(),
                upgrades: env.upgrades.clone(),
                expander: Arc::new(PackExpander::new()),
            },
            CompilerSettings::default(),
        )
        .unwrap();
        router(Arc::new(controller))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    const UPGRADES: &str = "/api/v1/clusters/c1/upgrades";

    #[tokio::test]
    async fn test_create_and_list() {
        let env = testing::env();
        let app = app(&env, "[]");

        let (status, body) =
            call(&app, Method::POST, UPGRADES, Some(json!({ "version": "2.3.0.0" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["direction"], "UPGRADE");
        assert_eq!(body["toVersion"], "2.3.0.0");
        let request_id = body["requestId"].as_u64().unwrap();

        let (status, body) = call(&app, Method::GET, UPGRADES, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["status"], "PENDING");
        assert_eq!(body[0]["clusterName"], "c1");

        let uri = format!("{UPGRADES}?request_id={request_id}");
        let (status, body) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["requestId"], request_id);
    }

    #[tokio::test]
    async fn test_create_rejects_two_requests() {
        let env = testing::env();
        let app = app(&env, "[]");
        let body = json!([{ "version": "2.3.0.0" }, { "version": "2.3.0.0" }]);
        let (status, body) = call(&app, Method::POST, UPGRADES, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Can only initiate one upgrade per request.");
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let env = testing::env();
        let app = app(&env, "[]");
        let body = json!({ "version": "2.3.0.0" });
        call(&app, Method::POST, UPGRADES, Some(body.clone())).await;
        let (status, _) = call(&app, Method::POST, UPGRADES, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_failed_checks() {
        let env = testing::env();
        let app = app(
            &env,
            "- { kind: component_absent, id: FLUME_REMOVED, service: FLUME, component: FLUME_HANDLER }",
        );
        let (status, body) =
            call(&app, Method::POST, UPGRADES, Some(json!({ "version": "2.3.0.0" }))).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["failed_checks"][0]["id"], "FLUME_REMOVED");
        assert_eq!(body["failed_checks"][0]["status"], "FAIL");
    }

    #[tokio::test]
    async fn test_unknown_cluster_and_version() {
        let env = testing::env();
        let app = app(&env, "[]");
        let (status, _) = call(&app, Method::GET, "/api/v1/clusters/nope/upgrades", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            call(&app, Method::POST, UPGRADES, Some(json!({ "version": "9.9.9.9" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Repository version 9.9.9.9 was not found");
    }

    #[tokio::test]
    async fn test_abort_and_invalid_update() {
        let env = testing::env();
        let app = app(&env, "[]");
        let (_, body) =
            call(&app, Method::POST, UPGRADES, Some(json!({ "version": "2.3.0.0" }))).await;
        let uri = format!("{UPGRADES}/{}", body["requestId"]);

        let (status, body) = call(
            &app,
            Method::PUT,
            &uri,
            Some(json!({ "status": "ABORTED", "reason": "maintenance window closed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "cancelled");

        let (status, _) =
            call(&app, Method::PUT, &uri, Some(json!({ "status": "COMPLETED" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_retry_requires_aborted_plan() {
        let env = testing::env();
        let app = app(&env, "[]");
        let (_, body) =
            call(&app, Method::POST, UPGRADES, Some(json!({ "version": "2.3.0.0" }))).await;
        let uri = format!("{UPGRADES}/{}", body["requestId"]);

        let (status, body) =
            call(&app, Method::PUT, &uri, Some(json!({ "status": "PENDING" }))).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(body["error"].as_str().unwrap().contains("currently PENDING"));
        assert!(body.get("failed_checks").is_none());
    }

    #[tokio::test]
    async fn test_delete_not_allowed() {
        let env = testing::env();
        let app = app(&env, "[]");
        let (status, body) = call(&app, Method::DELETE, &format!("{UPGRADES}/1"), None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Cannot delete Upgrades");
    }
}
