//! Admin API handlers.
//!
//! Each handler drives the store or the orchestrator and answers in the
//! fixed wire shape; store and runtime errors surface as `500` with the
//! error message, validation problems as `400`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::ApiState;

/// Instances launched per deploy when the caller does not say.
const DEFAULT_DEPLOY_COUNT: u32 = 2;

/// Upper bound on instances per deploy.
const MAX_DEPLOY_COUNT: u32 = 32;

// ── Wire shape ─────────────────────────────────────────────────

fn ok_empty() -> Json<Value> {
    Json(json!({ "error": false }))
}

fn ok_with<T: serde::Serialize>(key: &str, value: T) -> Json<Value> {
    let mut body = serde_json::Map::new();
    body.insert("error".to_string(), Value::Bool(false));
    body.insert(
        key.to_string(),
        serde_json::to_value(value).unwrap_or(Value::Null),
    );
    Json(Value::Object(body))
}

pub(crate) fn failure(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    failure(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

fn invalid(message: &str) -> (StatusCode, Json<Value>) {
    failure(StatusCode::BAD_REQUEST, message)
}

// ── Describe ───────────────────────────────────────────────────

/// GET /describe
pub async fn describe(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.describe().await {
        Ok(description) => ok_with("description", description).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

// ── Apps ───────────────────────────────────────────────────────

/// GET /apps
pub async fn list_apps(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.apps().await {
        Ok(apps) => ok_with("apps", apps).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CreateApp {
    pub app: String,
}

/// POST /apps
pub async fn create_app(
    State(state): State<ApiState>,
    Json(body): Json<CreateApp>,
) -> impl IntoResponse {
    if body.app.is_empty() {
        return invalid("app must not be empty").into_response();
    }
    match state.store.add_app(&body.app).await {
        Ok(()) => {
            info!(app = %body.app, "app created");
            ok_empty().into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

/// DELETE /apps/{app}
pub async fn remove_app(
    State(state): State<ApiState>,
    Path(app): Path<String>,
) -> impl IntoResponse {
    match state.store.remove_app(&app).await {
        Ok(()) => {
            info!(%app, "app removed");
            ok_empty().into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

// ── Hosts ──────────────────────────────────────────────────────

/// GET /hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.hosts().await {
        Ok(hosts) => ok_with("hosts", hosts).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct AddHost {
    pub host: String,
}

/// POST /hosts
pub async fn add_host(
    State(state): State<ApiState>,
    Json(body): Json<AddHost>,
) -> impl IntoResponse {
    if body.host.parse::<std::net::IpAddr>().is_err() {
        return invalid("host must be an IP address").into_response();
    }
    match state.store.add_host(&body.host).await {
        Ok(()) => {
            info!(host = %body.host, "host added");
            ok_empty().into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

/// DELETE /hosts/{host}
pub async fn remove_host(
    State(state): State<ApiState>,
    Path(host): Path<String>,
) -> impl IntoResponse {
    match state.store.remove_host(&host).await {
        Ok(()) => {
            info!(%host, "host removed");
            ok_empty().into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

// ── Deploy ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DeployRequest {
    pub image: String,
    pub count: Option<u32>,
}

/// Missing count falls back to the default; anything above the cap is
/// clamped rather than rejected.
fn effective_count(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_DEPLOY_COUNT).min(MAX_DEPLOY_COUNT)
}

/// POST /{app}/deploy
pub async fn deploy(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Json(body): Json<DeployRequest>,
) -> impl IntoResponse {
    if body.image.is_empty() {
        return invalid("image must not be empty").into_response();
    }
    let count = effective_count(body.count);
    info!(%app, image = %body.image, count, "deploy requested");
    match state
        .orchestrator
        .deploy_app_instances(&app, &body.image, count)
        .await
    {
        Ok(_) => ok_empty().into_response(),
        Err(e) => internal(e).into_response(),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// GET /{app}/instances
pub async fn list_instances(
    State(state): State<ApiState>,
    Path(app): Path<String>,
) -> impl IntoResponse {
    match state.store.app_instances(&app).await {
        Ok(instances) => {
            let endpoints: Vec<String> = instances.iter().map(ToString::to_string).collect();
            ok_with("instances", endpoints).into_response()
        }
        Err(e) => internal(e).into_response(),
    }
}

// ── History ────────────────────────────────────────────────────

/// GET /{app}/history
pub async fn history(
    State(state): State<ApiState>,
    Path(app): Path<String>,
) -> impl IntoResponse {
    match state.store.deployments(&app).await {
        Ok(records) => ok_with("history", records).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

// ── Env vars ───────────────────────────────────────────────────

/// GET /{app}/envs
pub async fn list_envs(
    State(state): State<ApiState>,
    Path(app): Path<String>,
) -> impl IntoResponse {
    match state.store.app_envs(&app).await {
        Ok(envs) => ok_with("envs", envs).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct AddEnv {
    pub env: String,
}

/// POST /{app}/envs
pub async fn add_env(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Json(body): Json<AddEnv>,
) -> impl IntoResponse {
    if body.env.is_empty() {
        return invalid("env must not be empty").into_response();
    }
    match state.store.add_app_env(&app, &body.env).await {
        Ok(()) => ok_empty().into_response(),
        Err(e) => internal(e).into_response(),
    }
}

/// DELETE /{app}/envs/{env}
///
/// Removal is by prefix: deleting `FOO` drops every entry starting with
/// `FOO`, not just `FOO=...`.
pub async fn remove_env(
    State(state): State<ApiState>,
    Path((app, env)): Path<(String, String)>,
) -> impl IntoResponse {
    if env.is_empty() {
        return invalid("env must not be empty").into_response();
    }
    match state.store.remove_app_env(&app, &env).await {
        Ok(_) => ok_empty().into_response(),
        Err(e) => internal(e).into_response(),
    }
}

// ── Logs ───────────────────────────────────────────────────────

/// GET /{app}/logs
pub async fn logs(State(state): State<ApiState>, Path(app): Path<String>) -> impl IntoResponse {
    match state.orchestrator.app_logs(&app).await {
        Ok(logs) => ok_with("logs", logs).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

// ── Kill ───────────────────────────────────────────────────────

/// GET /{app}/kill
pub async fn kill(State(state): State<ApiState>, Path(app): Path<String>) -> impl IntoResponse {
    info!(%app, "teardown requested");
    match state.orchestrator.kill_app_instances(&app).await {
        Ok(()) => ok_empty().into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_count_defaults_and_clamps() {
        assert_eq!(effective_count(None), 2);
        assert_eq!(effective_count(Some(1)), 1);
        assert_eq!(effective_count(Some(32)), 32);
        assert_eq!(effective_count(Some(500)), 32);
    }

    #[test]
    fn success_shape_carries_error_false() {
        let Json(body) = ok_with("apps", vec!["a", "b"]);
        assert_eq!(body["error"], Value::Bool(false));
        assert_eq!(body["apps"], json!(["a", "b"]));

        let Json(body) = ok_empty();
        assert_eq!(body, json!({ "error": false }));
    }

    #[test]
    fn failure_shape_carries_the_message() {
        let (status, Json(body)) = failure(StatusCode::UNAUTHORIZED, "Invalid token");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Invalid token" }));
    }
}
