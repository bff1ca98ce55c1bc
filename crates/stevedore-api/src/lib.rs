//! stevedore-api — the admin REST surface.
//!
//! Provides axum route handlers for managing apps, hosts, env vars, and
//! deployments. Every route requires the shared auth token in the
//! `x-auth` header. Responses carry the wire shape clients already
//! depend on: `{"error": false, ...}` on success, `{"error": "<msg>"}`
//! otherwise.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/describe` | Per-app summary (instances, envs, image) |
//! | GET | `/apps` | List apps |
//! | POST | `/apps` | Create an app |
//! | DELETE | `/apps/{app}` | Remove an app |
//! | GET | `/hosts` | List container hosts |
//! | POST | `/hosts` | Add a container host |
//! | DELETE | `/hosts/{host}` | Remove a container host |
//! | POST | `/{app}/deploy` | Deploy a new generation |
//! | GET | `/{app}/instances` | List registered instances |
//! | GET | `/{app}/history` | Deployment history |
//! | GET | `/{app}/envs` | List env vars |
//! | POST | `/{app}/envs` | Add an env var |
//! | DELETE | `/{app}/envs/{env}` | Remove env vars by prefix |
//! | GET | `/{app}/logs` | Container logs per instance |
//! | GET | `/{app}/kill` | Tear down all instances |

pub mod handlers;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tracing::warn;

use stevedore_deploy::Orchestrator;
use stevedore_store::MetaStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: MetaStore,
    pub orchestrator: Orchestrator,
}

/// Build the admin router with the token check applied to every route.
pub fn build_router(store: MetaStore, orchestrator: Orchestrator) -> Router {
    let state = ApiState {
        store,
        orchestrator,
    };

    Router::new()
        .route("/describe", get(handlers::describe))
        .route("/apps", get(handlers::list_apps).post(handlers::create_app))
        .route("/apps/{app}", delete(handlers::remove_app))
        .route("/hosts", get(handlers::list_hosts).post(handlers::add_host))
        .route("/hosts/{host}", delete(handlers::remove_host))
        .route("/{app}/deploy", post(handlers::deploy))
        .route("/{app}/instances", get(handlers::list_instances))
        .route("/{app}/history", get(handlers::history))
        .route(
            "/{app}/envs",
            get(handlers::list_envs).post(handlers::add_env),
        )
        .route("/{app}/envs/{env}", delete(handlers::remove_env))
        .route("/{app}/logs", get(handlers::logs))
        .route("/{app}/kill", get(handlers::kill))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

/// Reject any request whose `x-auth` header does not match the stored token.
async fn require_token(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let supplied = request
        .headers()
        .get("x-auth")
        .and_then(|value| value.to_str().ok());

    match state.store.check_token(supplied).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            handlers::failure(StatusCode::UNAUTHORIZED, "Invalid token").into_response()
        }
        Err(err) => {
            warn!(error = %err, "token check failed");
            handlers::failure(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
                .into_response()
        }
    }
}
