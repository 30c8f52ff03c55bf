use crate::error_reason::{ErrorKind, ServiceError};
use crate::model::{CreateUser, UpdateUser, UpsertUser, User, VerifyOutcome, VerifyUser};
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{atomic::Ordering, Arc};
use tracing::debug;

pub type HttpState = Arc<AppState>;

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/users", get(list_users).post(create_user))
        .route("/users/upsert", post(upsert_user).put(upsert_user))
        .route("/users/verify", post(verify_user))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
        .with_state(state)
}

pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (status_code(self.kind), Json(json!({"error": self.message}))).into_response()
    }
}

type Reply<T> = Result<(StatusCode, Json<T>), ServiceError>;

/// A rejected body still counts as one (failed) call.
fn payload<T>(state: &AppState, body: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    body.map(|Json(v)| v).map_err(|e| {
        debug!(error = %e, "rejected request body");
        reject(state, "invalid JSON payload")
    })
}

/// Same for a malformed `:id`. The raw segment is never echoed back.
fn user_id(state: &AppState, id: Result<Path<i32>, PathRejection>) -> Result<i32, ServiceError> {
    id.map(|Path(id)| id).map_err(|e| {
        debug!(error = %e, "rejected user id");
        reject(state, "invalid user ID format")
    })
}

fn reject(state: &AppState, message: &str) -> ServiceError {
    state.count_call();
    state.count_failure();
    ServiceError::invalid(message)
}

fn settle<T>(state: &AppState, res: Result<T, ServiceError>) -> Result<T, ServiceError> {
    state.count_call();
    if res.is_err() {
        state.count_failure();
    }
    res
}

// ----------------------
// Handlers
// ----------------------
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "healthy", "service": "user-service"})))
}

pub async fn status(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    let breaker = state.users.breaker_snapshot();
    let body = json!({
        "db_gateway": state.cfg.db_gateway.base_url(),
        "breaker": breaker,
        // sticky: shows the last classified failure even after recovery
        "last_error": state.users.last_error().map(|k| k.as_str()).unwrap_or("-"),
        "total_calls": state.total_calls.load(Ordering::Relaxed),
        "failed_calls": state.failed_calls.load(Ordering::Relaxed),
    });
    (StatusCode::OK, Json(body))
}

pub async fn list_users(State(state): State<HttpState>) -> Reply<Vec<User>> {
    let users = settle(&state, state.users.get_all_users().await)?;
    Ok((StatusCode::OK, Json(users)))
}

pub async fn get_user(
    State(state): State<HttpState>,
    id: Result<Path<i32>, PathRejection>,
) -> Reply<User> {
    let id = user_id(&state, id)?;
    let user = settle(&state, state.users.get_user_by_id(id).await)?;
    Ok((StatusCode::OK, Json(user)))
}

pub async fn create_user(
    State(state): State<HttpState>,
    body: Result<Json<CreateUser>, JsonRejection>,
) -> Reply<User> {
    let req = payload(&state, body)?;
    let user = settle(&state, state.users.create_user(req).await)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<HttpState>,
    id: Result<Path<i32>, PathRejection>,
    body: Result<Json<UpdateUser>, JsonRejection>,
) -> Reply<User> {
    let id = user_id(&state, id)?;
    let req = payload(&state, body)?;
    let user = settle(&state, state.users.update_user(id, req).await)?;
    Ok((StatusCode::OK, Json(user)))
}

pub async fn delete_user(
    State(state): State<HttpState>,
    id: Result<Path<i32>, PathRejection>,
) -> Reply<Value> {
    let id = user_id(&state, id)?;
    let message = settle(&state, state.users.delete_user(id).await)?;
    Ok((StatusCode::OK, Json(json!({"message": message}))))
}

pub async fn upsert_user(
    State(state): State<HttpState>,
    body: Result<Json<UpsertUser>, JsonRejection>,
) -> Reply<User> {
    let req = payload(&state, body)?;
    // Created and updated are indistinguishable here, so always 200.
    let user = settle(&state, state.users.upsert_user(req).await)?;
    Ok((StatusCode::OK, Json(user)))
}

pub async fn verify_user(
    State(state): State<HttpState>,
    body: Result<Json<VerifyUser>, JsonRejection>,
) -> Reply<VerifyOutcome> {
    let req = payload(&state, body)?;
    let outcome = settle(&state, state.users.verify_user(req).await)?;
    Ok((StatusCode::OK, Json(outcome)))
}
