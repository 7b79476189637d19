use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{CreateUserRequest, UpdateUserRequest};
use crate::{
    auth::{dto::MessageResponse, extractors::AdminUser, repo_types::User},
    error::AuthError,
    extract::AppJson,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", patch(update_user).delete(delete_user))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<Vec<User>>, AuthError> {
    Ok(Json(state.auth.list_users().await?))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.id))]
pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AuthError> {
    let user = state.auth.create_user(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.id))]
pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> Result<Json<User>, AuthError> {
    let user = state.auth.update_user(&admin, id, payload.into()).await?;
    Ok(Json(user))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.auth.deactivate_user(&admin, id).await?;
    Ok(Json(MessageResponse::new("User deactivated successfully")))
}
