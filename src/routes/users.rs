//! User API routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::JsonBody;
use crate::auth::{ensure_admin, MaybeCaller};
use crate::db::{CreateUser, User, UserRepository, UserRole};
use crate::error::{parse_id, AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route("/:id", get(get_user))
}

/// Register a user
///
/// Anyone may register a reader; only administrators may create administrators.
async fn create_user(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    JsonBody(data): JsonBody<CreateUser>,
) -> Result<(StatusCode, Json<User>)> {
    if data.role == UserRole::Admin {
        let caller = caller.ok_or_else(|| {
            AppError::Unauthorized("Only administrators may create administrators".to_string())
        })?;
        ensure_admin(&caller)?;
    }

    let mut conn = state.db().acquire().await?;
    let user = UserRepository::new(&mut conn).create(&data).await?;

    tracing::info!(user_id = %user.id, role = ?user.role, "Created user");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<User>> {
    parse_id(&id)?;

    let mut conn = state.db().acquire().await?;
    let user = UserRepository::new(&mut conn)
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User not found: {}", id)))?;

    Ok(Json(user))
}
