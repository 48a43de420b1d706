//! Reading progress API routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::JsonBody;
use crate::auth::{ensure_admin, ensure_self_or_admin, Caller};
use crate::db::{ProgressRepository, ReadingProgress};
use crate::error::{parse_id, AppError, Result};
use crate::progress::{DeadLetter, SaveProgress};
use crate::state::AppState;

/// Per-user progress routes, merged under `/users`
pub fn user_router() -> Router<AppState> {
    Router::new()
        .route("/:id/progress", get(list_progress).put(save_progress))
        .route(
            "/:id/progress/:book_id",
            get(get_progress).delete(delete_progress),
        )
}

/// Queue administration routes
pub fn admin_router() -> Router<AppState> {
    Router::new().route("/dead-letters", get(list_dead_letters))
}

/// Progress save body; the user comes from the path
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveProgressBody {
    book_id: String,
    current_chapter_id: String,
    #[serde(default)]
    chapter_percentage: f64,
    #[serde(default)]
    restore_reference: Option<String>,
}

/// Save progress through the user's queue lane
async fn save_progress(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
    JsonBody(body): JsonBody<SaveProgressBody>,
) -> Result<Json<ReadingProgress>> {
    parse_id(&user_id)?;
    ensure_self_or_admin(&caller, &user_id)?;

    let request = SaveProgress {
        user_id,
        book_id: body.book_id,
        current_chapter_id: body.current_chapter_id,
        chapter_percentage: body.chapter_percentage,
        restore_reference: body.restore_reference,
    };
    // Malformed requests are rejected up front instead of dead-lettered
    request.validate()?;

    let progress = state.queue().submit(request).await?;

    Ok(Json(progress))
}

/// Books the user has started
async fn list_progress(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ReadingProgress>>> {
    parse_id(&user_id)?;
    ensure_self_or_admin(&caller, &user_id)?;

    let mut conn = state.db().acquire().await?;
    let progress = ProgressRepository::new(&mut conn).list_for_user(&user_id).await?;
    Ok(Json(progress))
}

/// Progress for one book, `null` when the user has not started it
async fn get_progress(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((user_id, book_id)): Path<(String, String)>,
) -> Result<Json<Option<ReadingProgress>>> {
    parse_id(&user_id)?;
    parse_id(&book_id)?;
    ensure_self_or_admin(&caller, &user_id)?;

    let mut conn = state.db().acquire().await?;
    let progress = ProgressRepository::new(&mut conn)
        .get(&user_id, &book_id)
        .await?;
    Ok(Json(progress))
}

async fn delete_progress(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((user_id, book_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    parse_id(&user_id)?;
    parse_id(&book_id)?;
    ensure_self_or_admin(&caller, &user_id)?;

    let mut conn = state.db().acquire().await?;
    let deleted = ProgressRepository::new(&mut conn)
        .delete(&user_id, &book_id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("No progress for book: {}", book_id)))
    }
}

async fn list_dead_letters(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<DeadLetter>>> {
    ensure_admin(&caller)?;
    Ok(Json(state.queue().dead_letters().await))
}
