//! Chapter API routes
//!
//! Every write goes through the order maintainer so positions stay dense.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use super::books::load_book;
use super::JsonBody;
use crate::auth::{can_see_book, can_see_drafts, ensure_can_edit, Caller, MaybeCaller};
use crate::db::{Chapter, ChapterRepository, CreateChapter, UpdateChapter, User};
use crate::error::{parse_id, AppError, Result};
use crate::ordering::MoveOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_chapter))
        .route(
            "/:id",
            get(get_chapter).patch(update_chapter).delete(delete_chapter),
        )
        .route("/:id/order", put(reorder_chapter))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    order_id: i64,
}

fn chapter_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Chapter not found: {}", id))
}

/// Load a chapter the caller may modify
///
/// The connection is released before returning so the maintainer can take it.
async fn editable_chapter(state: &AppState, user: &User, id: &str) -> Result<Chapter> {
    parse_id(id)?;

    let mut conn = state.db().acquire().await?;
    let chapter = ChapterRepository::new(&mut conn)
        .get(id)
        .await?
        .ok_or_else(|| chapter_not_found(id))?;
    let book = load_book(&mut conn, &chapter.book_id).await?;

    ensure_can_edit(user, &book)?;
    Ok(chapter)
}

async fn create_chapter(
    State(state): State<AppState>,
    Caller(caller): Caller,
    JsonBody(data): JsonBody<CreateChapter>,
) -> Result<(StatusCode, Json<Chapter>)> {
    {
        let mut conn = state.db().acquire().await?;
        let book = load_book(&mut conn, &data.book_id).await?;
        ensure_can_edit(&caller, &book)?;
    }

    let chapter = state.maintainer().insert(&data).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn get_chapter(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Json<Chapter>> {
    parse_id(&id)?;

    let mut conn = state.db().acquire().await?;
    let chapter = ChapterRepository::new(&mut conn)
        .get(&id)
        .await?
        .ok_or_else(|| chapter_not_found(&id))?;
    let book = load_book(&mut conn, &chapter.book_id).await?;

    let visible = can_see_book(caller.as_ref(), &book)
        && (chapter.state.is_visible_to_readers() || can_see_drafts(caller.as_ref(), &book));
    if !visible {
        return Err(chapter_not_found(&id));
    }

    Ok(Json(chapter))
}

async fn update_chapter(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<UpdateChapter>,
) -> Result<Json<Chapter>> {
    editable_chapter(&state, &caller, &id).await?;

    let chapter = state.maintainer().update(&id, &patch).await?;
    Ok(Json(chapter))
}

/// Delete a chapter, answering with the chapter to show next
async fn delete_chapter(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Option<Chapter>>> {
    editable_chapter(&state, &caller, &id).await?;

    let outcome = state.maintainer().delete(&id).await?;
    Ok(Json(outcome.next))
}

async fn reorder_chapter(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<ReorderRequest>,
) -> Result<Json<MoveOutcome>> {
    editable_chapter(&state, &caller, &id).await?;

    let outcome = state.maintainer().move_chapter(&id, request.order_id).await?;
    Ok(Json(outcome))
}
