//! Book API routes
//!
//! Books are created here; chapters are listed here but written through
//! `/chapters`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sqlx::SqliteConnection;

use super::JsonBody;
use crate::auth::{can_see_book, can_see_drafts, Caller, MaybeCaller};
use crate::db::{Book, BookRepository, Chapter, ChapterRepository, ChapterTitle, CreateBook, User};
use crate::error::{parse_id, AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_book))
        .route("/:id", get(get_book))
        .route("/:id/chapters", get(list_chapter_titles))
        .route("/:id/chapters/:count", get(list_first_chapters))
}

/// Load a book, or `NotFound`
pub(crate) async fn load_book(conn: &mut SqliteConnection, id: &str) -> Result<Book> {
    parse_id(id)?;

    BookRepository::new(conn)
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
}

/// Load a book the caller is allowed to see
///
/// Hidden books are reported as missing.
async fn load_visible_book(
    conn: &mut SqliteConnection,
    caller: Option<&User>,
    id: &str,
) -> Result<Book> {
    let book = load_book(conn, id).await?;
    if !can_see_book(caller, &book) {
        return Err(AppError::NotFound(format!("Book not found: {}", id)));
    }
    Ok(book)
}

async fn create_book(
    State(state): State<AppState>,
    Caller(caller): Caller,
    JsonBody(data): JsonBody<CreateBook>,
) -> Result<(StatusCode, Json<Book>)> {
    let mut conn = state.db().acquire().await?;
    let book = BookRepository::new(&mut conn).create(&caller.id, &data).await?;

    tracing::info!(book_id = %book.id, author_id = %caller.id, "Created book");
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    let mut conn = state.db().acquire().await?;
    let book = load_visible_book(&mut conn, caller.as_ref(), &id).await?;
    Ok(Json(book))
}

/// Table of contents
async fn list_chapter_titles(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChapterTitle>>> {
    let mut conn = state.db().acquire().await?;
    let book = load_visible_book(&mut conn, caller.as_ref(), &id).await?;

    let readers_only = !can_see_drafts(caller.as_ref(), &book);
    let titles = ChapterRepository::new(&mut conn)
        .titles_for_book(&book.id, readers_only)
        .await?;

    Ok(Json(titles))
}

/// The first `count` chapters in reading order
async fn list_first_chapters(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path((id, count)): Path<(String, i64)>,
) -> Result<Json<Vec<Chapter>>> {
    if count < 1 {
        return Err(AppError::Validation(format!(
            "count must be at least 1, got {}",
            count
        )));
    }

    let mut conn = state.db().acquire().await?;
    let book = load_visible_book(&mut conn, caller.as_ref(), &id).await?;

    let readers_only = !can_see_drafts(caller.as_ref(), &book);
    let chapters = ChapterRepository::new(&mut conn)
        .list_for_book(&book.id, readers_only, Some(count))
        .await?;

    Ok(Json(chapters))
}
