//! HTTP routes

pub mod books;
pub mod chapters;
pub mod health;
pub mod progress;
pub mod users;

use axum::{
    extract::{FromRequest, Request},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// JSON request body; malformed bodies answer with the usual error envelope
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/health", health::router())
        .nest("/api/v1/users", users::router().merge(progress::user_router()))
        .nest("/api/v1/books", books::router())
        .nest("/api/v1/chapters", chapters::router())
        .nest("/api/v1/progress", progress::admin_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::USER_ID_HEADER;
    use crate::config::Config;
    use crate::db::create_pool;

    async fn test_app() -> Router {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        app(AppState::new(&Config::default(), pool))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        caller: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(USER_ID_HEADER, caller);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_user(app: &Router, email: &str) -> String {
        let (status, user) = send(
            app,
            Method::POST,
            "/api/v1/users",
            None,
            Some(json!({ "displayName": email, "email": email })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        user["id"].as_str().unwrap().to_string()
    }

    async fn create_book(app: &Router, author: &str, state: &str) -> String {
        let (status, book) = send(
            app,
            Method::POST,
            "/api/v1/books",
            Some(author),
            Some(json!({ "title": "Serial", "state": state })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        book["id"].as_str().unwrap().to_string()
    }

    async fn create_chapter(
        app: &Router,
        author: &str,
        book_id: &str,
        header: &str,
        order_id: Option<i64>,
        state: &str,
    ) -> Value {
        let (status, chapter) = send(
            app,
            Method::POST,
            "/api/v1/chapters",
            Some(author),
            Some(json!({
                "bookId": book_id,
                "header": header,
                "content": "Once upon a time",
                "orderId": order_id,
                "state": state,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", chapter);
        chapter
    }

    fn headers(titles: &Value) -> Vec<&str> {
        titles
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["header"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let (status, body) = send(&app, Method::GET, "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "quill-server");
    }

    #[tokio::test]
    async fn test_chapter_lifecycle() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let book_id = create_book(&app, &author, "public").await;

        create_chapter(&app, &author, &book_id, "one", None, "public").await;
        let two = create_chapter(&app, &author, &book_id, "two", None, "public").await;
        let zero = create_chapter(&app, &author, &book_id, "zero", Some(1), "public").await;
        assert_eq!(zero["orderId"], 1);

        let uri = format!("/api/v1/books/{}/chapters", book_id);
        let (_, titles) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(headers(&titles), vec!["zero", "one", "two"]);

        let two_id = two["id"].as_str().unwrap();
        let (status, moved) = send(
            &app,
            Method::PUT,
            &format!("/api/v1/chapters/{}/order", two_id),
            Some(&author),
            Some(json!({ "orderId": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved, json!({ "chapterId": two_id, "orderId": 1 }));

        let (_, titles) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(headers(&titles), vec!["two", "zero", "one"]);

        let (status, next) = send(
            &app,
            Method::DELETE,
            &format!("/api/v1/chapters/{}", two_id),
            Some(&author),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(next["header"], "zero");
        assert_eq!(next["orderId"], 1);

        let (_, first) = send(
            &app,
            Method::GET,
            &format!("/api/v1/books/{}/chapters/1", book_id),
            None,
            None,
        )
        .await;
        assert_eq!(headers(&first), vec!["zero"]);
    }

    #[tokio::test]
    async fn test_patch_moves_and_renames() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let book_id = create_book(&app, &author, "public").await;

        create_chapter(&app, &author, &book_id, "a", None, "public").await;
        let b = create_chapter(&app, &author, &book_id, "b", None, "public").await;

        let (status, patched) = send(
            &app,
            Method::PATCH,
            &format!("/api/v1/chapters/{}", b["id"].as_str().unwrap()),
            Some(&author),
            Some(json!({ "header": "b!", "orderId": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["header"], "b!");
        assert_eq!(patched["orderId"], 1);
    }

    #[tokio::test]
    async fn test_only_author_may_write_chapters() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let stranger = create_user(&app, "stranger@example.com").await;
        let book_id = create_book(&app, &author, "public").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/chapters",
            Some(&stranger),
            Some(json!({ "bookId": book_id, "header": "x", "content": "y" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/chapters",
            None,
            Some(json!({ "bookId": book_id, "header": "x", "content": "y" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_draft_chapters_are_hidden_from_readers() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let reader = create_user(&app, "reader@example.com").await;
        let book_id = create_book(&app, &author, "public").await;

        create_chapter(&app, &author, &book_id, "out", None, "public").await;
        let draft = create_chapter(&app, &author, &book_id, "wip", None, "draft").await;
        let uri = format!("/api/v1/chapters/{}", draft["id"].as_str().unwrap());

        let (status, _) = send(&app, Method::GET, &uri, Some(&reader), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, &uri, Some(&author), None).await;
        assert_eq!(status, StatusCode::OK);

        let titles_uri = format!("/api/v1/books/{}/chapters", book_id);
        let (_, titles) = send(&app, Method::GET, &titles_uri, Some(&reader), None).await;
        assert_eq!(headers(&titles), vec!["out"]);
        let (_, titles) = send(&app, Method::GET, &titles_uri, Some(&author), None).await;
        assert_eq!(headers(&titles), vec!["out", "wip"]);
    }

    #[tokio::test]
    async fn test_malformed_and_missing_ids() {
        let app = test_app().await;

        let (status, body) = send(&app, Method::GET, "/api/v1/chapters/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "invalid_id");

        let uri = format!("/api/v1/books/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_envelope() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let book_id = create_book(&app, &author, "public").await;
        let chapter = create_chapter(&app, &author, &book_id, "one", None, "public").await;

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/v1/chapters/{}/order", chapter["id"].as_str().unwrap()),
            Some(&author),
            Some(json!({ "orderId": "second" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap().contains("orderId"));
    }

    #[tokio::test]
    async fn test_progress_round_trip() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let reader = create_user(&app, "reader@example.com").await;
        let book_id = create_book(&app, &author, "public").await;

        create_chapter(&app, &author, &book_id, "one", None, "public").await;
        let two = create_chapter(&app, &author, &book_id, "two", None, "public").await;

        let uri = format!("/api/v1/users/{}/progress", reader);
        let (status, saved) = send(
            &app,
            Method::PUT,
            &uri,
            Some(&reader),
            Some(json!({
                "bookId": book_id,
                "currentChapterId": two["id"],
                "chapterPercentage": 42.5,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", saved);
        assert_eq!(saved["currentChapterOrderId"], 2);
        assert_eq!(saved["allChaptersCount"], 2);

        // A new prologue shifts the cached position
        create_chapter(&app, &author, &book_id, "prologue", Some(1), "public").await;

        let one_uri = format!("{}/{}", uri, book_id);
        let (status, progress) = send(&app, Method::GET, &one_uri, Some(&reader), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["currentChapterOrderId"], 3);
        assert_eq!(progress["allChaptersCount"], 3);

        let (status, _) = send(&app, Method::GET, &uri, Some(&author), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::DELETE, &one_uri, Some(&reader), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, progress) = send(&app, Method::GET, &one_uri, Some(&reader), None).await;
        assert_eq!(progress, Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_progress_is_rejected() {
        let app = test_app().await;
        let author = create_user(&app, "author@example.com").await;
        let book_id = create_book(&app, &author, "public").await;
        let chapter = create_chapter(&app, &author, &book_id, "one", None, "public").await;

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/v1/users/{}/progress", author),
            Some(&author),
            Some(json!({
                "bookId": book_id,
                "currentChapterId": chapter["id"],
                "chapterPercentage": 250.0,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_dead_letters_require_admin() {
        let app = test_app().await;
        let reader = create_user(&app, "reader@example.com").await;

        let (status, _) = send(
            &app,
            Method::GET,
            "/api/v1/progress/dead-letters",
            Some(&reader),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(&reader),
            Some(json!({ "displayName": "x", "email": "x@example.com", "role": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
