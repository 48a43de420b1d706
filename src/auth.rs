//! Caller identity and authorization checks
//!
//! Identity comes from the `x-user-id` header and is resolved against the
//! user table on every request.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::db::{Book, User, UserRepository};
use crate::error::{parse_id, AppError, Result};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

const NOT_ELIGIBLE: &str = "This user is not eligible to this action";

/// The calling user, if the request names one
pub struct MaybeCaller(pub Option<User>);

/// The calling user; rejects anonymous requests
pub struct Caller(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(MaybeCaller(None));
        };

        let user_id = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("Malformed user header".to_string()))?;
        parse_id(user_id).map_err(|_| AppError::Unauthorized("Malformed user header".to_string()))?;

        let mut conn = state.db().acquire().await?;
        let user = UserRepository::new(&mut conn)
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(format!("Unknown user: {}", user_id)))?;

        Ok(MaybeCaller(Some(user)))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match MaybeCaller::from_request_parts(parts, state).await? {
            MaybeCaller(Some(user)) => Ok(Caller(user)),
            MaybeCaller(None) => Err(AppError::Unauthorized(format!(
                "Missing {} header",
                USER_ID_HEADER
            ))),
        }
    }
}

/// Whether the caller may see the book's unpublished chapters
pub fn can_see_drafts(caller: Option<&User>, book: &Book) -> bool {
    caller.is_some_and(|user| user.is_admin() || user.id == book.author_id)
}

/// Whether the caller may see the book at all
pub fn can_see_book(caller: Option<&User>, book: &Book) -> bool {
    book.state.is_visible_to_readers()
        || can_see_drafts(caller, book)
        || caller.is_some_and(|user| book.invite_list.contains(&user.id))
}

/// Chapter mutations are reserved for the author and administrators
pub fn ensure_can_edit(user: &User, book: &Book) -> Result<()> {
    if can_see_drafts(Some(user), book) {
        Ok(())
    } else {
        tracing::debug!(user_id = %user.id, book_id = %book.id, "Rejected chapter mutation");
        Err(AppError::Unauthorized(NOT_ELIGIBLE.to_string()))
    }
}

/// A user's progress belongs to that user and administrators
pub fn ensure_self_or_admin(user: &User, user_id: &str) -> Result<()> {
    if user.is_admin() || user.id == user_id {
        Ok(())
    } else {
        Err(AppError::Unauthorized(NOT_ELIGIBLE.to_string()))
    }
}

/// Only administrators
pub fn ensure_admin(user: &User) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Unauthorized(NOT_ELIGIBLE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PublicationState, UserRole};

    fn user(id: &str, role: UserRole) -> User {
        User {
            id: id.to_string(),
            display_name: id.to_string(),
            email: format!("{}@example.com", id),
            role,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn book(state: PublicationState) -> Book {
        Book {
            id: "book".to_string(),
            author_id: "author".to_string(),
            title: "Title".to_string(),
            state,
            genre: Vec::new(),
            invite_list: vec!["friend".to_string()],
            revision: 0,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_edit_rights() {
        let draft = book(PublicationState::Draft);

        assert!(ensure_can_edit(&user("author", UserRole::User), &draft).is_ok());
        assert!(ensure_can_edit(&user("root", UserRole::Admin), &draft).is_ok());
        assert!(matches!(
            ensure_can_edit(&user("friend", UserRole::User), &draft),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_book_visibility() {
        let draft = book(PublicationState::Draft);
        let public = book(PublicationState::Public);
        let stranger = user("stranger", UserRole::User);
        let friend = user("friend", UserRole::User);

        assert!(!can_see_book(None, &draft));
        assert!(!can_see_book(Some(&stranger), &draft));
        assert!(can_see_book(Some(&friend), &draft));
        assert!(can_see_book(None, &public));

        assert!(!can_see_drafts(Some(&friend), &draft));
        assert!(can_see_drafts(Some(&user("author", UserRole::User)), &draft));
    }

    #[test]
    fn test_progress_ownership() {
        assert!(ensure_self_or_admin(&user("reader", UserRole::User), "reader").is_ok());
        assert!(ensure_self_or_admin(&user("root", UserRole::Admin), "reader").is_ok());
        assert!(ensure_self_or_admin(&user("other", UserRole::User), "reader").is_err());
        assert!(ensure_admin(&user("reader", UserRole::User)).is_err());
    }
}
