//! Login state kept in the session store.

use anyhow::anyhow;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sqlx::SqlitePool;
use tower_sessions::{Expiry, Session};

use crate::db::queries::users::get_user;
use crate::db::User;

use super::error::ApiError;

pub const USER_ID_KEY: &str = "user_id";
pub const REMEMBER_ME_DAYS: i64 = 30;

/// The logged-in user, if any. Stale ids (user gone) are dropped from the session.
pub struct CurrentUser(pub Option<User>);

impl CurrentUser {
    /// The user, or a redirect to the login page that comes back to `next`.
    pub fn require(self, next: impl Into<String>) -> Result<User, ApiError> {
        self.0.ok_or_else(|| ApiError::unauthorized(next))
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    SqlitePool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| ApiError::Internal(anyhow!(message)))?;
        let Some(user_id) = session.get::<i64>(USER_ID_KEY).await? else {
            return Ok(CurrentUser(None));
        };
        let pool = SqlitePool::from_ref(state);
        match get_user(&pool, user_id).await {
            Ok(user) => Ok(CurrentUser(Some(user))),
            Err(sqlx::Error::RowNotFound) => {
                tracing::warn!(user_id, "Session refers to a missing user");
                session.remove::<i64>(USER_ID_KEY).await?;
                Ok(CurrentUser(None))
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub async fn login(session: &Session, user_id: i64, remember_me: bool) -> Result<(), ApiError> {
    session.cycle_id().await?;
    session.insert(USER_ID_KEY, user_id).await?;
    if remember_me {
        session.set_expiry(Some(Expiry::OnInactivity(time::Duration::days(
            REMEMBER_ME_DAYS,
        ))));
    } else {
        session.set_expiry(Some(Expiry::OnSessionEnd));
    }
    Ok(())
}

pub async fn logout(session: &Session) -> Result<(), ApiError> {
    session.flush().await?;
    Ok(())
}

/// Only same-site absolute paths are followed after login.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path
        }
        _ => "/",
    }
}
