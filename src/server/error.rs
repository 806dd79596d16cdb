use askama::Template;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

pub const DB_ERROR_MESSAGE: &str =
    "Возникла ошибка при подключении к базе данных. Повторите попытку позже.";

#[derive(Debug)]
pub enum ApiError {
    DataBaseError(sqlx::Error),
    NotFound,
    /// Login required; `next` is where to come back after logging in.
    Unauthorized {
        next: String,
    },
    Validation(String),
    Internal(anyhow::Error),
}

pub type ApiResponse<T> = Result<T, ApiError>;

impl ApiError {
    pub fn unauthorized(next: impl Into<String>) -> Self {
        ApiError::Unauthorized { next: next.into() }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPage<'a> {
    message: &'a str,
}

fn error_page(status: StatusCode, message: &str) -> Response {
    match (ErrorPage { message }).render() {
        Ok(body) => (status, Html(body)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render error page: {e}");
            (status, message.to_owned()).into_response()
        }
    }
}

pub fn login_location(next: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    format!("/login?{query}")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::DataBaseError(sqlx::Error::RowNotFound) | ApiError::NotFound => {
                error_page(StatusCode::NOT_FOUND, "Страница не найдена")
            }
            ApiError::DataBaseError(error) => {
                tracing::error!("Database error: {error}");
                error_page(StatusCode::INTERNAL_SERVER_ERROR, DB_ERROR_MESSAGE)
            }
            ApiError::Unauthorized { next } => (
                StatusCode::FOUND,
                [(header::LOCATION, login_location(&next))],
            )
                .into_response(),
            ApiError::Validation(message) => error_page(StatusCode::BAD_REQUEST, &message),
            ApiError::Internal(error) => {
                tracing::error!("Internal error: {error:#}");
                error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Внутренняя ошибка сервера. Повторите попытку позже.",
                )
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> ApiError {
        ApiError::DataBaseError(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> ApiError {
        match error.downcast::<sqlx::Error>() {
            Ok(db_error) => ApiError::DataBaseError(db_error),
            Err(error) => ApiError::Internal(error),
        }
    }
}

impl From<tower_sessions::session::Error> for ApiError {
    fn from(error: tower_sessions::session::Error) -> ApiError {
        ApiError::Internal(error.into())
    }
}

impl From<askama::Error> for ApiError {
    fn from(error: askama::Error) -> ApiError {
        ApiError::Internal(error.into())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> ApiError {
        ApiError::Internal(error.into())
    }
}
