use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// API错误类型
pub enum AppError {
    NotFound(String),
    Unauthorized,
    Internal(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {what}")).into_response(),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
            Self::Internal(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {e}")).into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
