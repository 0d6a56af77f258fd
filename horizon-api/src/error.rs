use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use horizon_booking::BookingError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Forbidden(String),
    Booking(BookingError),
    Anyhow(anyhow::Error),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        Self::Booking(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, retryable) = match self {
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, false),
            AppError::Booking(err) => {
                let retryable = err.is_retryable();
                let status = match &err {
                    BookingError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    BookingError::IdentityMismatch { .. } => StatusCode::FORBIDDEN,
                    BookingError::InvalidDraft(_) => StatusCode::BAD_REQUEST,
                    BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                    BookingError::CommitFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Internal Server Error: {}", err);
                    (status, "Internal Server Error".to_string(), retryable)
                } else {
                    (status, err.to_string(), retryable)
                }
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    false,
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}
