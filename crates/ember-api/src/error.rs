use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use ember_db::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Route-layer errors: domain errors bubbling up from the store plus the
/// faults only the HTTP surface can detect.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid or missing credentials")]
    Unauthorized,

    #[error("account is deactivated")]
    AccountDeactivated,

    #[error("invalid Telegram data")]
    InvalidTelegramData,

    #[error("profile incomplete")]
    ProfileIncomplete(Vec<&'static str>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidTelegramData | Self::ProfileIncomplete(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized | Self::AccountDeactivated => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(e) => match e {
                StoreError::SelfSwipe
                | StoreError::DuplicateSwipe
                | StoreError::SelfMessage
                | StoreError::EmptyContent
                | StoreError::ContentTooLong
                | StoreError::InvalidReplyTarget => StatusCode::BAD_REQUEST,

                // The caller's view of match state is stale; the client
                // reacts by re-fetching matches.
                StoreError::NotMatched => StatusCode::FORBIDDEN,

                StoreError::TargetNotFound
                | StoreError::TargetInactive
                | StoreError::MatchNotFound
                | StoreError::MessageNotFound
                | StoreError::NotMessageOwner
                | StoreError::UserNotFound
                | StoreError::PhotoNotFound => StatusCode::NOT_FOUND,

                StoreError::Storage(_) | StoreError::Encoding(_) | StoreError::LockPoisoned => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the detail, never echo it to the client.
            error!("internal error: {self}");
            return (
                status,
                Json(json!({ "message": "Internal server error" })),
            )
                .into_response();
        }

        let body = match &self {
            Self::ProfileIncomplete(missing) => json!({
                "message": "Profile incomplete",
                "missingFields": missing,
                "completeProfile": false,
            }),
            _ => json!({ "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_expected_statuses() {
        let cases = [
            (ApiError::from(StoreError::DuplicateSwipe), StatusCode::BAD_REQUEST),
            (ApiError::from(StoreError::NotMatched), StatusCode::FORBIDDEN),
            (ApiError::from(StoreError::TargetNotFound), StatusCode::NOT_FOUND),
            (ApiError::from(StoreError::NotMessageOwner), StatusCode::NOT_FOUND),
            (ApiError::from(StoreError::LockPoisoned), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{err}");
        }
    }
}
