use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Precondition(String),

    /// Voter-role principal attempted to vote without a minted token.
    /// Carries the machine-readable code `NO_TOKEN` in the response body.
    #[error("No valid voting token found. Please contact admin to mint a token for you.")]
    NoToken,

    #[error("{0}")]
    External(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn code(&self) -> Option<&'static str> {
        match self {
            AppError::NoToken => Some("NO_TOKEN"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation(_) | AppError::Precondition(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) | AppError::NoToken => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::External(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "message": self.to_string() });
        if let Some(code) = self.code() {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if is_unique_violation(&e) {
            return AppError::Conflict("Resource already exists".into());
        }
        AppError::Internal(e.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(e.to_string())
    }
}

pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_token_carries_machine_code() {
        assert_eq!(AppError::NoToken.code(), Some("NO_TOKEN"));
        assert_eq!(
            AppError::NoToken.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (AppError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (AppError::Precondition("p".into()), StatusCode::BAD_REQUEST),
            (AppError::Authentication("a".into()), StatusCode::UNAUTHORIZED),
            (AppError::Authorization("a".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("c".into()), StatusCode::CONFLICT),
            (AppError::External("e".into()), StatusCode::BAD_GATEWAY),
            (
                AppError::Internal("i".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
