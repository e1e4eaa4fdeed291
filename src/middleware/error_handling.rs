use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to the shared API error body
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Suspended => (kinds::AUTHORIZATION_ERROR, error_codes::IDENTITY_SUSPENDED),
        AppError::NotMessageReceiver(_) => {
            (kinds::AUTHORIZATION_ERROR, error_codes::NOT_MESSAGE_RECEIVER)
        }
        AppError::MessageNotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND),
        AppError::IdentityNotFound(_) => {
            (kinds::NOT_FOUND_ERROR, error_codes::IDENTITY_NOT_FOUND)
        }
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Redis(_) => (kinds::SERVER_ERROR, error_codes::CACHE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Storage failures are logged in full but never echoed to clients
    let message = match err {
        AppError::Database(_) | AppError::Redis(_) => {
            tracing::error!(error = %err, "request failed on storage");
            "storage unavailable".to_string()
        }
        _ => err.to_string(),
    };

    let mut response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );
    if cfg!(debug_assertions) && matches!(err, AppError::Database(_) | AppError::Redis(_)) {
        response = response.with_details(err.to_string());
    }

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}
