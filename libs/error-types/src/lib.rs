use serde::{Deserialize, Serialize};

/// Uniform API error body returned by every chat endpoint and carried
/// inside WebSocket `error` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short HTTP reason phrase ("Not Found", "Unauthorized", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category used by clients for routing, see [`error_types`]
    pub error_type: String,

    /// Stable machine readable code, see [`error_codes`]
    pub code: String,

    /// Extra detail, only populated outside production
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Standard error codes
pub mod error_codes {
    // Credentials
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const IDENTITY_SUSPENDED: &str = "IDENTITY_SUSPENDED";

    // Conversations
    pub const IDENTITY_NOT_FOUND: &str = "IDENTITY_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const NOT_MESSAGE_RECEIVER: &str = "NOT_MESSAGE_RECEIVER";
    pub const FORBIDDEN_TOPIC: &str = "FORBIDDEN_TOPIC";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const MALFORMED_FRAME: &str = "MALFORMED_FRAME";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const CACHE_ERROR: &str = "CACHE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// Standard error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "identity not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::IDENTITY_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::IDENTITY_NOT_FOUND);
    }

    #[test]
    fn test_details_only_serialized_when_present() {
        let bare = ErrorResponse::new(
            "Forbidden",
            "not the receiver",
            403,
            error_types::AUTHORIZATION_ERROR,
            error_codes::NOT_MESSAGE_RECEIVER,
        );
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("details").is_none());

        let detailed = bare.with_details("message 42".to_string());
        let json = serde_json::to_value(&detailed).unwrap();
        assert_eq!(json["details"], "message 42");
    }
}
