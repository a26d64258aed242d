//! Error types for the spatial view query layer

use thiserror::Error;

/// Result type alias for spatial query operations
pub type Result<T> = std::result::Result<T, SpatialError>;

/// Methods accepted on the spatial query path, as sent in the `Allow` header
pub const ALLOWED_METHODS: &str = "GET,HEAD";

/// Error types that can occur while answering a spatial query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpatialError {
    #[error("{0}")]
    QueryParse(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Only {} allowed", ALLOWED_METHODS)]
    MethodNotAllowed,

    #[error("Engine failure: {0}")]
    EngineFailure(String),

    #[error("Client disconnected before the response was complete")]
    ClientDisconnected,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for SpatialError {
    fn from(err: std::io::Error) -> Self {
        SpatialError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SpatialError {
    fn from(err: serde_json::Error) -> Self {
        SpatialError::InternalError(format!("JSON encoding failed: {}", err))
    }
}

impl From<http::Error> for SpatialError {
    fn from(err: http::Error) -> Self {
        SpatialError::HttpError(err.to_string())
    }
}

impl SpatialError {
    /// Convert error to HTTP status code
    ///
    /// - Parameter validation errors: 400 Bad Request
    /// - Missing design document or index: 404 Not Found
    /// - Non-GET methods: 405 Method Not Allowed
    /// - Client disconnects: 499 (only ever logged, no response is possible)
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            SpatialError::QueryParse(_) => 400,
            SpatialError::NotFound(_) => 404,
            SpatialError::MethodNotAllowed => 405,
            SpatialError::ClientDisconnected => 499,
            SpatialError::EngineFailure(_) => 500,
            SpatialError::ConfigError(_) => 500,
            SpatialError::IoError(_) => 500,
            SpatialError::HttpError(_) => 500,
            SpatialError::InternalError(_) => 500,
        }
    }

    /// Short machine-readable name used as the `error` field of JSON error bodies
    pub fn error_name(&self) -> &'static str {
        match self {
            SpatialError::QueryParse(_) => "query_parse_error",
            SpatialError::NotFound(_) => "not_found",
            SpatialError::MethodNotAllowed => "method_not_allowed",
            SpatialError::EngineFailure(_) => "engine_failure",
            SpatialError::ClientDisconnected => "client_disconnected",
            SpatialError::ConfigError(_)
            | SpatialError::IoError(_)
            | SpatialError::HttpError(_)
            | SpatialError::InternalError(_) => "internal_error",
        }
    }

    /// Whether the request itself was at fault (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.to_http_status())
    }

    /// Create a query parse error
    pub fn query_parse(message: impl Into<String>) -> Self {
        SpatialError::QueryParse(message.into())
    }

    /// Create an engine failure
    pub fn engine(message: impl Into<String>) -> Self {
        SpatialError::EngineFailure(message.into())
    }

    /// JSON error body, `{"error":"<name>","reason":"<message>"}`
    pub fn to_json_body(&self) -> String {
        serde_json::json!({
            "error": self.error_name(),
            "reason": self.to_string(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parse_message_is_verbatim() {
        let err = SpatialError::query_parse("stale only available as stale=ok");
        assert_eq!(err.to_string(), "stale only available as stale=ok");
        assert_eq!(err.to_http_status(), 400);
        assert_eq!(err.error_name(), "query_parse_error");
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let err = SpatialError::MethodNotAllowed;
        assert_eq!(err.to_http_status(), 405);
        assert!(err.to_string().contains("GET,HEAD"));
    }

    #[test]
    fn test_json_body_shape() {
        let err = SpatialError::NotFound("missing_named_index".to_string());
        let body: serde_json::Value = serde_json::from_str(&err.to_json_body()).unwrap();
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["reason"], "missing_named_index");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: SpatialError = io.into();
        assert!(matches!(err, SpatialError::IoError(_)));
        assert!(!err.is_client_error());
    }
}
