use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{AppError, AppResult};

const MAX_BARCODE_LENGTH: usize = 64;

/// An Axum middleware that validates incoming requests for common security issues.
///
/// Rejects path traversal in the URI and oversized bodies, logs suspicious user agents.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Path traversal detected in request",
                "error": { "code": "INVALID_PATH" },
                "status": 400,
            })),
        )
            .into_response();
    }

    if let Some(user_agent) = req.headers().get("user-agent") {
        if let Ok(ua_str) = user_agent.to_str() {
            if is_suspicious_user_agent(ua_str) {
                tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua_str));
            }
        }
    }

    // Early rejection, DefaultBodyLimit still applies afterwards
    if matches!(req.method(), &axum::http::Method::POST | &axum::http::Method::PUT | &axum::http::Method::PATCH) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(length) = length {
            let max_body_size = max_body_size();
            if length > max_body_size {
                return (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    Json(json!({
                        "success": false,
                        "message": format!("Request body exceeds maximum size of {} bytes", max_body_size),
                        "error": { "code": "PAYLOAD_TOO_LARGE" },
                        "status": 413,
                    })),
                )
                    .into_response();
            }
        }
    }

    next.run(req).await
}

/// Body limit in bytes, `SCANDY_MAX_BODY_SIZE` clamped to 64 KiB..=10 MiB (default 1 MiB).
pub fn max_body_size() -> usize {
    std::env::var("SCANDY_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1024 * 1024)
        .clamp(64 * 1024, 10 * 1024 * 1024)
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }

    let encoded_patterns = ["%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%5c%2e", "%00"];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
}

/// Trims a barcode and checks it for emptiness, length and allowed characters.
///
/// Allowed are ASCII letters, digits and `-`, `_`, `.` (barcodes appear in URL paths).
/// A leading `.` is refused so that no path segment reads as `.` or `..`.
pub fn validate_barcode(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: "Barcode darf nicht leer sein".to_string(),
        });
    }
    if trimmed.len() > MAX_BARCODE_LENGTH {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Barcode darf höchstens {} Zeichen lang sein", MAX_BARCODE_LENGTH),
        });
    }
    if let Some(c) = trimmed.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))) {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Barcode enthält ungültiges Zeichen '{}'", c.escape_default()),
        });
    }
    if trimmed.starts_with('.') {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: "Barcode darf nicht mit '.' beginnen".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Trims a required text field and enforces a maximum length in characters.
pub fn require_text(field: &str, value: &str, max_len: usize) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: "Feld darf nicht leer sein".to_string(),
        });
    }
    if trimmed.chars().count() > max_len {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Feld darf höchstens {} Zeichen lang sein", max_len),
        });
    }
    Ok(trimmed.to_string())
}

/// Trims an optional field; blank strings (as sent by HTML forms) become `None`.
pub fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn validate_non_negative(field: &str, value: i64) -> AppResult<i64> {
    if value < 0 {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Wert darf nicht negativ sein, erhalten {}", value),
        });
    }
    Ok(value)
}

/// Removes control characters and limits the length for log output.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("/tools/../admin"));
        assert!(contains_path_traversal("/tools/%2e%2e/admin"));
        assert!(contains_path_traversal("/tools/a\0b"));

        assert!(!contains_path_traversal("/tools/T-0001"));
        assert!(!contains_path_traversal("/lendings"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("nikto/2.1.5"));
        assert!(is_suspicious_user_agent("sqlmap/1.0"));
        assert!(!is_suspicious_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
        assert!(!is_suspicious_user_agent("Googlebot/2.1 crawler"));
    }

    #[test]
    fn test_barcode_validation() {
        assert_eq!(validate_barcode("barcode", "  T-0001 ").unwrap(), "T-0001");
        assert!(validate_barcode("barcode", "W_12.34").is_ok());
        assert!(validate_barcode("barcode", "W/12").is_err());

        assert!(validate_barcode("barcode", "   ").is_err());
        assert!(validate_barcode("barcode", "T 0001").is_err());
        assert!(validate_barcode("barcode", "Tür").is_err());
        assert!(validate_barcode("barcode", &"1".repeat(65)).is_err());
    }

    #[test]
    fn test_barcode_leading_dot_rejected() {
        for value in ["..A", ".T1", ".", " ..A"] {
            match validate_barcode("barcode", value) {
                Err(AppError::ValidationError { field, message }) => {
                    assert_eq!(field, "barcode");
                    assert!(message.contains("'.'"));
                }
                other => panic!("{:?} accepted: {:?}", value, other),
            }
        }
        assert_eq!(validate_barcode("barcode", "T1..2").unwrap(), "T1..2");
    }

    #[test]
    fn test_barcode_error_names_field() {
        match validate_barcode("tool_barcode", "") {
            Err(AppError::ValidationError { field, .. }) => assert_eq!(field, "tool_barcode"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_text_helpers() {
        assert!(require_text("name", " Akkuschrauber ", 10).unwrap_err().to_string().contains("'name'"));
        assert_eq!(require_text("name", " Hammer ", 10).unwrap(), "Hammer");
        assert!(require_text("name", "", 10).is_err());

        assert_eq!(optional_text(Some("  ")), None);
        assert_eq!(optional_text(Some(" Halle 2 ")), Some("Halle 2".to_string()));
        assert_eq!(optional_text(None), None);
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(validate_non_negative("quantity", 0).unwrap(), 0);
        assert!(validate_non_negative("quantity", -1).is_err());
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("normal text"), "normal text");
        let sanitized = sanitize_for_logging("text\x00with\x01control");
        assert!(!sanitized.contains('\x00'));
        assert!(!sanitized.contains('\x01'));
        assert_eq!(sanitize_for_logging(&"a".repeat(300)).len(), 200);
    }
}
