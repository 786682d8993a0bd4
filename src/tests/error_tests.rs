#[cfg(test)]
mod tests {
    use crate::error::{AppError, AppResult, OptionExt};
    use crate::lending::LendingError;
    use crate::tests::body_json;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_app_error_display() {
        let error = AppError::BadRequest("Invalid input".to_string());
        assert_eq!(format!("{}", error), "Bad request: Invalid input");

        let error = AppError::RateLimited { retry_after_seconds: 60 };
        assert_eq!(format!("{}", error), "Rate limited. Retry after 60 seconds");

        let error = AppError::ValidationError { field: "barcode".to_string(), message: "leer".to_string() };
        assert_eq!(format!("{}", error), "Validation error on field 'barcode': leer");
    }

    #[test]
    fn test_app_error_status_codes() {
        let cases = [
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::RateLimited { retry_after_seconds: 30 }, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = AppError::Conflict("Werkzeug T1 ist bereits ausgeliehen".to_string()).into_response();
        let body = body_json(response).await;

        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Werkzeug T1 ist bereits ausgeliehen");
        assert_eq!(body["error"]["code"], "CONFLICT");
        assert_eq!(body["status"], 409);
        assert!(body["timestamp"].is_string());
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let response = AppError::Internal(anyhow::anyhow!("secret connection string")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("secret"));
        assert!(body["error"]["details"]["error_id"].is_string());
    }

    #[tokio::test]
    async fn test_rate_limited_details() {
        let body = body_json(AppError::RateLimited { retry_after_seconds: 12 }.into_response()).await;
        assert_eq!(body["error"]["details"]["retry_after_seconds"], 12);
    }

    #[test]
    fn test_lending_error_mapping() {
        let not_found: AppError = LendingError::ToolNotFound("T9".into()).into();
        assert!(matches!(not_found, AppError::NotFound(ref m) if m.contains("T9")));

        let conflict: AppError = LendingError::AlreadyLent {
            tool_barcode: "T1".into(),
            holder_name: "Anna Schmidt".into(),
            holder_barcode: "W1".into(),
        }
        .into();
        assert!(matches!(conflict, AppError::Conflict(ref m) if m.contains("Anna Schmidt")));

        let stock: AppError =
            LendingError::InsufficientStock { barcode: "C1".into(), available: 1, requested: 5 }.into();
        assert!(matches!(stock, AppError::Conflict(_)));

        let quantity: AppError = LendingError::InvalidQuantity(0).into();
        assert!(matches!(quantity, AppError::ValidationError { ref field, .. } if field == "quantity"));

        let db: AppError = LendingError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(db, AppError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_rejection_classification() {
        assert!(LendingError::NoOpenLending("T1".into()).is_rejection());
        assert!(!LendingError::Database(sqlx::Error::PoolTimedOut).is_rejection());
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let error: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("Werkzeug").unwrap(), 42);

        let none: Option<i32> = None;
        let result: AppResult<i32> = none.ok_or_not_found("Werkzeug");
        match result {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Werkzeug nicht gefunden"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
