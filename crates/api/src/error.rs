//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;
use item_store::StoreError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Inventory engine error.
    Inventory(InventoryError),
    /// Saga error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    match &err {
        InventoryError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        InventoryError::InsufficientStock { .. } => (StatusCode::CONFLICT, err.to_string()),
        InventoryError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        InventoryError::Store(store_err) => store_error_to_response(store_err),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::Inventory(inner) => inventory_error_to_response(inner),
        SagaError::Store(ref store_err) => store_error_to_response(store_err),
        SagaError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "saga error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn store_error_to_response(err: &StoreError) -> (StatusCode, String) {
    if err.is_transient() {
        tracing::warn!(error = %err, "store unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    } else {
        tracing::error!(error = %err, "store error");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::VariantId;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn inventory_errors_map_to_statuses() {
        assert_eq!(
            status_of(InventoryError::Validation("bad".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                InventoryError::InsufficientStock {
                    variant_id: VariantId::new(),
                    requested: 2,
                    available: 1,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(InventoryError::Store(StoreError::Unavailable("down".into())).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(InventoryError::Store(StoreError::InvalidData("x".into())).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn saga_errors_map_to_statuses() {
        assert_eq!(
            status_of(SagaError::InProgress("k".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(SagaError::Validation("bad".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }
}
