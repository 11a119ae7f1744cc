use crate::errors::{ApiError, ErrorCode};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use person_store::Store;
use serde::Serialize;
use std::sync::Arc;

pub fn routes(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(store)
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    status: &'static str,
}

/// GET /health
///
/// The store error is logged but not echoed to the client.
async fn health_check(State(store): State<Arc<dyn Store>>) -> Result<Json<HealthResponse>, ApiError> {
    store.ping().await.map_err(|e| {
        ApiError::internal(ErrorCode::HealthCheckFailed, "Health check failed", e)
    })?;

    Ok(Json(HealthResponse { status: "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{empty_request, error_code, send};
    use http::{Method, StatusCode};
    use person_store::{MemoryStore, Operation};

    #[tokio::test]
    async fn test_health_check() {
        let store = Arc::new(MemoryStore::new());
        let app = routes(store.clone());

        let (status, body) = send(&app, empty_request(Method::GET, "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "healthy" }));

        store.fail(Operation::Ping);
        let (status, body) = send(&app, empty_request(Method::GET, "/health")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_code(&body), "HC_001_HEALTH_CHECK_FAILED");
        assert_eq!(body["message"], "Health check failed");
    }
}
