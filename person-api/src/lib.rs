//! HTTP surface of the person service.
//!
//! `/health` and `/api/key-value` are open. Everything under `/persons`
//! requires an `x-api-key` header accepted by the [`ApiKeyGate`].
pub mod api_key;
pub mod errors;
pub mod health;
pub mod key_value;
pub mod metrics_defs;
pub mod person_attributes;
pub mod telemetry;

#[cfg(test)]
mod testutils;

pub use api_key::{ApiKeyGate, CredentialSlot};
pub use errors::{ApiError, ErrorCode};

use axum::{Router, middleware};
use key_value::KeyValueHandler;
use person_attributes::PersonAttributes;
use person_store::{EncryptionContext, Store};
use std::sync::Arc;

pub fn router(store: Arc<dyn Store>, encryption: EncryptionContext, gate: ApiKeyGate) -> Router {
    let persons = person_attributes::routes(PersonAttributes::new(store.clone(), encryption))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(gate),
            api_key::require_api_key,
        ));

    Router::new()
        .merge(health::routes(store.clone()))
        .merge(key_value::routes(KeyValueHandler::new(store)))
        .merge(persons)
        .layer(middleware::from_fn(telemetry::track_request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{empty_request, error_code, json_request, send};
    use http::{Method, Request, StatusCode};
    use person_store::MemoryStore;
    use serde_json::json;

    const KEY: &str = "person-service-key-0f1e2d3c-4b5a-6978-8a9b-acbdcedf0011";

    fn app(store: Arc<MemoryStore>, key: Option<&str>) -> Router {
        router(
            store,
            EncryptionContext::new("router-test-key", 1),
            ApiKeyGate::new(vec![
                CredentialSlot::new("blue", key.map(String::from)),
                CredentialSlot::new("green", None),
            ]),
        )
    }

    fn with_key(method: Method, uri: &str, body: &str) -> Request<axum::body::Body> {
        let mut request = json_request(method, uri, body);
        request
            .headers_mut()
            .insert(api_key::API_KEY_HEADER, KEY.parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_open_routes_need_no_key() {
        let app = app(Arc::new(MemoryStore::new()), Some(KEY));

        let (status, _) = send(&app, empty_request(Method::GET, "/health")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/api/key-value", r#"{"key":"a","value":"b"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_person_routes_require_key() {
        let store = Arc::new(MemoryStore::new());
        let person = store.insert_person("client-1");
        let app = app(store, Some(KEY));
        let uri = format!("/persons/{person}/attributes");

        let (status, body) = send(&app, empty_request(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "API_001_MISSING_API_KEY");
        assert_eq!(body["message"], "Missing required header \"x-api-key\"");

        let mut request = empty_request(Method::GET, &uri);
        request
            .headers_mut()
            .insert(api_key::API_KEY_HEADER, "wrong".parse().unwrap());
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "API_002_INVALID_API_KEY_FORMAT");

        let (status, body) = send(&app, with_key(Method::GET, &uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_unconfigured_keys() {
        let store = Arc::new(MemoryStore::new());
        let person = store.insert_person("client-1");
        let app = app(store, None);

        let (status, body) = send(
            &app,
            with_key(Method::GET, &format!("/persons/{person}/attributes"), ""),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_code(&body), "API_003_KEYS_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_attribute_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let person = store.insert_person("client-1");
        let app = app(store.clone(), Some(KEY));
        let collection = format!("/persons/{person}/attributes");

        let (status, created) = send(
            &app,
            with_key(
                Method::POST,
                &collection,
                r#"{"key":"email","value":"john@example.com","meta":{"caller":"crm","reason":"onboarding","traceId":"abc-123"}}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["key"], "email");
        assert_eq!(store.request_logs().len(), 1);

        let item = format!("{collection}/{}", created["id"]);
        let (status, updated) = send(
            &app,
            with_key(Method::PUT, &item, r#"{"key":"work_email","value":"j@corp.com"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["key"], "work_email");

        let (status, list) = send(&app, with_key(Method::GET, &collection, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["value"], "j@corp.com");

        let item = format!("{collection}/{}", updated["id"]);
        let (status, _) = send(&app, with_key(Method::DELETE, &item, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.count_attributes(person), 0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = app(Arc::new(MemoryStore::new()), Some(KEY));
        let (status, _) = send(&app, empty_request(Method::GET, "/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Unknown paths under /persons are not answered by the key check.
        let (status, _) = send(&app, empty_request(Method::GET, "/persons")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
