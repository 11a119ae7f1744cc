use crate::errors::{ApiError, ErrorCode};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use person_store::{KeyValueRecord, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct KeyValueHandler {
    store: Arc<dyn Store>,
}

impl KeyValueHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        KeyValueHandler { store }
    }
}

pub fn routes(handler: KeyValueHandler) -> Router {
    Router::new()
        .route("/api/key-value", post(set_value))
        // An empty key never reaches `{key}`, answer it explicitly.
        .route("/api/key-value/", get(missing_key).delete(missing_key))
        .route("/api/key-value/{key}", get(get_value).delete(delete_value))
        .with_state(handler)
}

/// `null` fields count as empty.
#[derive(Deserialize, Debug)]
struct SetValueRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Serialize, Debug)]
struct KeyValueResponse {
    key: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<KeyValueRecord> for KeyValueResponse {
    fn from(record: KeyValueRecord) -> Self {
        KeyValueResponse {
            key: record.key,
            value: record.value,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Serialize, Debug)]
struct MessageResponse {
    message: &'static str,
}

fn key_param(key: Result<Path<String>, PathRejection>) -> Result<String, ApiError> {
    match key {
        Ok(Path(key)) if !key.is_empty() => Ok(key),
        _ => Err(missing_key_error()),
    }
}

fn missing_key_error() -> ApiError {
    ApiError::validation(ErrorCode::KvMissingKeyParam, "Key parameter is required")
}

async fn missing_key() -> ApiError {
    missing_key_error()
}

/// POST /api/key-value
async fn set_value(
    State(handler): State<KeyValueHandler>,
    body: Result<Json<SetValueRequest>, JsonRejection>,
) -> Result<Json<KeyValueResponse>, ApiError> {
    let Json(req) = body.map_err(|_| {
        ApiError::validation(ErrorCode::KvInvalidRequestBody, "Invalid request body")
    })?;
    let key = req.key.unwrap_or_default();
    let value = req.value.unwrap_or_default();

    if key.is_empty() || value.is_empty() {
        return Err(ApiError::validation(
            ErrorCode::KvMissingKeyOrValue,
            "Key and value are required",
        ));
    }

    handler
        .store
        .set_value(&key, &value)
        .await
        .map_err(|e| ApiError::internal(ErrorCode::KvFailedSetValue, "Failed to set value", e))?;

    // The write is committed at this point; a failed read-back is reported
    // separately from a failed write.
    let record = handler
        .store
        .get_value(&key)
        .await
        .map_err(|e| {
            ApiError::internal(ErrorCode::KvFailedRetrieveValue, "Failed to retrieve value", e)
        })?
        .ok_or_else(|| {
            ApiError::missing_row(ErrorCode::KvFailedRetrieveValue, "Failed to retrieve value")
        })?;

    Ok(Json(record.into()))
}

/// GET /api/key-value/{key}
async fn get_value(
    State(handler): State<KeyValueHandler>,
    key: Result<Path<String>, PathRejection>,
) -> Result<Json<KeyValueResponse>, ApiError> {
    let key = key_param(key)?;

    match handler.store.get_value(&key).await {
        Ok(Some(record)) => Ok(Json(record.into())),
        Ok(None) => Err(ApiError::not_found(ErrorCode::KvKeyNotFound, "Key not found")),
        Err(e) => Err(ApiError::internal(
            ErrorCode::KvFailedRetrieveValue,
            "Failed to retrieve value",
            e,
        )),
    }
}

/// DELETE /api/key-value/{key}
///
/// Succeeds whether or not the key existed.
async fn delete_value(
    State(handler): State<KeyValueHandler>,
    key: Result<Path<String>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key = key_param(key)?;

    handler.store.delete_value(&key).await.map_err(|e| {
        ApiError::internal(ErrorCode::KvFailedDeleteValue, "Failed to delete value", e)
    })?;

    Ok(Json(MessageResponse {
        message: "Key deleted successfully",
    }))
}
