//! Encrypted key/value attributes attached to a person.
//!
//! Collection routes (`/persons/{person_id}/attributes`) answer a malformed
//! person id with 404, while single-attribute routes answer it with 400.
//! Clients rely on both, so the two are kept distinct.
use crate::errors::{ApiError, ErrorCode};
use crate::metrics_defs::AUDIT_LOG_FAILURES;
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode, header};
use person_store::{EncryptionContext, PersonAttribute, RequestLogEntry, Store};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct PersonAttributes {
    store: Arc<dyn Store>,
    encryption: Arc<EncryptionContext>,
}

pub fn routes(handler: PersonAttributes) -> Router {
    Router::new()
        .route(
            "/persons/{person_id}/attributes",
            post(create_attribute)
                .put(create_attribute)
                .get(list_attributes),
        )
        .route(
            "/persons/{person_id}/attributes/{attribute_id}",
            get(get_attribute)
                .put(update_attribute)
                .delete(delete_attribute),
        )
        .with_state(handler)
}

/// Who made a mutating request and why. Only audited when `traceId` is set.
#[derive(Deserialize, Debug)]
struct Meta {
    #[serde(default)]
    caller: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, rename = "traceId")]
    trace_id: Option<String>,
}

// A JSON `null` reads the same as an absent or empty string.
#[derive(Deserialize, Debug)]
struct CreateAttributeRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    meta: Option<Meta>,
}

/// Every field is optional and an empty body is accepted. An empty `key`
/// keeps the stored key.
#[derive(Deserialize, Debug, Default)]
struct UpdateAttributeRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AttributeResponse {
    id: i32,
    key: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PersonAttribute> for AttributeResponse {
    fn from(attr: PersonAttribute) -> Self {
        AttributeResponse {
            id: attr.id,
            key: attr.key,
            value: attr.value,
            created_at: attr.created_at,
            updated_at: attr.updated_at,
        }
    }
}

#[derive(Serialize, Debug)]
struct MessageResponse {
    message: &'static str,
}

/// Accepts the hyphenated (36 chars) and plain hex (32 chars) forms only.
/// Braced and `urn:uuid:` forms are rejected.
fn parse_person_id(raw: &str) -> Option<Uuid> {
    match raw.len() {
        32 | 36 => Uuid::parse_str(raw).ok(),
        _ => None,
    }
}

/// Person id of a collection route. Malformed ids read as "no such person".
fn collection_person_id(raw: Result<Path<String>, PathRejection>) -> Result<Uuid, ApiError> {
    raw.ok()
        .and_then(|Path(raw)| parse_person_id(&raw))
        .ok_or_else(|| ApiError::not_found(ErrorCode::InvalidPersonId, "Person not found"))
}

fn item_ids(raw: Result<Path<(String, String)>, PathRejection>) -> Result<(Uuid, i32), ApiError> {
    let Ok(Path((person_id, attribute_id))) = raw else {
        return Err(ApiError::validation(
            ErrorCode::InvalidPersonId,
            "Invalid person ID format",
        ));
    };

    let person_id = parse_person_id(&person_id).ok_or_else(|| {
        ApiError::validation(ErrorCode::InvalidPersonId, "Invalid person ID format")
    })?;
    let attribute_id = attribute_id.parse::<i32>().map_err(|_| {
        ApiError::validation(
            ErrorCode::InvalidAttributeIdFormat,
            "Invalid attribute ID format",
        )
    })?;

    Ok((person_id, attribute_id))
}

fn invalid_body(_: JsonRejection) -> ApiError {
    invalid_body_error()
}

fn invalid_body_error() -> ApiError {
    ApiError::validation(ErrorCode::InvalidRequestBody, "Invalid request body")
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Update body. A request without a body binds as if every field were empty.
fn update_request(
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<UpdateAttributeRequest, ApiError> {
    let body = body.map_err(|_| invalid_body_error())?;
    if body.is_empty() {
        return Ok(UpdateAttributeRequest::default());
    }
    if !is_json_content_type(headers) {
        return Err(invalid_body_error());
    }
    let Json(req) = Json::from_bytes(&body).map_err(invalid_body)?;
    Ok(req)
}

impl PersonAttributes {
    pub fn new(store: Arc<dyn Store>, encryption: EncryptionContext) -> Self {
        PersonAttributes {
            store,
            encryption: Arc::new(encryption),
        }
    }

    async fn verify_person(
        &self,
        person_id: Uuid,
        not_found_message: &'static str,
    ) -> Result<(), ApiError> {
        match self.store.get_person(person_id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ApiError::not_found(
                ErrorCode::PersonNotFound,
                not_found_message,
            )),
            Err(e) => Err(ApiError::internal(
                ErrorCode::FailedVerifyPerson,
                "Failed to verify person",
                e,
            )),
        }
    }

    async fn find_attribute(
        &self,
        person_id: Uuid,
        attribute_id: i32,
    ) -> Result<PersonAttribute, ApiError> {
        self.store
            .get_attribute_by_id(person_id, attribute_id, self.encryption.key())
            .await
            .map_err(|e| {
                ApiError::internal(
                    ErrorCode::FailedRetrieveAttributes,
                    "Failed to retrieve attributes",
                    e,
                )
            })?
            .ok_or_else(|| ApiError::not_found(ErrorCode::AttributeNotFound, "Attribute not found"))
    }

    /// Writes an audit record for a mutation when the caller sent a trace id.
    ///
    /// Never fails the request: errors are logged and counted.
    async fn audit(&self, meta: Option<&Meta>, key: &str, value: &str) {
        let Some(meta) = meta else {
            return;
        };
        let Some(trace_id) = meta.trace_id.as_deref().filter(|id| !id.is_empty()) else {
            return;
        };

        let request_body = serde_json::json!({ "key": key, "value": value }).to_string();
        let entry = RequestLogEntry {
            trace_id,
            caller: meta.caller.as_deref().unwrap_or_default(),
            reason: meta.reason.as_deref().unwrap_or_default(),
            request_body: &request_body,
            response_body: "",
        };

        if let Err(e) = self.store.insert_request_log(&entry, &self.encryption).await {
            counter!(AUDIT_LOG_FAILURES).increment(1);
            tracing::warn!(
                error = %e,
                error_code = %ErrorCode::FailedAuditLog,
                trace_id,
                "failed to write audit log"
            );
        }
    }
}

/// POST|PUT /persons/{person_id}/attributes
async fn create_attribute(
    State(handler): State<PersonAttributes>,
    person_id: Result<Path<String>, PathRejection>,
    body: Result<Json<CreateAttributeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AttributeResponse>), ApiError> {
    let person_id = collection_person_id(person_id)?;
    let Json(req) = body.map_err(invalid_body)?;
    let key = req.key.unwrap_or_default();
    let value = req.value.unwrap_or_default();

    if key.is_empty() {
        return Err(ApiError::validation(ErrorCode::MissingKey, "Key is required"));
    }
    let Some(meta) = req.meta.as_ref() else {
        return Err(ApiError::validation(
            ErrorCode::MissingMeta,
            "Missing required field \"meta\"",
        ));
    };

    handler.verify_person(person_id, "Person not found").await?;

    handler
        .store
        .upsert_attribute(person_id, &key, &value, &handler.encryption)
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedCreateAttribute,
                "Failed to create attribute",
                e,
            )
        })?;

    handler.audit(Some(meta), &key, &value).await;

    let attribute = handler
        .store
        .get_attribute(person_id, &key, handler.encryption.key())
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedRetrieveAttribute,
                "Failed to retrieve attribute",
                e,
            )
        })?
        .ok_or_else(|| {
            ApiError::missing_row(
                ErrorCode::FailedRetrieveAttribute,
                "Failed to retrieve attribute",
            )
        })?;

    Ok((StatusCode::CREATED, Json(attribute.into())))
}

/// GET /persons/{person_id}/attributes
async fn list_attributes(
    State(handler): State<PersonAttributes>,
    person_id: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<AttributeResponse>>, ApiError> {
    let person_id = collection_person_id(person_id)?;
    handler.verify_person(person_id, "Person not found").await?;

    let attributes = handler
        .store
        .list_attributes(person_id, handler.encryption.key())
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedRetrieveAttributes,
                "Failed to retrieve attributes",
                e,
            )
        })?;

    Ok(Json(attributes.into_iter().map(Into::into).collect()))
}

/// GET /persons/{person_id}/attributes/{attribute_id}
async fn get_attribute(
    State(handler): State<PersonAttributes>,
    ids: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<AttributeResponse>, ApiError> {
    let (person_id, attribute_id) = item_ids(ids)?;
    handler.verify_person(person_id, "Person not found").await?;

    let attribute = handler.find_attribute(person_id, attribute_id).await?;
    Ok(Json(attribute.into()))
}

/// PUT /persons/{person_id}/attributes/{attribute_id}
///
/// A new key is applied by deleting the old row and upserting under the new
/// key. The two steps are not atomic: a failed upsert after a successful
/// delete loses the attribute.
async fn update_attribute(
    State(handler): State<PersonAttributes>,
    ids: Result<Path<(String, String)>, PathRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<AttributeResponse>, ApiError> {
    let (person_id, attribute_id) = item_ids(ids)?;
    let req = update_request(&headers, body)?;
    let new_key = req.key.unwrap_or_default();
    let value = req.value.unwrap_or_default();

    handler.verify_person(person_id, "Not found").await?;
    let existing = handler.find_attribute(person_id, attribute_id).await?;

    let renamed = !new_key.is_empty() && new_key != existing.key;
    let key = if new_key.is_empty() {
        existing.key.as_str()
    } else {
        new_key.as_str()
    };

    if renamed {
        handler
            .store
            .delete_attribute(person_id, &existing.key)
            .await
            .map_err(|e| {
                ApiError::internal(
                    ErrorCode::FailedUpdateKey,
                    "Failed to update attribute key",
                    e,
                )
            })?;
    }

    handler
        .store
        .upsert_attribute(person_id, key, &value, &handler.encryption)
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedUpdateAttribute,
                "Failed to update attribute",
                e,
            )
        })?;

    handler.audit(req.meta.as_ref(), key, &value).await;

    let attribute = handler
        .store
        .get_attribute(person_id, key, handler.encryption.key())
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedRetrieveUpdated,
                "Failed to retrieve updated attribute",
                e,
            )
        })?
        .ok_or_else(|| {
            ApiError::missing_row(
                ErrorCode::FailedRetrieveUpdated,
                "Failed to retrieve updated attribute",
            )
        })?;

    Ok(Json(attribute.into()))
}

/// DELETE /persons/{person_id}/attributes/{attribute_id}
async fn delete_attribute(
    State(handler): State<PersonAttributes>,
    ids: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (person_id, attribute_id) = item_ids(ids)?;
    handler.verify_person(person_id, "Not found").await?;

    let existing = handler.find_attribute(person_id, attribute_id).await?;

    handler
        .store
        .delete_attribute(person_id, &existing.key)
        .await
        .map_err(|e| {
            ApiError::internal(
                ErrorCode::FailedDeleteAttribute,
                "Failed to delete attribute",
                e,
            )
        })?;

    Ok(Json(MessageResponse {
        message: "Attribute deleted successfully",
    }))
}
