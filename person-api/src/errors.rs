use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use person_store::StoreError;
use serde::Serialize;

/// Machine readable codes returned in every error body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    // Person attributes: validation
    InvalidPersonId,
    InvalidRequestBody,
    MissingKey,
    MissingMeta,
    InvalidAttributeIdFormat,
    // Person attributes: not found
    PersonNotFound,
    AttributeNotFound,
    // Person attributes: storage
    FailedVerifyPerson,
    FailedCreateAttribute,
    FailedRetrieveAttribute,
    FailedRetrieveAttributes,
    FailedUpdateAttribute,
    FailedRetrieveUpdated,
    FailedDeleteAttribute,
    FailedUpdateKey,
    // Person attributes: audit. Logged only, never returned.
    FailedAuditLog,

    // Key-value
    KvInvalidRequestBody,
    KvMissingKeyOrValue,
    KvMissingKeyParam,
    KvKeyNotFound,
    KvFailedSetValue,
    KvFailedRetrieveValue,
    KvFailedDeleteValue,

    // API key gate
    MissingApiKey,
    InvalidApiKeyFormat,
    ApiKeysNotConfigured,
    InvalidApiKey,

    // Health check
    HealthCheckFailed,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPersonId => "PA_001_INVALID_PERSON_ID",
            ErrorCode::InvalidRequestBody => "PA_003_INVALID_REQUEST_BODY",
            ErrorCode::MissingKey => "PA_004_MISSING_KEY",
            ErrorCode::MissingMeta => "PA_005_MISSING_META",
            ErrorCode::InvalidAttributeIdFormat => "PA_006_INVALID_ATTRIBUTE_ID_FORMAT",
            ErrorCode::PersonNotFound => "PA_101_PERSON_NOT_FOUND",
            ErrorCode::AttributeNotFound => "PA_102_ATTRIBUTE_NOT_FOUND",
            ErrorCode::FailedVerifyPerson => "PA_201_FAILED_VERIFY_PERSON",
            ErrorCode::FailedCreateAttribute => "PA_202_FAILED_CREATE_ATTRIBUTE",
            ErrorCode::FailedRetrieveAttribute => "PA_203_FAILED_RETRIEVE_ATTRIBUTE",
            ErrorCode::FailedRetrieveAttributes => "PA_204_FAILED_RETRIEVE_ATTRIBUTES",
            ErrorCode::FailedUpdateAttribute => "PA_205_FAILED_UPDATE_ATTRIBUTE",
            ErrorCode::FailedRetrieveUpdated => "PA_206_FAILED_RETRIEVE_UPDATED",
            ErrorCode::FailedDeleteAttribute => "PA_207_FAILED_DELETE_ATTRIBUTE",
            ErrorCode::FailedUpdateKey => "PA_208_FAILED_UPDATE_KEY",
            ErrorCode::FailedAuditLog => "PA_301_FAILED_AUDIT_LOG",
            ErrorCode::KvInvalidRequestBody => "KV_001_INVALID_REQUEST_BODY",
            ErrorCode::KvMissingKeyOrValue => "KV_002_MISSING_KEY_OR_VALUE",
            ErrorCode::KvMissingKeyParam => "KV_003_MISSING_KEY_PARAM",
            ErrorCode::KvKeyNotFound => "KV_101_KEY_NOT_FOUND",
            ErrorCode::KvFailedSetValue => "KV_201_FAILED_SET_VALUE",
            ErrorCode::KvFailedRetrieveValue => "KV_202_FAILED_RETRIEVE_VALUE",
            ErrorCode::KvFailedDeleteValue => "KV_203_FAILED_DELETE_VALUE",
            ErrorCode::MissingApiKey => "API_001_MISSING_API_KEY",
            ErrorCode::InvalidApiKeyFormat => "API_002_INVALID_API_KEY_FORMAT",
            ErrorCode::ApiKeysNotConfigured => "API_003_KEYS_NOT_CONFIGURED",
            ErrorCode::InvalidApiKey => "API_004_INVALID_API_KEY",
            ErrorCode::HealthCheckFailed => "HC_001_HEALTH_CHECK_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure a handler can report. Each variant maps to exactly one
/// status code and one JSON body.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        code: ErrorCode,
        message: &'static str,
    },

    #[error("{message}")]
    NotFound {
        code: ErrorCode,
        message: &'static str,
    },

    #[error("{message}")]
    Unauthorized {
        code: ErrorCode,
        message: &'static str,
    },

    #[error("{message}")]
    NotConfigured {
        code: ErrorCode,
        message: &'static str,
    },

    #[error("{message}")]
    Internal {
        code: ErrorCode,
        message: &'static str,
        #[source]
        source: Option<StoreError>,
    },
}

impl ApiError {
    pub fn validation(code: ErrorCode, message: &'static str) -> Self {
        ApiError::Validation { code, message }
    }

    pub fn not_found(code: ErrorCode, message: &'static str) -> Self {
        ApiError::NotFound { code, message }
    }

    pub fn internal(code: ErrorCode, message: &'static str, source: StoreError) -> Self {
        ApiError::Internal {
            code,
            message,
            source: Some(source),
        }
    }

    /// For a store call that succeeded but did not return the row it should have.
    pub fn missing_row(code: ErrorCode, message: &'static str) -> Self {
        ApiError::Internal {
            code,
            message,
            source: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Unauthorized { code, .. }
            | ApiError::NotConfigured { code, .. }
            | ApiError::Internal { code, .. } => *code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorResponse {
    message: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if let ApiError::Internal {
            message, source, ..
        } = &self
        {
            match source {
                Some(source) => tracing::error!(error = %source, error_code = %code, "{message}"),
                None => tracing::error!(error_code = %code, "{message}"),
            }
        }

        let body = Json(ApiErrorResponse {
            message: self.to_string(),
            error_code: code.as_str(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::validation(ErrorCode::MissingMeta, "Missing required field \"meta\""),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::not_found(ErrorCode::PersonNotFound, "Person not found"),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Unauthorized {
                    code: ErrorCode::InvalidApiKey,
                    message: "Invalid API key",
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::NotConfigured {
                    code: ErrorCode::ApiKeysNotConfigured,
                    message: "API keys are not properly configured",
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::internal(
                    ErrorCode::FailedRetrieveAttributes,
                    "Failed to retrieve attributes",
                    StoreError::Decryption,
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status);
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_internal_message_hides_cause() {
        let error = ApiError::internal(
            ErrorCode::FailedRetrieveAttributes,
            "Failed to retrieve attributes",
            StoreError::Decryption,
        );
        assert_eq!(error.to_string(), "Failed to retrieve attributes");
        assert_eq!(error.code().as_str(), "PA_204_FAILED_RETRIEVE_ATTRIBUTES");
    }
}
