//! `x-api-key` authentication for the person attribute routes.
//!
//! Keys look like `person-service-key-<uuid>`. Several named credential slots
//! (normally `blue` and `green`) may be configured at once so keys can be
//! rotated without downtime. A slot only counts when its own key is well
//! formed.
use crate::errors::{ApiError, ErrorCode};
use crate::metrics_defs::API_KEY_REJECTIONS;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use regex::Regex;
use serde::Deserialize;
use shared::counter;
use std::fmt;
use std::sync::{Arc, LazyLock};

pub const API_KEY_HEADER: &str = "x-api-key";

static API_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^person-service-key-[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("api key pattern is valid")
});

pub fn is_well_formed(key: &str) -> bool {
    API_KEY_PATTERN.is_match(key)
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct CredentialSlot {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl CredentialSlot {
    pub fn new<N: Into<String>>(name: N, key: Option<String>) -> Self {
        CredentialSlot {
            name: name.into(),
            key,
        }
    }

    /// The key this slot accepts, if it is configured and well formed.
    fn active_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| is_well_formed(key))
    }

    pub fn is_active(&self) -> bool {
        self.active_key().is_some()
    }
}

impl fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ApiKeyGate {
    slots: Vec<CredentialSlot>,
}

impl ApiKeyGate {
    pub fn new(slots: Vec<CredentialSlot>) -> Self {
        ApiKeyGate { slots }
    }

    pub fn active_slots(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter(|slot| slot.is_active())
            .map(|slot| slot.name.as_str())
    }

    /// Checks the presented header and returns the name of the slot it matched.
    ///
    /// An unconfigured gate is reported before a mismatching key, so callers
    /// can tell a broken deployment from a wrong credential.
    pub fn authenticate(&self, header: Option<&HeaderValue>) -> Result<&str, ApiError> {
        let presented = match header {
            None => return Err(unauthorized(ErrorCode::MissingApiKey)),
            Some(value) if value.is_empty() => return Err(unauthorized(ErrorCode::MissingApiKey)),
            Some(value) => value
                .to_str()
                .map_err(|_| unauthorized(ErrorCode::InvalidApiKeyFormat))?,
        };

        if !is_well_formed(presented) {
            return Err(unauthorized(ErrorCode::InvalidApiKeyFormat));
        }

        let mut active = self
            .slots
            .iter()
            .filter_map(|slot| slot.active_key().map(|key| (slot.name.as_str(), key)))
            .peekable();

        if active.peek().is_none() {
            return Err(ApiError::NotConfigured {
                code: ErrorCode::ApiKeysNotConfigured,
                message: "API keys are not properly configured",
            });
        }

        active
            .find(|(_, key)| *key == presented)
            .map(|(name, _)| name)
            .ok_or_else(|| unauthorized(ErrorCode::InvalidApiKey))
    }
}

fn unauthorized(code: ErrorCode) -> ApiError {
    let message = match code {
        ErrorCode::MissingApiKey => "Missing required header \"x-api-key\"",
        ErrorCode::InvalidApiKeyFormat => "Invalid API key format",
        _ => "Invalid API key",
    };
    ApiError::Unauthorized { code, message }
}

/// Middleware guarding a route group with [`ApiKeyGate`].
pub async fn require_api_key(
    State(gate): State<Arc<ApiKeyGate>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match gate.authenticate(request.headers().get(API_KEY_HEADER)) {
        Ok(slot) => {
            tracing::debug!(slot, "api key accepted");
        }
        Err(err) => {
            let code = err.code().as_str();
            counter!(API_KEY_REJECTIONS, "error_code" => code).increment(1);
            tracing::warn!(error_code = code, path = %request.uri().path(), "api key rejected");
            return Err(err);
        }
    }

    Ok(next.run(request).await)
}
