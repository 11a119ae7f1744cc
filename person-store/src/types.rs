use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// A row of the `key_value` table.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct KeyValueRecord {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A person row. Persons are created out of band and only ever read here.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct Person {
    pub id: Uuid,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A person attribute with its value already decrypted.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct PersonAttribute {
    pub id: i32,
    pub person_id: Uuid,
    pub key: String,
    pub value: String,
    pub key_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Symmetric key used to encrypt attribute values and audit bodies, together
/// with the version stamped next to every value it encrypts.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionContext {
    key: String,
    version: i32,
}

impl EncryptionContext {
    pub fn new<K: Into<String>>(key: K, version: i32) -> Self {
        EncryptionContext {
            key: key.into(),
            version,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> i32 {
        self.version
    }
}

// Never print the key itself.
impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("key", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

/// An audit record for a mutating request. Bodies are stored encrypted.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestLogEntry<'a> {
    pub trace_id: &'a str,
    pub caller: &'a str,
    pub reason: &'a str,
    pub request_body: &'a str,
    pub response_body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_context_debug_is_redacted() {
        let ctx = EncryptionContext::new("super-secret", 3);
        let printed = format!("{ctx:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("version: 3"));
        assert_eq!(ctx.key(), "super-secret");
        assert_eq!(ctx.version(), 3);
    }
}
