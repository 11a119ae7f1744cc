//! Persistence gateway for the person service.
//!
//! All SQL lives behind the [`Store`] trait. Attribute values and audit bodies
//! are encrypted and decrypted inside the database, so plaintext only exists
//! in the query parameters and result rows.
pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryStore, Operation};
pub use postgres::PgStore;
pub use types::{EncryptionContext, KeyValueRecord, Person, PersonAttribute, RequestLogEntry};

use async_trait::async_trait;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid database url: {0}")]
    InvalidUrl(#[source] sqlx::Error),

    #[error("database operation timed out")]
    Timeout,

    #[error("wrong key or corrupt data")]
    Decryption,
}

/// Typed access to the relational store.
///
/// Lookups return `Ok(None)` when the row does not exist; `Err` is reserved
/// for failures of the store itself.
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap round trip used by the health check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Inserts or updates a key-value pair. `created_at` survives updates.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get_value(&self, key: &str) -> Result<Option<KeyValueRecord>, StoreError>;

    /// Deleting a key that does not exist is not an error.
    async fn delete_value(&self, key: &str) -> Result<(), StoreError>;

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>, StoreError>;

    /// Encrypts `value` and inserts it under (`person_id`, `key`), or replaces
    /// the existing value for that pair. Keys compare case-insensitively.
    /// Returns the attribute id.
    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        encryption: &EncryptionContext,
    ) -> Result<i32, StoreError>;

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError>;

    async fn get_attribute_by_id(
        &self,
        person_id: Uuid,
        id: i32,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError>;

    /// All attributes of a person, ordered by key.
    async fn list_attributes(
        &self,
        person_id: Uuid,
        encryption_key: &str,
    ) -> Result<Vec<PersonAttribute>, StoreError>;

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> Result<(), StoreError>;

    /// Appends an audit record and returns its id.
    async fn insert_request_log(
        &self,
        entry: &RequestLogEntry<'_>,
        encryption: &EncryptionContext,
    ) -> Result<i64, StoreError>;
}
