use crate::config::DatabaseConfig;
use crate::types::{EncryptionContext, KeyValueRecord, Person, PersonAttribute, RequestLogEntry};
use crate::{Store, StoreError};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

/// Migrations embedded at compile time from `person-store/migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

// pgcrypto raises external_routine_invocation_exception on a wrong key.
const WRONG_KEY_SQLSTATE: &str = "39000";

const ATTRIBUTE_COLUMNS: &str = "id, person_id, attribute_key::text AS key, \
     pgp_sym_decrypt(encrypted_value, $2) AS value, key_version, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Builds the pool from configuration. Call [`Store::ping`] afterwards to
    /// confirm the database answers.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(&config.url).map_err(StoreError::InvalidUrl)?;

        let connect = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(config.max_lifetime())
            .idle_timeout(config.idle_timeout())
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options);

        let pool = tokio::time::timeout(config.acquire_timeout(), connect)
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(PgStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Persons are normally provisioned by another system. This exists for
    /// operational tooling and tests.
    pub async fn create_person(&self, client_id: &str) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar("INSERT INTO person (client_id) VALUES ($1) RETURNING id")
            .bind(client_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Removes a person; its attributes go with it through the foreign key.
    pub async fn delete_person(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM person WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_attributes(&self, person_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM person_attributes WHERE person_id = $1")
            .bind(person_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn read_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(WRONG_KEY_SQLSTATE) => {
            StoreError::Decryption
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO key_value (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<KeyValueRecord>, StoreError> {
        let record = sqlx::query_as::<_, KeyValueRecord>(
            "SELECT key, value, created_at, updated_at FROM key_value WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM key_value WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>, StoreError> {
        let person = sqlx::query_as::<_, Person>(
            "SELECT id, client_id, created_at, updated_at FROM person WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(person)
    }

    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        encryption: &EncryptionContext,
    ) -> Result<i32, StoreError> {
        let id = sqlx::query_scalar(
            "INSERT INTO person_attributes (person_id, attribute_key, encrypted_value, key_version) \
             VALUES ($1, $2, pgp_sym_encrypt($3, $4), $5) \
             ON CONFLICT (person_id, attribute_key) DO UPDATE SET \
                 encrypted_value = EXCLUDED.encrypted_value, \
                 key_version = EXCLUDED.key_version, \
                 updated_at = CURRENT_TIMESTAMP \
             RETURNING id",
        )
        .bind(person_id)
        .bind(key)
        .bind(value)
        .bind(encryption.key())
        .bind(encryption.version())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError> {
        let query = format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM person_attributes \
             WHERE person_id = $1 AND attribute_key = $3::citext"
        );
        sqlx::query_as::<_, PersonAttribute>(&query)
            .bind(person_id)
            .bind(encryption_key)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn get_attribute_by_id(
        &self,
        person_id: Uuid,
        id: i32,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError> {
        let query = format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM person_attributes WHERE person_id = $1 AND id = $3"
        );
        sqlx::query_as::<_, PersonAttribute>(&query)
            .bind(person_id)
            .bind(encryption_key)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn list_attributes(
        &self,
        person_id: Uuid,
        encryption_key: &str,
    ) -> Result<Vec<PersonAttribute>, StoreError> {
        let query = format!(
            "SELECT {ATTRIBUTE_COLUMNS} FROM person_attributes \
             WHERE person_id = $1 ORDER BY attribute_key"
        );
        sqlx::query_as::<_, PersonAttribute>(&query)
            .bind(person_id)
            .bind(encryption_key)
            .fetch_all(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM person_attributes WHERE person_id = $1 AND attribute_key = $2::citext",
        )
        .bind(person_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_request_log(
        &self,
        entry: &RequestLogEntry<'_>,
        encryption: &EncryptionContext,
    ) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar(
            "INSERT INTO request_log \
                 (trace_id, caller, reason, encrypted_request_body, encrypted_response_body, key_version) \
             VALUES ($1, $2, $3, pgp_sym_encrypt($4, $6), pgp_sym_encrypt($5, $6), $7) \
             RETURNING id",
        )
        .bind(entry.trace_id)
        .bind(entry.caller)
        .bind(entry.reason)
        .bind(entry.request_body)
        .bind(entry.response_body)
        .bind(encryption.key())
        .bind(encryption.version())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}
