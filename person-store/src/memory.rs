//! In-process store with the same observable behavior as [`PgStore`].
//!
//! Used by router tests. Values are "encrypted" by remembering the key they
//! were written with, so reading with a different key fails the way pgcrypto
//! does. Individual operations can be made to fail with [`MemoryStore::fail`].
//!
//! [`PgStore`]: crate::PgStore
use crate::types::{EncryptionContext, KeyValueRecord, Person, PersonAttribute, RequestLogEntry};
use crate::{Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    SetValue,
    GetValue,
    DeleteValue,
    GetPerson,
    UpsertAttribute,
    GetAttribute,
    GetAttributeById,
    ListAttributes,
    DeleteAttribute,
    InsertRequestLog,
}

struct StoredAttribute {
    id: i32,
    person_id: Uuid,
    key: String,
    sealed_with: String,
    value: String,
    key_version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredAttribute {
    fn matches_key(&self, key: &str) -> bool {
        self.key.to_lowercase() == key.to_lowercase()
    }

    fn open(&self, encryption_key: &str) -> Result<PersonAttribute, StoreError> {
        if self.sealed_with != encryption_key {
            return Err(StoreError::Decryption);
        }
        Ok(PersonAttribute {
            id: self.id,
            person_id: self.person_id,
            key: self.key.clone(),
            value: self.value.clone(),
            key_version: self.key_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A decrypted audit record, as seen by tests.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRequestLog {
    pub id: i64,
    pub trace_id: String,
    pub caller: String,
    pub reason: String,
    pub request_body: String,
    pub response_body: String,
    pub key_version: i32,
}

#[derive(Default)]
struct Tables {
    key_values: HashMap<String, KeyValueRecord>,
    persons: HashMap<Uuid, Person>,
    attributes: Vec<StoredAttribute>,
    request_logs: Vec<StoredRequestLog>,
    next_attribute_id: i32,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<Operation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `operation` return a database error.
    pub fn fail(&self, operation: Operation) {
        self.failing.lock().insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.failing.lock().remove(&operation);
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        if self.failing.lock().contains(&operation) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    pub fn insert_person(&self, client_id: &str) -> Uuid {
        let now = Utc::now();
        let person = Person {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        let id = person.id;
        self.tables.lock().persons.insert(id, person);
        id
    }

    /// Removes a person and, like the foreign key in the schema, its attributes.
    pub fn delete_person(&self, id: Uuid) {
        let mut tables = self.tables.lock();
        tables.persons.remove(&id);
        tables.attributes.retain(|attr| attr.person_id != id);
    }

    pub fn count_attributes(&self, person_id: Uuid) -> usize {
        self.tables
            .lock()
            .attributes
            .iter()
            .filter(|attr| attr.person_id == person_id)
            .count()
    }

    pub fn count_key_values(&self) -> usize {
        self.tables.lock().key_values.len()
    }

    pub fn request_logs(&self) -> Vec<StoredRequestLog> {
        self.tables.lock().request_logs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check(Operation::Ping)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(Operation::SetValue)?;
        let now = Utc::now();
        let mut tables = self.tables.lock();
        tables
            .key_values
            .entry(key.to_string())
            .and_modify(|record| {
                record.value = value.to_string();
                record.updated_at = now;
            })
            .or_insert_with(|| KeyValueRecord {
                key: key.to_string(),
                value: value.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<KeyValueRecord>, StoreError> {
        self.check(Operation::GetValue)?;
        Ok(self.tables.lock().key_values.get(key).cloned())
    }

    async fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        self.check(Operation::DeleteValue)?;
        self.tables.lock().key_values.remove(key);
        Ok(())
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>, StoreError> {
        self.check(Operation::GetPerson)?;
        Ok(self.tables.lock().persons.get(&id).cloned())
    }

    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        encryption: &EncryptionContext,
    ) -> Result<i32, StoreError> {
        self.check(Operation::UpsertAttribute)?;
        let now = Utc::now();
        let mut tables = self.tables.lock();

        if !tables.persons.contains_key(&person_id) {
            // Foreign key violation in the real schema.
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }

        if let Some(existing) = tables
            .attributes
            .iter_mut()
            .find(|attr| attr.person_id == person_id && attr.matches_key(key))
        {
            existing.value = value.to_string();
            existing.sealed_with = encryption.key().to_string();
            existing.key_version = encryption.version();
            existing.updated_at = now;
            return Ok(existing.id);
        }

        tables.next_attribute_id += 1;
        let id = tables.next_attribute_id;
        tables.attributes.push(StoredAttribute {
            id,
            person_id,
            key: key.to_string(),
            sealed_with: encryption.key().to_string(),
            value: value.to_string(),
            key_version: encryption.version(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError> {
        self.check(Operation::GetAttribute)?;
        self.tables
            .lock()
            .attributes
            .iter()
            .find(|attr| attr.person_id == person_id && attr.matches_key(key))
            .map(|attr| attr.open(encryption_key))
            .transpose()
    }

    async fn get_attribute_by_id(
        &self,
        person_id: Uuid,
        id: i32,
        encryption_key: &str,
    ) -> Result<Option<PersonAttribute>, StoreError> {
        self.check(Operation::GetAttributeById)?;
        self.tables
            .lock()
            .attributes
            .iter()
            .find(|attr| attr.person_id == person_id && attr.id == id)
            .map(|attr| attr.open(encryption_key))
            .transpose()
    }

    async fn list_attributes(
        &self,
        person_id: Uuid,
        encryption_key: &str,
    ) -> Result<Vec<PersonAttribute>, StoreError> {
        self.check(Operation::ListAttributes)?;
        let mut attributes = self
            .tables
            .lock()
            .attributes
            .iter()
            .filter(|attr| attr.person_id == person_id)
            .map(|attr| attr.open(encryption_key))
            .collect::<Result<Vec<_>, _>>()?;
        attributes.sort_by_key(|attr| attr.key.to_lowercase());
        Ok(attributes)
    }

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> Result<(), StoreError> {
        self.check(Operation::DeleteAttribute)?;
        self.tables
            .lock()
            .attributes
            .retain(|attr| !(attr.person_id == person_id && attr.matches_key(key)));
        Ok(())
    }

    async fn insert_request_log(
        &self,
        entry: &RequestLogEntry<'_>,
        encryption: &EncryptionContext,
    ) -> Result<i64, StoreError> {
        self.check(Operation::InsertRequestLog)?;
        let mut tables = self.tables.lock();
        let id = tables.request_logs.len() as i64 + 1;
        tables.request_logs.push(StoredRequestLog {
            id,
            trace_id: entry.trace_id.to_string(),
            caller: entry.caller.to_string(),
            reason: entry.reason.to_string(),
            request_body: entry.request_body.to_string(),
            response_body: entry.response_body.to_string(),
            key_version: encryption.version(),
        });
        Ok(id)
    }
}
