//! Runs against a real PostgreSQL when `PERSON_SERVICE_TEST_DB_URL` (or
//! `DATABASE_URL`) is set. Every test migrates into a fresh schema.
use person_store::{EncryptionContext, PgStore, RequestLogEntry, Store, StoreError};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

fn test_db_url() -> Option<String> {
    std::env::var("PERSON_SERVICE_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn test_store() -> Option<PgStore> {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping DB test; set PERSON_SERVICE_TEST_DB_URL to enable");
        return None;
    };

    let schema = format!("person_test_{}", Uuid::new_v4().simple());

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema should succeed");
    admin.close().await;

    let options = PgConnectOptions::from_str(&db_url)
        .expect("valid DB url")
        .options([("search_path", format!("{schema},public"))]);
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("DB connect should succeed");

    let store = PgStore::from_pool(pool);
    store.migrate().await.expect("migrations should apply");
    store
        .migrate()
        .await
        .expect("migrations should be idempotent");
    Some(store)
}

fn encryption() -> EncryptionContext {
    EncryptionContext::new("integration-test-key", 1)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn key_value_set_get_delete() {
    let Some(store) = test_store().await else {
        return;
    };

    store.ping().await.expect("ping");

    store.set_value("color", "blue").await.expect("set");
    let first = store.get_value("color").await.expect("get").expect("row");
    assert_eq!(first.value, "blue");
    assert!(first.updated_at >= first.created_at);

    store.set_value("color", "green").await.expect("second set");
    let second = store.get_value("color").await.expect("get").expect("row");
    assert_eq!(second.value, "green");
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);

    store.delete_value("color").await.expect("delete");
    assert_eq!(store.get_value("color").await.expect("get"), None);

    // Deleting a missing key is fine.
    store.delete_value("color").await.expect("delete missing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn key_value_rejects_oversized_key() {
    let Some(store) = test_store().await else {
        return;
    };

    store
        .set_value(&"k".repeat(255), "v")
        .await
        .expect("255 chars fit");
    assert!(store.set_value(&"k".repeat(256), "v").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sets_leave_one_row() {
    let Some(store) = test_store().await else {
        return;
    };

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.set_value("shared", &format!("value-{i}")).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("set");
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM key_value WHERE key = 'shared'")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attribute_upsert_encrypts_and_deduplicates() {
    let Some(store) = test_store().await else {
        return;
    };
    let person = store.create_person("client-1").await.expect("person");
    assert!(store.get_person(person).await.expect("get person").is_some());

    let id = store
        .upsert_attribute(person, "email", "a@b.com", &encryption())
        .await
        .expect("upsert");
    let same_id = store
        .upsert_attribute(person, "EMAIL", "c@d.com", &encryption())
        .await
        .expect("upsert with other case");
    assert_eq!(id, same_id);
    assert_eq!(store.count_attributes(person).await.expect("count"), 1);

    let attr = store
        .get_attribute(person, "Email", encryption().key())
        .await
        .expect("get")
        .expect("row");
    assert_eq!(attr.key, "email");
    assert_eq!(attr.value, "c@d.com");
    assert_eq!(attr.key_version, 1);

    let by_id = store
        .get_attribute_by_id(person, id, encryption().key())
        .await
        .expect("get by id")
        .expect("row");
    assert_eq!(by_id, attr);

    let raw: Vec<u8> = sqlx::query_scalar(
        "SELECT encrypted_value FROM person_attributes WHERE person_id = $1",
    )
    .bind(person)
    .fetch_one(store.pool())
    .await
    .expect("raw value");
    assert_ne!(raw, b"c@d.com".to_vec());

    assert!(matches!(
        store.list_attributes(person, "wrong-key").await,
        Err(StoreError::Decryption)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_person_cascades_to_attributes() {
    let Some(store) = test_store().await else {
        return;
    };
    let person = store.create_person("client-2").await.expect("person");
    for key in ["a", "b", "c"] {
        store
            .upsert_attribute(person, key, "value", &encryption())
            .await
            .expect("upsert");
    }
    let listed = store
        .list_attributes(person, encryption().key())
        .await
        .expect("list");
    assert_eq!(
        listed.iter().map(|a| a.key.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );

    store.delete_person(person).await.expect("delete person");

    assert_eq!(store.count_attributes(person).await.expect("count"), 0);
    assert!(store.get_person(person).await.expect("get").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_log_bodies_are_encrypted() {
    let Some(store) = test_store().await else {
        return;
    };

    let entry = RequestLogEntry {
        trace_id: "trace-1",
        caller: "tests",
        reason: "audit",
        request_body: r#"{"key":"email","value":"a@b.com"}"#,
        response_body: "",
    };
    let id = store
        .insert_request_log(&entry, &encryption())
        .await
        .expect("insert log");

    let decrypted: String = sqlx::query_scalar(
        "SELECT pgp_sym_decrypt(encrypted_request_body, $2) FROM request_log WHERE id = $1",
    )
    .bind(id)
    .bind(encryption().key())
    .fetch_one(store.pool())
    .await
    .expect("decrypt");
    assert_eq!(decrypted, entry.request_body);
}
