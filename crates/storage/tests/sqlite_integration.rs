use serde_json::{Value, json};
use storage::repository::{StorageError, StoreName, StoredRecord, StructuredStore};
use storage::sqlite::SqliteRepository;
use storage::{FileBlobStore, LocalDatabase};
use std::sync::Arc;
use tutor_core::time::{fixed_clock, fixed_now};

#[tokio::test]
async fn sqlite_records_round_trip_and_filter_by_user() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_records?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let at = fixed_now();
    repo.put(&StoredRecord::new(
        StoreName::Schedules,
        "1",
        json!({"userId": "teacher-1", "time": "15:00"}),
        at,
    ))
    .await
    .unwrap();
    repo.put(&StoredRecord::new(
        StoreName::Schedules,
        "2",
        json!({"userId": "teacher-2", "time": "16:00"}),
        at,
    ))
    .await
    .unwrap();

    let fetched = repo.get(StoreName::Schedules, "1").await.unwrap();
    assert_eq!(fetched.data["time"], "15:00");
    assert_eq!(fetched.user_id.as_deref(), Some("teacher-1"));
    assert_eq!(fetched.updated_at, at);

    let all = repo.get_all(StoreName::Schedules).await.unwrap();
    assert_eq!(all.len(), 2);
    let mine = repo
        .get_by_user(StoreName::Schedules, "teacher-2")
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].key, "2");

    repo.delete(StoreName::Schedules, "1").await.unwrap();
    assert!(matches!(
        repo.get(StoreName::Schedules, "1").await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_put_replaces_existing_key() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_replace?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    // Running migrations twice is harmless.
    repo.migrate().await.expect("migrate again");

    let at = fixed_now();
    repo.put(&StoredRecord::new(StoreName::Settings, "theme", json!("light"), at))
        .await
        .unwrap();
    repo.put(&StoredRecord::new(StoreName::Settings, "theme", json!("dark"), at))
        .await
        .unwrap();

    let all = repo.get_all(StoreName::Settings).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].data, json!("dark"));
}

#[tokio::test]
async fn local_database_on_sqlite_and_file_blob() {
    let dir = tempfile::tempdir().unwrap();
    let blob_path = dir.path().join("backup_store.json");

    let db = LocalDatabase::open(
        "sqlite:file:memdb_localdb?mode=memory&cache=shared",
        &blob_path,
        fixed_clock(),
    )
    .await
    .expect("open");

    db.save(StoreName::CurrentUser, Some("session"), &json!({"token": "abc"}))
        .await
        .unwrap();
    let loaded: Option<Value> = db.load(StoreName::CurrentUser, "session").await.unwrap();
    assert_eq!(loaded, Some(json!({"token": "abc"})));

    // The blob file holds the backup copy on disk.
    let blob = FileBlobStore::open(&blob_path).unwrap();
    let backup = storage::BlobStore::get(&blob, "backup_currentUser_session").unwrap();
    assert_eq!(backup.as_deref(), Some(r#"{"token":"abc"}"#));

    db.delete(StoreName::CurrentUser, "session").await.unwrap();
    let gone: Option<Value> = db.load(StoreName::CurrentUser, "session").await.unwrap();
    assert_eq!(gone, None);
}

#[tokio::test]
async fn backup_written_by_sqlite_database_restores_into_memory() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_backup?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    let db = LocalDatabase::new(
        Arc::new(repo),
        Arc::new(storage::InMemoryBlobStore::new()),
        fixed_clock(),
    );
    db.save(StoreName::Students, Some("3"), &json!({"id": 3, "name": "Tom"}))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = db
        .backup_to_file(dir.path(), fixed_now().date_naive())
        .await
        .unwrap();

    let restored = LocalDatabase::in_memory();
    assert_eq!(restored.restore_from_file(&path).await.unwrap(), 1);
    let tom: Option<Value> = restored.load(StoreName::Students, "3").await.unwrap();
    assert_eq!(tom.unwrap()["name"], "Tom");
}
