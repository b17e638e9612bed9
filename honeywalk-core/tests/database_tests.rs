// Tests for the SQLite object store

use honeywalk_core::data::{Database, JobStatus};
use honeywalk_scanner::object::{AttributeValue, ObjectData};
use honeywalk_scanner::{ObjectStore, StoreError};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn attrs(pairs: &[(&str, AttributeValue)]) -> ObjectData {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    assert!(!Database::exists(&db_path));

    let db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));
    drop(db);

    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_schema() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let job = {
        let db = Database::new(&db_path).unwrap();
        db.create_job(&["http://site.test/".to_string()], None).unwrap()
    };

    let db = Database::new(&db_path).unwrap();
    assert!(db.job(job).unwrap().is_some());
}

// ============================================================================
// Job Tests
// ============================================================================

#[test]
fn test_create_and_finish_job() {
    let (_temp_dir, db) = create_test_db();
    let seeds = vec!["http://a.test/".to_string(), "http://b.test/".to_string()];

    let job = db.create_job(&seeds, Some("{\"link_limit\":5}")).unwrap();
    let info = db.job(job).unwrap().unwrap();
    assert_eq!(info.status, "running");
    assert_eq!(info.seed_urls, seeds);
    assert!(info.end_time.is_none());
    assert_eq!(info.configuration.as_deref(), Some("{\"link_limit\":5}"));

    db.finish_job(job, JobStatus::Completed).unwrap();
    let info = db.job(job).unwrap().unwrap();
    assert_eq!(info.status, "completed");
    assert!(info.end_time.is_some());
}

#[test]
fn test_missing_job() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.job(42).unwrap().is_none());
    assert_eq!(db.latest_job().unwrap(), None);
}

#[test]
fn test_latest_job() {
    let (_temp_dir, db) = create_test_db();
    db.create_job(&[], None).unwrap();
    let second = db.create_job(&[], None).unwrap();
    assert_eq!(db.latest_job().unwrap(), Some(second));
}

// ============================================================================
// Object Store Tests
// ============================================================================

#[test]
fn test_blob_round_trip() {
    let (_temp_dir, db) = create_test_db();
    let job = db.create_job(&[], None).unwrap();

    let id = db.save_blob(job, b"<html></html>").unwrap();
    assert_eq!(db.load_blob(job, id).unwrap(), b"<html></html>");
    assert_eq!(db.blob_count(job).unwrap(), 1);
}

#[test]
fn test_blob_of_another_job_is_not_found() {
    let (_temp_dir, db) = create_test_db();
    let first = db.create_job(&[], None).unwrap();
    let second = db.create_job(&[], None).unwrap();

    let id = db.save_blob(first, b"data").unwrap();
    assert!(matches!(db.load_blob(second, id), Err(StoreError::NotFound(_))));
}

#[test]
fn test_blob_for_unknown_job_fails() {
    let (_temp_dir, db) = create_test_db();
    assert!(matches!(db.save_blob(99, b"data"), Err(StoreError::Backend(_))));
}

#[test]
fn test_create_object_records_parent() {
    let (_temp_dir, db) = create_test_db();
    let job = db.create_job(&[], None).unwrap();

    let root = db
        .create_object(job, &attrs(&[("url_original", "http://site.test/".into())]))
        .unwrap();
    let child = db
        .create_object(
            job,
            &attrs(&[
                ("origin", "redirect".into()),
                ("parent", AttributeValue::Object(root)),
            ]),
        )
        .unwrap();

    let objects = db.objects_for_job(job).unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].id, root);
    assert_eq!(objects[0].parent, None);
    assert_eq!(objects[1].id, child);
    assert_eq!(objects[1].parent, Some(root));
    assert_eq!(objects[1].attribute_str("origin"), Some("redirect"));
}

#[test]
fn test_update_object_merges_attributes() {
    let (_temp_dir, db) = create_test_db();
    let job = db.create_job(&[], None).unwrap();

    let id = db
        .create_object(job, &attrs(&[("url_original", "http://site.test/".into())]))
        .unwrap();
    db.update_object(
        job,
        id,
        &attrs(&[("active", true.into()), ("http_code", AttributeValue::Int(200))]),
    )
    .unwrap();

    let objects = db.objects_for_job(job).unwrap();
    let stored = &objects[0].attributes;
    assert_eq!(stored["url_original"].as_str(), Some("http://site.test/"));
    assert_eq!(stored["active"], AttributeValue::Bool(true));
    assert_eq!(stored["http_code"].as_int(), Some(200));
}

#[test]
fn test_update_unknown_object_creates_it() {
    let (_temp_dir, db) = create_test_db();
    let job = db.create_job(&[], None).unwrap();

    db.update_object(job, 500, &attrs(&[("active", false.into())]))
        .unwrap();

    let objects = db.objects_for_job(job).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, 500);
}

#[test]
fn test_save_new_objects() {
    let (_temp_dir, db) = create_test_db();
    let job = db.create_job(&[], None).unwrap();
    let parent = db.create_object(job, &ObjectData::new()).unwrap();

    let ids = db
        .save_new_objects(
            job,
            &[
                attrs(&[
                    ("type", "url".into()),
                    ("url_original", "http://site.test/a".into()),
                    ("parent", AttributeValue::Object(parent)),
                ]),
                attrs(&[("type", "file".into()), ("mime_type", "text/plain".into())]),
            ],
        )
        .unwrap();
    assert_eq!(ids.len(), 2);

    let stored = db.new_objects_for_job(job).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].parent, Some(parent));
    assert_eq!(stored[0].attribute_str("url_original"), Some("http://site.test/a"));
    assert_eq!(stored[1].parent, None);
    assert_eq!(stored[1].attribute_str("mime_type"), Some("text/plain"));
}

#[test]
fn test_objects_are_scoped_to_job() {
    let (_temp_dir, db) = create_test_db();
    let first = db.create_job(&[], None).unwrap();
    let second = db.create_job(&[], None).unwrap();

    db.create_object(first, &ObjectData::new()).unwrap();
    assert_eq!(db.objects_for_job(first).unwrap().len(), 1);
    assert!(db.objects_for_job(second).unwrap().is_empty());
}
