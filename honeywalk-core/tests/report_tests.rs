// Tests for report generation functionality

use honeywalk_core::data::{Database, JobStatus};
use honeywalk_core::report::{
    ReportFormat, gather_report_data, generate_json_report, generate_text_report, save_report,
};
use honeywalk_scanner::object::{AttributeValue, ObjectData};
use honeywalk_scanner::{ObjectStore, StoreError};
use tempfile::TempDir;

fn attrs(pairs: &[(&str, AttributeValue)]) -> ObjectData {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// A finished job with a root, one redirect child that failed and a link.
fn populated_db() -> (TempDir, Database, u64) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    let job = db.create_job(&["http://site.test/".to_string()], None).unwrap();

    let root = db
        .create_object(
            job,
            &attrs(&[
                ("type", "url".into()),
                ("url_original", "http://site.test/".into()),
                ("active", true.into()),
                ("http_code", AttributeValue::Int(302)),
            ]),
        )
        .unwrap();
    db.create_object(
        job,
        &attrs(&[
            ("type", "url".into()),
            ("origin", "redirect".into()),
            ("url_original", "http://site.test/gone".into()),
            ("active", false.into()),
            ("reason_failed", "Unknown host: site.test".into()),
            ("parent", AttributeValue::Object(root)),
        ]),
    )
    .unwrap();
    db.save_new_objects(
        job,
        &[attrs(&[
            ("type", "url".into()),
            ("origin", "link".into()),
            ("url_original", "http://other.test/".into()),
            ("parent", AttributeValue::Object(root)),
        ])],
    )
    .unwrap();
    db.finish_job(job, JobStatus::Completed).unwrap();

    (temp_dir, db, job)
}

// ============================================================================
// Report Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("JSON"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("Txt"), Some(ReportFormat::Text));
}

#[test]
fn test_report_format_from_str_invalid() {
    assert!(ReportFormat::from_str("pdf").is_none());
    assert!(ReportFormat::from_str("").is_none());
}

// ============================================================================
// Report Data Tests
// ============================================================================

#[test]
fn test_gather_report_data() {
    let (_temp_dir, db, job) = populated_db();
    let data = gather_report_data(&db, job).unwrap();

    assert_eq!(data.job.status, "completed");
    assert_eq!(data.summary.total_pages, 2);
    assert_eq!(data.summary.active_pages, 1);
    assert_eq!(data.summary.failed_pages, 1);
    assert_eq!(data.summary.links, 1);
    assert_eq!(data.summary.files, 0);

    let child = data.pages.iter().find(|p| p.parent.is_some()).unwrap();
    assert_eq!(child.origin.as_deref(), Some("redirect"));
    assert_eq!(child.reason_failed.as_deref(), Some("Unknown host: site.test"));
}

#[test]
fn test_gather_report_data_unknown_job() {
    let (_temp_dir, db, _) = populated_db();
    assert!(matches!(gather_report_data(&db, 999), Err(StoreError::NotFound(999))));
}

// ============================================================================
// Report Rendering Tests
// ============================================================================

#[test]
fn test_text_report_contains_tree() {
    let (_temp_dir, db, job) = populated_db();
    let report = generate_text_report(&gather_report_data(&db, job).unwrap());

    assert!(report.contains("HONEYWALK CRAWL REPORT"));
    assert!(report.contains(&format!("Job ID:       {}", job)));
    assert!(report.contains("Targets:      http://site.test/"));
    assert!(report.contains("http://site.test/  ["));
    assert!(report.contains("└── http://site.test/gone"));
    assert!(report.contains("Unknown host: site.test"));
    assert!(report.contains("NEW OBJECTS"));
    assert!(report.contains("http://other.test/"));
}

#[test]
fn test_text_report_for_empty_job() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    let job = db.create_job(&[], None).unwrap();

    let report = generate_text_report(&gather_report_data(&db, job).unwrap());
    assert!(report.contains("(empty)"));
    assert!(report.contains("Targets:      Unknown"));
    assert!(!report.contains("NEW OBJECTS"));
}

#[test]
fn test_json_report_structure() {
    let (_temp_dir, db, job) = populated_db();
    let json = generate_json_report(&gather_report_data(&db, job).unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let report = &value["report"];
    assert_eq!(report["metadata"]["generator"], "Honeywalk");
    assert_eq!(report["job"]["id"], job);
    assert_eq!(report["job"]["targets"][0], "http://site.test/");
    assert_eq!(report["summary"]["total_pages"], 2);
    assert_eq!(report["pages"].as_array().unwrap().len(), 2);
    assert_eq!(report["new_objects"][0]["kind"], "url");
}

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.txt");

    save_report("hello report", &path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello report");
}
