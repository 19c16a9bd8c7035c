use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde_json::json;
use singer_messages::IngestConfig;
use target_azureblob::{
    FlushCoordinator, ObjectStoreBlobs, ProtocolError, RecordBuffer, Target, TargetError,
    CSV_CONTENT_TYPE,
};
use tokio::runtime::Runtime;

const CONTAINER: &str = "landing";

fn fixture(name: &str) -> File {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    File::open(path).expect("open fixture")
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("build runtime")
}

fn target(runtime: &Runtime, staging: &Path) -> Target<ObjectStoreBlobs> {
    let store = ObjectStoreBlobs::in_memory(runtime.handle().clone());
    let buffer = RecordBuffer::open(staging).expect("open staging");
    Target::new(buffer, FlushCoordinator::new(store, CONTAINER))
}

fn ingest() -> IngestConfig {
    IngestConfig::default().capture_failed_lines(true)
}

fn uploaded(target: &Target<ObjectStoreBlobs>, artifact: &str) -> String {
    let bytes = target
        .flusher()
        .store()
        .fetch(CONTAINER, artifact)
        .expect("artifact uploaded");
    String::from_utf8(bytes).expect("utf-8 artifact")
}

fn listed(target: &Target<ObjectStoreBlobs>) -> Vec<String> {
    use target_azureblob::BlobStore;
    target
        .flusher()
        .store()
        .list_artifacts(CONTAINER)
        .expect("list container")
}

#[test]
fn records_are_staged_with_first_record_header() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let mut target = target(&rt, dir.path());

    let input = concat!(
        r#"{"type":"SCHEMA","stream":"users","schema":{"type":"object"},"key_properties":["id"]}"#,
        "\n",
        r#"{"type":"RECORD","stream":"users","record":{"id":1,"name":"a"}}"#,
        "\n",
        r#"{"type":"RECORD","stream":"users","record":{"id":2,"name":"b"}}"#,
        "\n",
    );
    target.process(input.as_bytes(), ingest()).unwrap();

    let staged = fs::read_to_string(dir.path().join("users.csv")).unwrap();
    assert_eq!(staged, "id,name\n1,a\n2,b\n");
    assert_eq!(
        target.registry().key_properties("users"),
        Some(&["id".to_string()][..])
    );
    assert!(target.final_checkpoint().is_none());
    assert!(listed(&target).is_empty());
}

#[test]
fn idle_state_promotes_staging_and_is_emitted() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let mut target = target(&rt, dir.path());

    target.process(fixture("users_sync.jsonl"), ingest()).unwrap();

    assert_eq!(listed(&target), vec!["users.csv".to_string()]);
    assert_eq!(
        uploaded(&target, "users.csv"),
        "id,name,address\n1,ada,\"{\"\"city\"\":\"\"London\"\"}\"\n2,grace,\"{\"\"city\"\":\"\"Arlington\"\"}\"\n"
    );
    assert_eq!(
        target
            .flusher()
            .store()
            .content_type(CONTAINER, "users.csv")
            .unwrap()
            .as_deref(),
        Some(CSV_CONTENT_TYPE)
    );
    assert!(!target.buffer().has_staged());
    assert!(!dir.path().join("users.csv").exists());

    let stats = target.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.states, 2);
    assert_eq!(
        target.final_checkpoint(),
        Some(&json!({"currently_syncing": null, "bookmarks": {"users": {"id": 2}}}))
    );
}

#[test]
fn record_before_schema_is_a_protocol_error() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let target = target(&rt, dir.path());

    let input = r#"{"type":"RECORD","stream":"users","record":{}}"#;
    let err = target.persist_lines(input.as_bytes(), ingest()).unwrap_err();

    assert!(matches!(
        err,
        TargetError::Protocol {
            line_number: 1,
            source: ProtocolError::UnknownStream { ref stream }
        } if stream == "users"
    ));
    assert!(!dir.path().join("users.csv").exists());
}

#[test]
fn validation_failure_stops_before_later_messages() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let mut target = target(&rt, dir.path());

    let err = target
        .process(fixture("invalid_record.jsonl"), ingest())
        .unwrap_err();

    assert!(matches!(
        err,
        TargetError::Validation { line_number: 3, ref instance_path, .. } if instance_path == "/id"
    ));
    // The trailing idle STATE was never processed.
    assert!(listed(&target).is_empty());
    assert_eq!(
        fs::read_to_string(dir.path().join("users.csv")).unwrap(),
        "id\n1\n"
    );
}

#[test]
fn decimal_precision_failures_are_tolerated_and_staged() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let mut target = target(&rt, dir.path());

    target.process(fixture("precision.jsonl"), ingest()).unwrap();

    assert!(target.stats().tolerated_validation_errors >= 1);
    assert_eq!(target.stats().records, 2);
    assert_eq!(
        uploaded(&target, "payments.csv"),
        "id,amount\n1,19.999\n2,5.25\n"
    );
}

#[test]
fn malformed_line_reports_its_position() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let target = target(&rt, dir.path());

    let input = "{\"type\":\"STATE\",\"value\":{\"currently_syncing\":null}}\n\n{\"type\":";
    let err = target.persist_lines(input.as_bytes(), ingest()).unwrap_err();
    assert!(matches!(err, TargetError::Parse { line_number: 3, .. }));
}

#[test]
fn unknown_type_and_missing_stream_are_protocol_errors() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();

    let err = target(&rt, dir.path())
        .persist_lines(&b"{\"type\":\"BATCH\"}\n"[..], ingest())
        .unwrap_err();
    assert!(matches!(err, TargetError::Protocol { line_number: 1, .. }));

    let err = target(&rt, dir.path())
        .persist_lines(&b"{\"type\":\"SCHEMA\",\"schema\":{}}\n"[..], ingest())
        .unwrap_err();
    assert!(matches!(
        err,
        TargetError::Protocol {
            source: ProtocolError::Message(_),
            ..
        }
    ));
}

#[test]
fn record_after_state_clears_the_pending_checkpoint() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let target = target(&rt, dir.path());

    let input = concat!(
        r#"{"type":"SCHEMA","stream":"s","schema":{},"key_properties":[]}"#,
        "\n",
        r#"{"type":"STATE","value":{"currently_syncing":"s"}}"#,
        "\n",
        r#"{"type":"RECORD","stream":"s","record":{"k":1}}"#,
        "\n",
    );
    let state = target.persist_lines(input.as_bytes(), ingest()).unwrap();
    assert!(state.is_none());
}

#[test]
fn no_state_means_no_checkpoint() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let state = target(&rt, dir.path())
        .persist_lines(&b""[..], ingest())
        .unwrap();
    assert!(state.is_none());
}

#[test]
fn leftovers_from_an_interrupted_run_are_promoted() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("orders.csv"), "sku,qty\na,1\n").unwrap();

    let mut target = target(&rt, dir.path());
    target
        .process(
            &b"{\"type\":\"STATE\",\"value\":{\"currently_syncing\":false}}\n"[..],
            ingest(),
        )
        .unwrap();

    assert_eq!(uploaded(&target, "orders.csv"), "sku,qty\na,1\n");
    assert!(!dir.path().join("orders.csv").exists());
}
