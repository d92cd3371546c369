use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use bluegreen_core_types::{ErrorKind, RetryPolicy, TenantId};
use bluegreen_registry::InMemoryControlPlane;
use bulkload_adapter::{BulkLoader, FanOutOptions, LoaderOptions, MemoryFlightTarget};

fn strings(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

fn write_parquet(path: &Path, batch: &RecordBatch) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

fn node_batch(ids: &[&str], labels: &[&str]) -> RecordBatch {
    RecordBatch::try_from_iter(vec![("id", strings(ids)), ("labels", strings(labels))]).unwrap()
}

fn edge_batch(src: &[&str], dst: &[&str], kind: &[&str]) -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("src", strings(src)),
        ("dst", strings(dst)),
        ("type", strings(kind)),
    ])
    .unwrap()
}

fn snapshot(root: &Path) {
    write_parquet(
        &root.join("nodes/Person/part-0.parquet"),
        &node_batch(&["p1", "p2"], &["Person", "Person,Employee"]),
    );
    write_parquet(
        &root.join("nodes/Person/part-1.parquet"),
        &node_batch(&["p3"], &["Person"]),
    );
    write_parquet(
        &root.join("nodes/Company/part-0.parquet"),
        &node_batch(&["c1", "c2"], &["Company", "Company"]),
    );
    write_parquet(
        &root.join("relationships/WORKS_AT/part-0.parquet"),
        &edge_batch(&["p1", "p2"], &["c1", "c1"], &["WORKS_AT", "WORKS_AT"]),
    );
    write_parquet(
        &root.join("relationships/KNOWS/part-0.parquet"),
        &edge_batch(&["p1"], &["p3"], &["KNOWS"]),
    );
}

fn options(timeout: Duration) -> LoaderOptions {
    LoaderOptions {
        create_retry: RetryPolicy::fixed(3, Duration::from_millis(5)),
        fan_out: FanOutOptions {
            workers: Some(2),
            batch_size: 1,
            timeout,
        },
        settle_delay: Duration::ZERO,
        ..LoaderOptions::default()
    }
}

#[tokio::test]
async fn loads_all_fragments_through_the_protocol() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path());
    let target = MemoryFlightTarget::new();
    let control = Arc::new(InMemoryControlPlane::new());
    let loader = BulkLoader::new(
        Arc::new(target.clone()),
        control,
        options(Duration::from_secs(30)),
    );

    let report = loader
        .load_generation(&TenantId::new("acme"), 200, dir.path())
        .await
        .unwrap();

    assert_eq!(report.generation.as_str(), "acme-200");
    assert_eq!(report.nodes.rows, 5);
    assert_eq!(report.edges.rows, 3);
    assert_eq!(report.node_count, Some(5));
    assert_eq!(report.relationship_count, Some(3));
    assert_eq!(target.rows("acme-200"), Some((5, 3)));
    assert_eq!(
        target.actions(),
        vec![
            "ABORT",
            "CREATE_DATABASE",
            "NODE_LOAD_DONE",
            "RELATIONSHIP_LOAD_DONE"
        ]
    );
    assert_eq!(target.columns("node"), vec!["nodeId", "labels"]);
}

#[tokio::test]
async fn drops_leftover_generation_and_its_aliases_first() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path());
    let target = MemoryFlightTarget::new();
    let control = Arc::new(InMemoryControlPlane::new());
    control.add_generation("acme-200", "offline");
    control.point_alias("acme", "acme-200");

    let loader = BulkLoader::new(
        Arc::new(target.clone()),
        control.clone(),
        options(Duration::from_secs(30)),
    );
    loader
        .load_generation(&TenantId::new("acme"), 200, dir.path())
        .await
        .unwrap();

    assert_eq!(control.dropped(), vec!["acme-200".to_string()]);
    assert_eq!(control.alias_target("acme"), None);
}

#[tokio::test]
async fn worker_failure_fails_the_load_and_aborts_the_import() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path());
    let target = MemoryFlightTarget::new();
    target.fail_puts(true);
    let loader = BulkLoader::new(
        Arc::new(target.clone()),
        Arc::new(InMemoryControlPlane::new()),
        options(Duration::from_secs(30)),
    );

    let err = loader
        .load_generation(&TenantId::new("acme"), 200, dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    let actions = target.actions();
    assert_eq!(actions.last().map(String::as_str), Some("ABORT"));
    assert!(!actions.iter().any(|a| a == "NODE_LOAD_DONE"));
}

#[tokio::test]
async fn transfer_timeout_terminates_workers() {
    let dir = tempfile::tempdir().unwrap();
    snapshot(dir.path());
    let target = MemoryFlightTarget::new();
    target.delay_puts(Duration::from_secs(30));
    let loader = BulkLoader::new(
        Arc::new(target.clone()),
        Arc::new(InMemoryControlPlane::new()),
        options(Duration::from_millis(100)),
    );

    let err = loader
        .load_generation(&TenantId::new("acme"), 200, dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn missing_subtree_is_a_data_path_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nodes/Person")).unwrap();
    let target = MemoryFlightTarget::new();
    let loader = BulkLoader::new(
        Arc::new(target.clone()),
        Arc::new(InMemoryControlPlane::new()),
        options(Duration::from_secs(30)),
    );

    let err = loader
        .load_generation(&TenantId::new("acme"), 200, dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DataPathNotFound);
    assert!(target.actions().is_empty());
}
