use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use bluegreen_core_types::{BlueGreenError, ErrorKind, TransferTotals};

use crate::driver::{BulkLoadDriver, EntityKind, FieldMapper};
use crate::metrics;

#[derive(Clone, Debug)]
pub struct FanOutOptions {
    /// Fixed worker count; `None` sizes the pool from the CPU count.
    pub workers: Option<usize>,
    pub batch_size: usize,
    /// Hard limit for the whole fan-out.
    pub timeout: Duration,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            workers: None,
            batch_size: 10_000,
            timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub fragments: usize,
    pub rows: u64,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FanOutReport {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl FanOutReport {
    pub fn totals(&self) -> TransferTotals {
        TransferTotals {
            rows: self.workers.iter().map(|w| w.rows).sum(),
            bytes: self.workers.iter().map(|w| w.bytes).sum(),
            elapsed: self.elapsed,
        }
    }
}

/// Every regular file below `dir`, recursively, sorted by path.
pub fn discover_fragments(dir: &Path) -> Result<Vec<PathBuf>, BlueGreenError> {
    if !dir.is_dir() {
        return Err(BlueGreenError::new(ErrorKind::DataPathNotFound)
            .with_hint(format!("{} is not a directory", dir.display())));
    }
    let mut fragments = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                fragments.push(path);
            }
        }
    }
    fragments.sort();
    Ok(fragments)
}

/// `min(fragments, ceil(cpus * 1.3))` unless a positive count is configured.
pub fn worker_count(fragments: usize, configured: Option<usize>) -> usize {
    if fragments == 0 {
        return 0;
    }
    let wanted = configured.filter(|n| *n > 0).unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus as f64 * 1.3).ceil() as usize
    });
    wanted.clamp(1, fragments)
}

/// Read one parquet fragment, stopping early with a timeout error once `cancelled` is set.
pub fn read_fragment(
    path: &Path,
    batch_size: usize,
    cancelled: &AtomicBool,
) -> Result<Vec<RecordBatch>, BlueGreenError> {
    let parquet_err = |err: parquet::errors::ParquetError| {
        BlueGreenError::new(ErrorKind::InvalidArgument)
            .with_hint(format!("{}: {err}", path.display()))
    };
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(parquet_err)?
        .with_batch_size(batch_size.max(1))
        .build()
        .map_err(parquet_err)?;
    let mut batches = Vec::new();
    for batch in reader {
        if cancelled.load(Ordering::Relaxed) {
            return Err(BlueGreenError::new(ErrorKind::Timeout)
                .with_hint(format!("{}: read cancelled", path.display())));
        }
        batches.push(batch.map_err(|err| {
            BlueGreenError::new(ErrorKind::InvalidArgument)
                .with_hint(format!("{}: {err}", path.display()))
        })?);
    }
    Ok(batches)
}

/// Stream `fragments` through parallel worker handles of `driver`.
///
/// The first worker failure aborts the rest and is returned; so is the timeout.
pub async fn fan_out(
    driver: &BulkLoadDriver,
    entity: EntityKind,
    mapper: FieldMapper,
    fragments: Vec<PathBuf>,
    options: &FanOutOptions,
) -> Result<FanOutReport, BlueGreenError> {
    let started = Instant::now();
    let count = worker_count(fragments.len(), options.workers);
    if count == 0 {
        return Ok(FanOutReport::default());
    }

    let mut buckets: Vec<Vec<PathBuf>> = vec![Vec::new(); count];
    for (idx, fragment) in fragments.into_iter().enumerate() {
        buckets[idx % count].push(fragment);
    }
    info!(
        target: "bulkload",
        generation = %driver.generation(),
        entity = entity.as_str(),
        workers = count,
        "starting transfer fan-out"
    );

    // Blocking readers outlive `JoinSet::shutdown`; they poll this between batches.
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut set = JoinSet::new();
    for (worker, bucket) in buckets.into_iter().enumerate() {
        let handle = driver.worker_handle();
        let batch_size = options.batch_size;
        let cancelled = cancelled.clone();
        set.spawn(async move {
            let result =
                transfer_bucket(&handle, worker, entity, mapper, bucket, batch_size, cancelled)
                    .await;
            handle.close().await;
            result
        });
    }

    let collect = async {
        let mut reports = Vec::with_capacity(count);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    return Err(BlueGreenError::new(ErrorKind::Internal)
                        .with_hint(format!("transfer worker crashed: {join_err}")))
                }
            }
        }
        Ok(reports)
    };
    let outcome = tokio::time::timeout(options.timeout, collect).await;
    if !matches!(outcome, Ok(Ok(_))) {
        cancelled.store(true, Ordering::Relaxed);
    }
    set.shutdown().await;

    let mut reports = match outcome {
        Ok(Ok(reports)) => reports,
        Ok(Err(err)) => {
            metrics::record_fan_out_failure(entity.as_str());
            return Err(err);
        }
        Err(_) => {
            metrics::record_fan_out_failure(entity.as_str());
            warn!(
                target: "bulkload",
                generation = %driver.generation(),
                entity = entity.as_str(),
                timeout_secs = options.timeout.as_secs(),
                "transfer fan-out timed out; workers terminated"
            );
            return Err(BlueGreenError::new(ErrorKind::Timeout).with_hint(format!(
                "{} transfer exceeded {:?}",
                entity.as_str(),
                options.timeout
            )));
        }
    };
    reports.sort_by_key(|report| report.worker);

    let report = FanOutReport {
        workers: reports,
        elapsed: started.elapsed(),
    };
    let totals = report.totals();
    info!(
        target: "bulkload",
        generation = %driver.generation(),
        entity = entity.as_str(),
        rows = totals.rows,
        seconds = totals.elapsed.as_secs_f64(),
        rows_per_sec = totals.rows_per_sec().round() as u64,
        mib_per_sec = totals.bytes_per_sec() / (1u64 << 20) as f64,
        "transfer fan-out finished"
    );
    Ok(report)
}

async fn transfer_bucket(
    handle: &BulkLoadDriver,
    worker: usize,
    entity: EntityKind,
    mapper: FieldMapper,
    bucket: Vec<PathBuf>,
    batch_size: usize,
    cancelled: Arc<AtomicBool>,
) -> Result<WorkerReport, BlueGreenError> {
    let mut report = WorkerReport {
        worker,
        ..WorkerReport::default()
    };
    for path in bucket {
        let source = path.clone();
        let flag = cancelled.clone();
        let batches = tokio::task::spawn_blocking(move || read_fragment(&source, batch_size, &flag))
            .await
            .map_err(|err| {
                BlueGreenError::new(ErrorKind::Internal)
                    .with_hint(format!("fragment reader crashed: {err}"))
            })??;
        let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| b.num_rows() > 0).collect();
        if batches.is_empty() {
            debug!(target: "bulkload", worker, fragment = %path.display(), "empty fragment skipped");
            continue;
        }
        let stats = handle
            .write(entity, batches, mapper)
            .await
            .map_err(|err| err.context(path.display()))?;
        report.fragments += 1;
        report.rows += stats.rows;
        report.bytes += stats.bytes;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_caps_at_fragments() {
        assert_eq!(worker_count(0, None), 0);
        assert_eq!(worker_count(1, None), 1);
        assert_eq!(worker_count(3, Some(8)), 3);
        assert_eq!(worker_count(10, Some(4)), 4);
        assert!(worker_count(1000, None) >= 1);
        assert_eq!(worker_count(5, Some(0)), worker_count(5, None));
    }

    #[test]
    fn discover_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let person = dir.path().join("Person");
        let company = dir.path().join("Company");
        std::fs::create_dir_all(&person).unwrap();
        std::fs::create_dir_all(&company).unwrap();
        std::fs::write(person.join("part-1.parquet"), b"x").unwrap();
        std::fs::write(person.join("part-0.parquet"), b"x").unwrap();
        std::fs::write(company.join("part-0.parquet"), b"x").unwrap();

        let fragments = discover_fragments(dir.path()).unwrap();
        let names: Vec<String> = fragments
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Company/part-0.parquet",
                "Person/part-0.parquet",
                "Person/part-1.parquet"
            ]
        );
    }

    fn write_rows(path: &Path, rows: i64) {
        use arrow::array::{ArrayRef, Int64Array};
        use parquet::arrow::ArrowWriter;

        let batch = RecordBatch::try_from_iter(vec![(
            "id",
            Arc::new(Int64Array::from_iter_values(0..rows)) as ArrayRef,
        )])
        .unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn read_fragment_splits_into_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-0.parquet");
        write_rows(&path, 25);

        let batches = read_fragment(&path, 10, &AtomicBool::new(false)).unwrap();
        let rows: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
        assert_eq!(rows, vec![10, 10, 5]);
    }

    #[test]
    fn cancelled_read_stops_before_the_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part-0.parquet");
        write_rows(&path, 25);

        let err = read_fragment(&path, 10, &AtomicBool::new(true)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.hint.unwrap_or_default().contains("read cancelled"));
    }

    #[test]
    fn discover_missing_dir_is_data_path_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_fragments(&dir.path().join("nodes")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataPathNotFound);
    }
}
