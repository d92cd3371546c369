use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use bluegreen_core_types::{BlueGreenError, ErrorKind, GenerationName, RetryPolicy};

use crate::metrics;
use crate::transport::{FlightTransport, TransportFactory};

/// Renames positional columns into the layout the target expects.
pub type FieldMapper = fn(&RecordBatch) -> Result<RecordBatch, ArrowError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadState {
    Ready,
    FeedingNodes,
    FeedingEdges,
    AwaitingFinalize,
    Complete,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoadState::Ready => "READY",
            LoadState::FeedingNodes => "FEEDING_NODES",
            LoadState::FeedingEdges => "FEEDING_EDGES",
            LoadState::AwaitingFinalize => "AWAITING_FINALIZE",
            LoadState::Complete => "COMPLETE",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntityKind {
    Node,
    Relationship,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Relationship => "relationship",
        }
    }

    fn feeding_state(self) -> LoadState {
        match self {
            EntityKind::Node => LoadState::FeedingNodes,
            EntityKind::Relationship => LoadState::FeedingEdges,
        }
    }
}

/// Options sent with `CREATE_DATABASE`; the name comes from the driver.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CreateDatabaseOptions {
    pub concurrency: u32,
    pub high_io: bool,
    pub force: bool,
    pub record_format: String,
    pub id_property: String,
    pub id_type: String,
}

impl Default for CreateDatabaseOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            high_io: true,
            force: true,
            record_format: "aligned".to_string(),
            id_property: "id".to_string(),
            id_type: "STRING".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferStats {
    pub rows: u64,
    pub bytes: u64,
}

/// Checked protocol driver for loading one generation.
///
/// `create_database` moves READY to FEEDING_NODES, `nodes_done` moves to FEEDING_EDGES,
/// `edges_done` to AWAITING_FINALIZE and `finish` to COMPLETE. Every other call order fails
/// with a protocol state error.
pub struct BulkLoadDriver {
    factory: Arc<dyn TransportFactory>,
    transport: Arc<dyn FlightTransport>,
    generation: GenerationName,
    state: LoadState,
    create_retry: RetryPolicy,
}

impl BulkLoadDriver {
    pub fn new(factory: Arc<dyn TransportFactory>, generation: GenerationName) -> Self {
        let transport = factory.open();
        Self {
            factory,
            transport,
            generation,
            state: LoadState::Ready,
            create_retry: RetryPolicy::default(),
        }
    }

    pub fn with_create_retry(mut self, policy: RetryPolicy) -> Self {
        self.create_retry = policy;
        self
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn generation(&self) -> &GenerationName {
        &self.generation
    }

    /// Independent handle on its own transport, bound to the same generation and state.
    pub fn worker_handle(&self) -> BulkLoadDriver {
        BulkLoadDriver {
            factory: self.factory.clone(),
            transport: self.factory.open(),
            generation: self.generation.clone(),
            state: self.state,
            create_retry: self.create_retry.clone(),
        }
    }

    fn require(&self, expected: LoadState, operation: &str) -> Result<(), BlueGreenError> {
        if self.state != expected {
            return Err(BlueGreenError::protocol_state(format!(
                "{operation} requires {expected} but {} is {}",
                self.generation, self.state
            )));
        }
        Ok(())
    }

    /// Cancel a running import. `false` when there was nothing to abort.
    pub async fn abort(&self, name: &GenerationName) -> bool {
        match self
            .transport
            .action("ABORT", &json!({ "name": name.as_str() }))
            .await
        {
            Ok(_) => {
                info!(target: "bulkload", generation = %name, "aborted running import");
                true
            }
            Err(err) if err.is_not_found() => {
                debug!(target: "bulkload", generation = %name, "no import to abort");
                false
            }
            Err(err) => {
                warn!(target: "bulkload", generation = %name, error = %err, "abort failed");
                false
            }
        }
    }

    pub async fn create_database(
        &mut self,
        options: &CreateDatabaseOptions,
    ) -> Result<Value, BlueGreenError> {
        self.require(LoadState::Ready, "create_database")?;
        let mut body = serde_json::to_value(options).map_err(|err| {
            BlueGreenError::new(ErrorKind::InvalidArgument).with_hint(err.to_string())
        })?;
        body["name"] = json!(self.generation.as_str());

        let transport = self.transport.clone();
        let metadata = self
            .create_retry
            .run("create_database", |attempt| {
                let transport = transport.clone();
                let body = body.clone();
                async move {
                    debug!(target: "bulkload", attempt, "sending CREATE_DATABASE");
                    transport.action("CREATE_DATABASE", &body).await
                }
            })
            .await?
            .unwrap_or(Value::Null);

        self.state = LoadState::FeedingNodes;
        info!(target: "bulkload", generation = %self.generation, "database created");
        Ok(metadata)
    }

    pub async fn write_nodes<I>(
        &self,
        batches: I,
        mapper: FieldMapper,
    ) -> Result<TransferStats, BlueGreenError>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        self.write(EntityKind::Node, batches, mapper).await
    }

    pub async fn write_edges<I>(
        &self,
        batches: I,
        mapper: FieldMapper,
    ) -> Result<TransferStats, BlueGreenError>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        self.write(EntityKind::Relationship, batches, mapper).await
    }

    pub async fn write<I>(
        &self,
        entity: EntityKind,
        batches: I,
        mapper: FieldMapper,
    ) -> Result<TransferStats, BlueGreenError>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        self.require(entity.feeding_state(), "write")?;

        let mut stats = TransferStats::default();
        let mut mapped = Vec::new();
        for batch in batches {
            let batch = mapper(&batch).map_err(|err| {
                BlueGreenError::new(ErrorKind::InvalidArgument)
                    .with_hint(format!("{} field mapping failed: {err}", entity.as_str()))
            })?;
            stats.rows += batch.num_rows() as u64;
            stats.bytes += batch.get_array_memory_size() as u64;
            mapped.push(batch);
        }
        if mapped.is_empty() {
            return Err(BlueGreenError::new(ErrorKind::InvalidArgument)
                .with_hint("empty iterable of record batches provided"));
        }

        let started = Instant::now();
        let descriptor = json!({
            "name": self.generation.as_str(),
            "entity_type": entity.as_str(),
        });
        self.transport.put(&descriptor, mapped).await?;
        metrics::record_transfer(entity.as_str(), stats.rows, stats.bytes, started.elapsed());
        Ok(stats)
    }

    async fn signal(&mut self, action: &str, count_field: &str) -> Result<u64, BlueGreenError> {
        let response = self
            .transport
            .action(action, &json!({ "name": self.generation.as_str() }))
            .await?
            .unwrap_or(Value::Null);
        Ok(response.get(count_field).and_then(Value::as_u64).unwrap_or(0))
    }

    /// Returns the node count reported by the target.
    pub async fn nodes_done(&mut self) -> Result<u64, BlueGreenError> {
        self.require(LoadState::FeedingNodes, "nodes_done")?;
        let count = self.signal("NODE_LOAD_DONE", "node_count").await?;
        self.state = LoadState::FeedingEdges;
        info!(target: "bulkload", generation = %self.generation, node_count = count, "nodes loaded");
        Ok(count)
    }

    /// Returns the relationship count reported by the target and closes the transport.
    pub async fn edges_done(&mut self) -> Result<u64, BlueGreenError> {
        self.require(LoadState::FeedingEdges, "edges_done")?;
        let count = self
            .signal("RELATIONSHIP_LOAD_DONE", "relationship_count")
            .await?;
        self.state = LoadState::AwaitingFinalize;
        self.transport.close().await;
        info!(
            target: "bulkload",
            generation = %self.generation,
            relationship_count = count,
            "relationships loaded"
        );
        Ok(count)
    }

    /// The target finalises the database on its own once relationships are done.
    pub fn finish(&mut self) -> Result<(), BlueGreenError> {
        self.require(LoadState::AwaitingFinalize, "finish")?;
        self.state = LoadState::Complete;
        Ok(())
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}
