use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{Action, FlightClient, FlightDescriptor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, TryStreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tonic::transport::Endpoint;
use tonic::Code;
use tracing::debug;

use bluegreen_core_types::{interpret, BlueGreenError, ErrorKind};

use crate::config::FlightConfig;

/// Action and upload channel to the target system.
#[async_trait]
pub trait FlightTransport: Send + Sync {
    /// Run an action; returns the first result body decoded as JSON, if any.
    async fn action(&self, action: &str, body: &Value) -> Result<Option<Value>, BlueGreenError>;

    /// Upload record batches under a JSON command descriptor.
    async fn put(&self, descriptor: &Value, batches: Vec<RecordBatch>)
        -> Result<(), BlueGreenError>;

    async fn close(&self) {}
}

/// Opens independent transport handles bound to the same endpoint.
pub trait TransportFactory: Send + Sync {
    fn open(&self) -> Arc<dyn FlightTransport>;
}

/// Map a Flight failure onto the shared taxonomy.
///
/// Message markers win over the gRPC code because the target reports several categories through
/// generic status codes.
pub fn classify_flight_error(err: FlightError) -> BlueGreenError {
    match err {
        FlightError::Tonic(status) => {
            let message = status.message().to_string();
            let kind = interpret(&message).unwrap_or(match status.code() {
                Code::NotFound => ErrorKind::NotFound,
                Code::AlreadyExists => ErrorKind::AlreadyExists,
                Code::InvalidArgument => ErrorKind::InvalidArgument,
                Code::Internal => ErrorKind::Internal,
                Code::Unknown => ErrorKind::Unknown,
                Code::DeadlineExceeded => ErrorKind::Timeout,
                _ => ErrorKind::Transport,
            });
            BlueGreenError::new(kind)
                .with_hint(format!("{:?}: {}", status.code(), message))
                .retriable(!matches!(kind, ErrorKind::InvalidArgument))
        }
        other => BlueGreenError::from_message(other.to_string()),
    }
}

/// gRPC Flight client, connected lazily on first use.
pub struct GrpcFlightTransport {
    config: FlightConfig,
    client: AsyncMutex<Option<FlightClient>>,
}

impl GrpcFlightTransport {
    pub fn new(config: FlightConfig) -> Self {
        Self {
            config,
            client: AsyncMutex::new(None),
        }
    }

    async fn connect(&self) -> Result<FlightClient, BlueGreenError> {
        let endpoint = Endpoint::from_shared(self.config.uri())
            .map_err(|err| {
                BlueGreenError::new(ErrorKind::ConfigValidation)
                    .with_hint(format!("invalid flight endpoint: {err}"))
            })?
            .connect_timeout(self.config.connect_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|err| BlueGreenError::transport(format!("flight connect failed: {err}")))?;
        let mut client = FlightClient::new(channel);
        client
            .add_header("authorization", &self.config.basic_auth())
            .map_err(classify_flight_error)?;
        debug!(target: "bulkload", uri = %self.config.uri(), "flight channel opened");
        Ok(client)
    }
}

#[async_trait]
impl FlightTransport for GrpcFlightTransport {
    async fn action(&self, action: &str, body: &Value) -> Result<Option<Value>, BlueGreenError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(BlueGreenError::transport("flight client unavailable"));
        };

        let payload = serde_json::to_vec(body).map_err(|err| {
            BlueGreenError::new(ErrorKind::InvalidArgument).with_hint(err.to_string())
        })?;
        let results: Vec<Bytes> = client
            .do_action(Action::new(action, payload))
            .await
            .map_err(classify_flight_error)?
            .try_collect()
            .await
            .map_err(classify_flight_error)?;

        match results.first() {
            Some(body) if !body.is_empty() => serde_json::from_slice(body).map(Some).map_err(|err| {
                BlueGreenError::new(ErrorKind::Internal)
                    .with_hint(format!("undecodable {action} result: {err}"))
            }),
            _ => Ok(None),
        }
    }

    async fn put(
        &self,
        descriptor: &Value,
        batches: Vec<RecordBatch>,
    ) -> Result<(), BlueGreenError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(BlueGreenError::transport("flight client unavailable"));
        };

        let command = serde_json::to_vec(descriptor).map_err(|err| {
            BlueGreenError::new(ErrorKind::InvalidArgument).with_hint(err.to_string())
        })?;
        let flight_data = FlightDataEncoderBuilder::new()
            .with_flight_descriptor(Some(FlightDescriptor::new_cmd(command)))
            .build(stream::iter(batches.into_iter().map(Ok)));
        let _acks: Vec<_> = client
            .do_put(flight_data)
            .await
            .map_err(classify_flight_error)?
            .try_collect()
            .await
            .map_err(classify_flight_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.client.lock().await.take();
    }
}

#[derive(Clone, Debug)]
pub struct GrpcTransportFactory {
    config: FlightConfig,
}

impl GrpcTransportFactory {
    pub fn new(config: FlightConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for GrpcTransportFactory {
    fn open(&self) -> Arc<dyn FlightTransport> {
        Arc::new(GrpcFlightTransport::new(self.config.clone()))
    }
}

#[derive(Debug, Default)]
struct TargetState {
    /// Generation name to (node rows, relationship rows).
    databases: BTreeMap<String, (u64, u64)>,
    in_progress: HashSet<String>,
    actions: Vec<(String, Value)>,
    columns: BTreeMap<String, Vec<String>>,
    create_failures: u32,
    fail_puts: bool,
    put_delay: Option<Duration>,
}

/// In-process stand-in for the Flight endpoint. Every handle opened from it shares one state.
#[derive(Clone, Debug, Default)]
pub struct MemoryFlightTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryFlightTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an import as running so that `ABORT` finds it.
    pub fn start_process(&self, name: &str) {
        self.state.lock().in_progress.insert(name.to_string());
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().create_failures = count;
    }

    pub fn fail_puts(&self, fail: bool) {
        self.state.lock().fail_puts = fail;
    }

    pub fn delay_puts(&self, delay: Duration) {
        self.state.lock().put_delay = Some(delay);
    }

    pub fn actions(&self) -> Vec<String> {
        self.state
            .lock()
            .actions
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Rows received for `name`: (nodes, relationships).
    pub fn rows(&self, name: &str) -> Option<(u64, u64)> {
        self.state.lock().databases.get(name).copied()
    }

    /// Column names of the last upload for an entity type.
    pub fn columns(&self, entity_type: &str) -> Vec<String> {
        self.state
            .lock()
            .columns
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    fn handle_action(&self, action: &str, body: &Value) -> Result<Option<Value>, BlueGreenError> {
        let mut state = self.state.lock();
        state.actions.push((action.to_string(), body.clone()));
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match action {
            "ABORT" => {
                if state.in_progress.remove(&name) {
                    Ok(Some(json!({ "name": name })))
                } else {
                    Err(BlueGreenError::from_message(format!(
                        "NOT_FOUND: no arrow process found for {name}"
                    )))
                }
            }
            "CREATE_DATABASE" => {
                if state.create_failures > 0 {
                    state.create_failures -= 1;
                    return Err(BlueGreenError::from_message(
                        "INTERNAL: previous import still releasing resources",
                    ));
                }
                state.in_progress.insert(name.clone());
                state.databases.insert(name.clone(), (0, 0));
                Ok(Some(json!({ "name": name, "state": "created" })))
            }
            "NODE_LOAD_DONE" => {
                let (nodes, _) = state.databases.get(&name).copied().unwrap_or_default();
                Ok(Some(json!({ "name": name, "node_count": nodes })))
            }
            "RELATIONSHIP_LOAD_DONE" => {
                let (_, edges) = state.databases.get(&name).copied().unwrap_or_default();
                state.in_progress.remove(&name);
                Ok(Some(json!({ "name": name, "relationship_count": edges })))
            }
            other => Err(BlueGreenError::from_message(format!(
                "INVALID_ARGUMENT: unknown action {other}"
            ))),
        }
    }

    fn handle_put(&self, descriptor: &Value, batches: &[RecordBatch]) -> Result<(), BlueGreenError> {
        let mut state = self.state.lock();
        if state.fail_puts {
            return Err(BlueGreenError::from_message("INTERNAL: stream reset by peer"));
        }
        let name = descriptor.get("name").and_then(Value::as_str).unwrap_or_default();
        let entity = descriptor
            .get("entity_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
        let Some(counts) = state.databases.get_mut(name) else {
            return Err(BlueGreenError::from_message(format!(
                "NOT_FOUND: no arrow process found for {name}"
            )));
        };
        match entity.as_str() {
            "node" => counts.0 += rows,
            "relationship" => counts.1 += rows,
            _ => {
                return Err(BlueGreenError::from_message(format!(
                    "INVALID_ARGUMENT: unknown entity type {entity}"
                )))
            }
        }
        if let Some(batch) = batches.first() {
            let columns = batch
                .schema()
                .fields()
                .iter()
                .map(|field| field.name().clone())
                .collect();
            state.columns.insert(entity, columns);
        }
        Ok(())
    }
}

struct MemoryHandle {
    target: MemoryFlightTarget,
}

#[async_trait]
impl FlightTransport for MemoryHandle {
    async fn action(&self, action: &str, body: &Value) -> Result<Option<Value>, BlueGreenError> {
        self.target.handle_action(action, body)
    }

    async fn put(
        &self,
        descriptor: &Value,
        batches: Vec<RecordBatch>,
    ) -> Result<(), BlueGreenError> {
        let delay = self.target.state.lock().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.target.handle_put(descriptor, &batches)
    }
}

impl TransportFactory for MemoryFlightTarget {
    fn open(&self) -> Arc<dyn FlightTransport> {
        Arc::new(MemoryHandle {
            target: self.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn classifies_status_by_message_then_code() {
        let err = classify_flight_error(FlightError::Tonic(Status::internal(
            "NOT_FOUND: no arrow process for acme-1",
        )));
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = classify_flight_error(FlightError::Tonic(Status::already_exists("dup")));
        assert_eq!(err.kind, ErrorKind::AlreadyExists);

        let err = classify_flight_error(FlightError::Tonic(Status::invalid_argument("bad")));
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(!err.retriable);

        let err = classify_flight_error(FlightError::Tonic(Status::unavailable("down")));
        assert_eq!(err.kind, ErrorKind::Transport);

        let err = classify_flight_error(FlightError::ProtocolError("garbled".into()));
        assert_eq!(err.kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn memory_target_abort_reports_missing_process() {
        let target = MemoryFlightTarget::new();
        let handle = target.open();
        let err = handle
            .action("ABORT", &json!({ "name": "acme-1" }))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        target.start_process("acme-1");
        assert!(handle
            .action("ABORT", &json!({ "name": "acme-1" }))
            .await
            .unwrap()
            .is_some());
    }
}
