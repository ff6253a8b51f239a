#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use datafusion::arrow::array::{Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use ferry_common::config::{CodeTableSettings, ModelConfig};
use ferry_common::{Batch, Command, ConnectorHandle, SubRequest, SubRequestId};
use ferry_connectors::{ConnectorGateway, ResponseSender};
use ferry_error::{ErrorCode, FerryError, Result};
use ferry_runtime::{Dispatcher, DispatcherOptions, StaticCatalog};
use parking_lot::Mutex;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Rows(RecordBatch),
    Fail(FerryError),
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub steps: Vec<Step>,
    pub implicit_close: bool,
}

impl Script {
    pub fn rows(batches: Vec<RecordBatch>) -> Self {
        Self {
            steps: batches.into_iter().map(Step::Rows).collect(),
            implicit_close: false,
        }
    }

    pub fn then_fail(mut self, cause: FerryError) -> Self {
        self.steps.push(Step::Fail(cause));
        self
    }

    pub fn with_implicit_close(mut self) -> Self {
        self.implicit_close = true;
        self
    }
}

struct Active {
    sender: ResponseSender,
    steps: VecDeque<Step>,
    rows_sent: usize,
    pending: usize,
    implicit_close: bool,
}

#[derive(Debug, Default, Clone)]
pub struct GatewayLog {
    pub executed: Vec<SubRequest>,
    pub closed: Vec<SubRequestId>,
    pub cancelled: Vec<SubRequestId>,
    /// Batch requests issued while another one was still outstanding.
    pub violations: usize,
    pub max_outstanding: usize,
}

/// A [`ConnectorGateway`] replaying scripted batches keyed by the command's table (or
/// native text). In auto mode every request is answered synchronously; in manual mode
/// the test calls [`ScriptedGateway::deliver`].
pub struct ScriptedGateway {
    auto: bool,
    scripts: Mutex<HashMap<String, Script>>,
    active: Mutex<HashMap<SubRequestId, Active>>,
    log: Mutex<GatewayLog>,
}

impl ScriptedGateway {
    pub fn auto() -> Arc<Self> {
        Arc::new(Self::with_mode(true))
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self::with_mode(false))
    }

    fn with_mode(auto: bool) -> Self {
        Self {
            auto,
            scripts: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            log: Mutex::new(GatewayLog::default()),
        }
    }

    pub fn script(&self, target: &str, script: Script) {
        self.scripts.lock().insert(target.to_lowercase(), script);
    }

    pub fn log(&self) -> GatewayLog {
        self.log.lock().clone()
    }

    pub fn executions_of(&self, target: &str) -> usize {
        self.log
            .lock()
            .executed
            .iter()
            .filter(|r| command_target(&r.command) == target.to_lowercase())
            .count()
    }

    /// Ids of sub-requests the gateway still tracks.
    pub fn active_ids(&self) -> Vec<SubRequestId> {
        self.active.lock().keys().copied().collect()
    }

    pub fn outstanding(&self, id: &SubRequestId) -> usize {
        self.active.lock().get(id).map_or(0, |a| a.pending)
    }

    /// Answers one pending request of `id`. Returns `false` if none is pending.
    pub fn deliver(&self, id: &SubRequestId) -> bool {
        let mut active = self.active.lock();
        let Some(entry) = active.get_mut(id) else {
            return false;
        };
        if entry.pending == 0 {
            return false;
        }
        entry.pending -= 1;
        Self::send_step(entry)
    }

    fn send_step(entry: &mut Active) -> bool {
        match entry.steps.pop_front() {
            Some(Step::Rows(data)) => {
                entry.rows_sent += data.num_rows();
                let batch = if entry.steps.is_empty() {
                    Batch::last(data, entry.rows_sent).with_implicit_close(entry.implicit_close)
                } else {
                    Batch::new(data)
                };
                entry.sender.send_batch(batch);
                true
            }
            Some(Step::Fail(cause)) => {
                entry.sender.fail(cause);
                true
            }
            None => false,
        }
    }

    fn record_request(&self, entry: &mut Active) {
        entry.pending += 1;
        let mut log = self.log.lock();
        if entry.pending > 1 {
            log.violations += 1;
        }
        log.max_outstanding = log.max_outstanding.max(entry.pending);
    }
}

pub fn command_target(command: &Command) -> String {
    match command {
        Command::Select { table, .. } => table.to_lowercase(),
        Command::Native { text } => text.to_lowercase(),
    }
}

impl ConnectorGateway for ScriptedGateway {
    fn select_connector(&self, binding: &str) -> Result<ConnectorHandle> {
        Ok(ConnectorHandle {
            binding: binding.to_string(),
            instance: 0,
        })
    }

    fn execute(
        &self,
        request: SubRequest,
        _handle: &ConnectorHandle,
        responses: ResponseSender,
    ) -> Result<()> {
        let target = command_target(&request.command);
        let script = self.scripts.lock().get(&target).cloned().ok_or_else(|| {
            FerryError::new(
                ErrorCode::ConnectorRejected,
                format!("No script for '{}'", target),
            )
        })?;

        let mut entry = Active {
            sender: responses,
            steps: script.steps.into(),
            rows_sent: 0,
            pending: 0,
            implicit_close: script.implicit_close,
        };
        self.record_request(&mut entry);
        if self.auto {
            entry.pending -= 1;
            Self::send_step(&mut entry);
        }

        self.log.lock().executed.push(request.clone());
        self.active.lock().insert(request.id, entry);
        Ok(())
    }

    fn request_next_batch(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        let mut active = self.active.lock();
        if let Some(entry) = active.get_mut(id) {
            self.record_request(entry);
            if self.auto {
                entry.pending -= 1;
                Self::send_step(entry);
            }
        }
        Ok(())
    }

    fn close(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        self.log.lock().closed.push(*id);
        if let Some(entry) = self.active.lock().remove(id) {
            entry.sender.send_batch(Batch::closed());
        }
        Ok(())
    }

    fn cancel(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        self.log.lock().cancelled.push(*id);
        self.active.lock().remove(id);
        Ok(())
    }
}

pub fn numbers(start: i64, len: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
    let values: Vec<i64> = (start..start + len as i64).collect();
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
}

/// Consecutive numbers starting at 1, split into batches of the given sizes.
pub fn numbered_batches(sizes: &[usize]) -> Vec<RecordBatch> {
    let mut next = 1;
    sizes
        .iter()
        .map(|&size| {
            let batch = numbers(next, size);
            next += size as i64;
            batch
        })
        .collect()
}

pub fn code_rows(rows: &[(i64, &str)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("label", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|(_, label)| *label).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

pub fn models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            name: "reference".to_string(),
            binding: "ref_data".to_string(),
            tables: vec!["StatusCodes".to_string(), "Countries".to_string()],
        },
        ModelConfig {
            name: "sales".to_string(),
            binding: "pg".to_string(),
            tables: vec!["numbers".to_string()],
        },
    ]
}

pub fn settings(max_code_tables: usize) -> CodeTableSettings {
    CodeTableSettings {
        max_code_tables,
        ..CodeTableSettings::default()
    }
}

pub fn dispatcher_with(
    gateway: Arc<dyn ConnectorGateway>,
    code_tables: CodeTableSettings,
) -> Arc<Dispatcher> {
    Dispatcher::new(DispatcherOptions {
        gateway,
        metadata: Arc::new(StaticCatalog::from_config(&models()).unwrap()),
        code_tables,
    })
    .unwrap()
}

pub fn dispatcher_on(
    gateway: Arc<dyn ConnectorGateway>,
    runtime: tokio::runtime::Handle,
) -> Arc<Dispatcher> {
    Dispatcher::with_runtime(
        DispatcherOptions {
            gateway,
            metadata: Arc::new(StaticCatalog::from_config(&models()).unwrap()),
            code_tables: CodeTableSettings::default(),
        },
        runtime,
    )
}
