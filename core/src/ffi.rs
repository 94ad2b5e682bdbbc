//! Foreign-language bindings.
//!
//! A [`DiveLogSession`] wraps a loaded universe and one [`SessionState`].
//! Hosts call `begin_query` before each top-level question and route the
//! orchestrator's tool calls through `call_tool`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::DiveLogError;
use crate::session::SessionState;
use crate::storage::{load_universe, DecodedDive, LoadOutcome, MemorySource};
use crate::tools::{DiveLogTools, ToolName};

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiError {
    #[error("{message}")]
    Load { message: String },
    #[error("{message}")]
    Query { message: String },
}

impl From<DiveLogError> for FfiError {
    fn from(err: DiveLogError) -> Self {
        FfiError::Query {
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, uniffi::Record)]
pub struct RejectedDive {
    pub key: String,
    pub reason: String,
}

#[derive(Clone, Debug, uniffi::Record)]
pub struct ToolReply {
    /// Text for the orchestrator transcript
    pub text: String,
    /// The structured output, for rendering charts and lists
    pub json: String,
}

#[derive(Clone, Debug, uniffi::Record)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

#[derive(uniffi::Object)]
pub struct DiveLogSession {
    tools: DiveLogTools,
    state: Mutex<SessionState>,
    rejected: Vec<RejectedDive>,
}

impl DiveLogSession {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[uniffi::export]
impl DiveLogSession {
    /// Loads a JSON array of decoded dives. Dives that fail validation or
    /// repeat an earlier key are skipped and listed by `rejected_dives`.
    #[uniffi::constructor]
    pub fn new(records_json: String, config_json: Option<String>) -> Result<Arc<Self>, FfiError> {
        let config = match config_json {
            Some(json) => EngineConfig::from_json_str(&json).map_err(|e| FfiError::Load {
                message: e.to_string(),
            })?,
            None => EngineConfig::default(),
        };
        let dives: Vec<DecodedDive> =
            serde_json::from_str(&records_json).map_err(|e| FfiError::Load {
                message: format!("invalid dive records: {}", e),
            })?;
        let report = load_universe(&MemorySource::from_dives(dives))
            .map_err(|message| FfiError::Load { message })?;

        let rejected = report
            .statuses
            .iter()
            .filter_map(|status| match &status.outcome {
                LoadOutcome::Rejected(reason) => Some(RejectedDive {
                    key: status.key.to_string(),
                    reason: reason.clone(),
                }),
                LoadOutcome::Loaded => None,
            })
            .collect();
        info!(dives = report.records.len(), "dive log session opened");

        Ok(Arc::new(DiveLogSession {
            tools: DiveLogTools::new(report.records, config),
            state: Mutex::new(SessionState::new()),
            rejected,
        }))
    }

    /// Clears the working set and labeled groups.
    pub fn begin_query(&self) {
        self.state().clear();
    }

    pub fn call_tool(&self, name: String, params_json: String) -> Result<ToolReply, FfiError> {
        let params: serde_json::Value = if params_json.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&params_json).map_err(|e| FfiError::Query {
                message: format!("invalid parameters for {}: {}", name, e),
            })?
        };

        let output = self.tools.call(&mut self.state(), &name, &params)?;
        let json = serde_json::to_string(&output).map_err(|e| FfiError::Query {
            message: e.to_string(),
        })?;
        debug!(tool = %name, bytes = json.len(), "tool reply encoded");
        Ok(ToolReply {
            text: output.to_text(),
            json,
        })
    }

    pub fn dive_count(&self) -> u32 {
        self.tools.universe().len() as u32
    }

    pub fn rejected_dives(&self) -> Vec<RejectedDive> {
        self.rejected.clone()
    }
}

#[uniffi::export]
pub fn available_tools() -> Vec<ToolInfo> {
    ToolName::ALL
        .iter()
        .map(|tool| ToolInfo {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
        })
        .collect()
}
