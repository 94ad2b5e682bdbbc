pub mod config;
pub mod error;
pub mod ffi;
pub mod filters;
pub mod grouping;
pub mod metrics;
pub mod models;
pub mod session;
pub mod storage;
pub mod tools;

uniffi::setup_scaffolding!();

pub use config::EngineConfig;
pub use error::{DiveLogError, Result};
pub use ffi::{available_tools, DiveLogSession, FfiError, ToolReply};
pub use filters::{filter_records, parse_filter_chain, FilterKind, FilterParams, FilterSpec};
pub use grouping::{CategoryKey, ChartKind, Metric};
pub use metrics::{compute, AggregateResult, StatKind, StatParams};
pub use models::{
    DiveMetadata, DiveRecord, GasType, GearItem, GearKind, GearLoadout, RecordKey, Timeline,
};
pub use session::{SessionState, WorkingSet};
pub use storage::{load_universe, DecodedDive, DiveSource, LoadReport, MemorySource};
pub use tools::{DiveLogTools, ToolName, ToolOutput};
