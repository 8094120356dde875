//! targetflow - load monthly target CSVs and drive the transformation pipeline

pub mod cli;
pub mod core;
pub mod execution;
pub mod ingest;
pub mod persistence;
pub mod service;
pub mod transform;

// Re-export commonly used types
pub use core::{PipelineRun, RunStatus, TargetRow, TriggerSource};
pub use execution::{PipelineInvoker, RunLauncher, SyncRunResult};
pub use persistence::{InMemoryStore, RunStore, StoreError, TargetStore};
pub use service::{PipelineService, StatusReply, TriggerReply};
pub use transform::{InvokeError, ProcessOutput, ProcessRunner, TransformSubprocess};
