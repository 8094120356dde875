//! Pipeline run execution

pub mod invoker;
pub mod launcher;

pub use invoker::{PipelineInvoker, SyncRunResult};
pub use launcher::{RunLauncher, RunSlot};
