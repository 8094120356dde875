//! External transformation process
//!
//! The pipeline itself is opaque: it is a CLI invoked with a fixed
//! working directory and profile environment, and only its exit code and
//! captured streams are observed.

pub mod response;
pub mod subprocess_client;

use async_trait::async_trait;
pub use response::{InvokeError, ProcessOutput};
pub use subprocess_client::TransformSubprocess;

/// Trait for running the transformation - allows for different implementations
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the transformation once and wait for it to exit
    async fn run(&self) -> Result<ProcessOutput, InvokeError>;
}

#[async_trait]
impl ProcessRunner for TransformSubprocess {
    async fn run(&self) -> Result<ProcessOutput, InvokeError> {
        self.execute().await
    }
}
