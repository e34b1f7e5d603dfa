//! Execution connectors
//!
//! A connector runs an ordered command list against one device and reports an
//! [`ExecutionResult`]. Timeouts, authentication and transport retries are the
//! connector's business; the device queue treats whatever comes back (including
//! an `Err`) as the final word on that attempt.

pub mod dry_run;
pub mod http;

pub use dry_run::DryRunConnector;
pub use http::HttpAgentConnector;

use async_trait::async_trait;

use crate::domain::{DomainError, ExecutionResult};

#[async_trait]
pub trait ExecutionConnector: Send + Sync {
    /// Run `commands` in order on the device reachable at `address`
    async fn execute(
        &self,
        address: &str,
        commands: &[String],
    ) -> Result<ExecutionResult, DomainError>;
}
