//! Connector that only logs what it would run

use async_trait::async_trait;

use super::ExecutionConnector;
use crate::domain::{DomainError, ExecutionResult};

#[derive(Debug, Default, Clone)]
pub struct DryRunConnector;

#[async_trait]
impl ExecutionConnector for DryRunConnector {
    async fn execute(
        &self,
        address: &str,
        commands: &[String],
    ) -> Result<ExecutionResult, DomainError> {
        for (i, command) in commands.iter().enumerate() {
            tracing::info!(address, step = i + 1, "[dry-run] {}", command);
        }

        let output = commands
            .iter()
            .map(|c| format!("[dry-run] {}", c))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ExecutionResult::success(Some(output), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_echoes_commands() {
        let result = DryRunConnector
            .execute(
                "10.0.0.1",
                &["uci set dhcp.lan.limit=100".to_string(), "uci commit dhcp".to_string()],
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.output.as_deref(),
            Some("[dry-run] uci set dhcp.lan.limit=100\n[dry-run] uci commit dhcp")
        );
    }
}
