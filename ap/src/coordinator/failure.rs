//! Escalation hook for failed tasks

use async_trait::async_trait;
use eyre::Result;
use tracing::warn;

use crate::domain::Task;

/// Called once per task that ends FAILED
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle_failure(&self, task: &Task) -> Result<()>;
}

/// Logs the failure and nothing else
#[derive(Debug, Clone, Default)]
pub struct LogFailures;

#[async_trait]
impl FailureHandler for LogFailures {
    async fn handle_failure(&self, task: &Task) -> Result<()> {
        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            assigned_to = ?task.assigned_to,
            error = ?task.error,
            "Task failed"
        );
        Ok(())
    }
}
