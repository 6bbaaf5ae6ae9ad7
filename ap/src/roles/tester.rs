//! Tester role: test generation and execution

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::services::{CommandRunner, CompletionRequest, CompletionService};
use crate::agent::{Role, TaskError, ensure_supported, required_str};
use crate::bus::WorkKind;
use crate::domain::{AgentType, Task, capability};

pub struct TesterRole {
    completion: Arc<dyn CompletionService>,
    runner: Arc<dyn CommandRunner>,
}

impl TesterRole {
    pub fn new(completion: Arc<dyn CompletionService>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { completion, runner }
    }

    async fn generate(&self, task: &Task) -> Result<Value, TaskError> {
        let code = required_str(task, "code")?;
        let test_type = task.param_str("testType").unwrap_or("unit");
        let request = CompletionRequest {
            kind: WorkKind::TestGeneration,
            instructions: format!("Write {} tests covering the following code.", test_type),
            input: json!({ "code": code, "testType": test_type, "framework": task.param("framework") }),
        };
        self.completion
            .complete(request)
            .await
            .map_err(|e| TaskError::failed("Test generation", e))
    }

    /// A failing test run is a result, not an error
    async fn execute(&self, task: &Task) -> Result<Value, TaskError> {
        let command = required_str(task, "command")?;
        let working_dir = task.param_str("workingDir").map(Path::new);
        let output = self
            .runner
            .run(command, working_dir)
            .await
            .map_err(|e| TaskError::failed("Test execution", e))?;
        info!(task_id = %task.id, exit_code = output.exit_code, "Test run finished");
        Ok(json!({
            "passed": output.success(),
            "exitCode": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "durationMs": output.duration_ms,
        }))
    }
}

#[async_trait]
impl Role for TesterRole {
    fn agent_type(&self) -> AgentType {
        AgentType::Tester
    }

    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, task_type = %task.task_type, "TesterRole::handle_task: called");
        ensure_supported(self, task)?;
        match task.task_type.as_str() {
            capability::TEST_GENERATE => self.generate(task).await,
            _ => self.execute(task).await,
        }
    }
}
