//! DevOps role: deployments, infrastructure and monitoring

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::services::{CommandRunner, CompletionRequest, CompletionService};
use crate::agent::{Role, TaskError, ensure_supported, required, required_str};
use crate::bus::WorkKind;
use crate::domain::{AgentType, Task, capability};

pub struct DevOpsRole {
    completion: Arc<dyn CompletionService>,
    runner: Arc<dyn CommandRunner>,
}

impl DevOpsRole {
    pub fn new(completion: Arc<dyn CompletionService>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { completion, runner }
    }

    async fn plan(&self, kind: WorkKind, context: &str, instructions: String, input: Value) -> Result<Value, TaskError> {
        self.completion
            .complete(CompletionRequest {
                kind,
                instructions,
                input,
            })
            .await
            .map_err(|e| TaskError::failed(context, e))
    }

    async fn prepare(&self, task: &Task) -> Result<Value, TaskError> {
        let environment = required_str(task, "environment")?;
        self.plan(
            WorkKind::Deployment,
            "Deployment preparation",
            format!("Prepare a deployment plan for the {} environment.", environment),
            json!({ "environment": environment, "artifacts": task.param("artifacts") }),
        )
        .await
    }

    /// Unlike test runs, a non-zero exit fails the deployment
    async fn execute(&self, task: &Task) -> Result<Value, TaskError> {
        let command = required_str(task, "command")?;
        let working_dir = task.param_str("workingDir").map(Path::new);
        let output = self
            .runner
            .run(command, working_dir)
            .await
            .map_err(|e| TaskError::failed("Deployment", e))?;
        if !output.success() {
            warn!(task_id = %task.id, exit_code = output.exit_code, "Deployment command failed");
            return Err(TaskError::Failed(format!(
                "Deployment command exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        info!(task_id = %task.id, "Deployment command succeeded");
        Ok(json!({
            "deployed": true,
            "stdout": output.stdout,
            "durationMs": output.duration_ms,
        }))
    }

    async fn provision(&self, task: &Task) -> Result<Value, TaskError> {
        let requirements = required(task, "requirements")?;
        self.plan(
            WorkKind::Deployment,
            "Infrastructure provisioning",
            "Produce infrastructure definitions meeting these requirements.".to_string(),
            json!({ "requirements": requirements, "provider": task.param("provider") }),
        )
        .await
    }

    async fn monitor(&self, task: &Task) -> Result<Value, TaskError> {
        let services = required(task, "services")?;
        self.plan(
            WorkKind::Monitoring,
            "Monitoring configuration",
            "Configure metrics, alerts and dashboards for these services.".to_string(),
            json!({ "services": services }),
        )
        .await
    }
}

#[async_trait]
impl Role for DevOpsRole {
    fn agent_type(&self) -> AgentType {
        AgentType::DevOps
    }

    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, task_type = %task.task_type, "DevOpsRole::handle_task: called");
        ensure_supported(self, task)?;
        match task.task_type.as_str() {
            capability::DEPLOYMENT_PREPARE => self.prepare(task).await,
            capability::DEPLOYMENT_EXECUTE => self.execute(task).await,
            capability::INFRASTRUCTURE_PROVISION => self.provision(task).await,
            _ => self.monitor(task).await,
        }
    }
}
