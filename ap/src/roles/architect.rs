//! Architect role: architecture review

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::services::{CompletionRequest, CompletionService};
use crate::agent::{Role, TaskError, ensure_supported, required};
use crate::bus::WorkKind;
use crate::domain::{AgentType, Task};

pub struct ArchitectRole {
    completion: Arc<dyn CompletionService>,
}

impl ArchitectRole {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl Role for ArchitectRole {
    fn agent_type(&self) -> AgentType {
        AgentType::Architect
    }

    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, task_type = %task.task_type, "ArchitectRole::handle_task: called");
        ensure_supported(self, task)?;
        let codebase = required(task, "codebase")?;
        let request = CompletionRequest {
            kind: WorkKind::ArchitectureReview,
            instructions: "Review the architecture: structure, dependencies, scalability and maintainability."
                .to_string(),
            input: json!({ "codebase": codebase, "requirements": task.param("requirements") }),
        };
        self.completion
            .complete(request)
            .await
            .map_err(|e| TaskError::failed("Architecture review", e))
    }
}
