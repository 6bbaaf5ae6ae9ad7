//! Developer role: code generation and review

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::services::{CompletionRequest, CompletionService};
use crate::agent::{Role, TaskError, ensure_supported, required_str};
use crate::bus::WorkKind;
use crate::domain::{AgentType, Task, capability};

pub struct DeveloperRole {
    completion: Arc<dyn CompletionService>,
}

impl DeveloperRole {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    async fn generate(&self, task: &Task) -> Result<Value, TaskError> {
        let prompt = required_str(task, "prompt")?;
        let language = task.param_str("language").unwrap_or("rust");
        let request = CompletionRequest {
            kind: WorkKind::CodeGeneration,
            instructions: format!("Generate {} code for the following request.", language),
            input: json!({ "prompt": prompt, "language": language, "context": task.param("context") }),
        };
        self.completion
            .complete(request)
            .await
            .map_err(|e| TaskError::failed("Code generation", e))
    }

    async fn review(&self, task: &Task) -> Result<Value, TaskError> {
        let code = required_str(task, "code")?;
        let request = CompletionRequest {
            kind: WorkKind::CodeReview,
            instructions: "Review this code for bugs, readability and security problems.".to_string(),
            input: json!({ "code": code, "focus": task.param("focus") }),
        };
        self.completion
            .complete(request)
            .await
            .map_err(|e| TaskError::failed("Code review", e))
    }
}

#[async_trait]
impl Role for DeveloperRole {
    fn agent_type(&self) -> AgentType {
        AgentType::Developer
    }

    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, task_type = %task.task_type, "DeveloperRole::handle_task: called");
        ensure_supported(self, task)?;
        match task.task_type.as_str() {
            capability::CODE_GENERATE => self.generate(task).await,
            _ => self.review(task).await,
        }
    }
}
