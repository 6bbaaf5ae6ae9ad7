//! Analyzer role: static code analysis

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::services::CodeParser;
use crate::agent::{Role, TaskError, ensure_supported, required_str};
use crate::domain::{AgentType, Task};

pub struct AnalyzerRole {
    parser: Arc<dyn CodeParser>,
}

impl AnalyzerRole {
    pub fn new(parser: Arc<dyn CodeParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Role for AnalyzerRole {
    fn agent_type(&self) -> AgentType {
        AgentType::Analyzer
    }

    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, task_type = %task.task_type, "AnalyzerRole::handle_task: called");
        ensure_supported(self, task)?;
        let path = PathBuf::from(required_str(task, "filePath")?);
        let analysis = self
            .parser
            .parse_file(&path)
            .await
            .map_err(|e| TaskError::failed("Code analysis", e))?;
        serde_json::to_value(analysis).map_err(|e| TaskError::Failed(e.to_string()))
    }
}
