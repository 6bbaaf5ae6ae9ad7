//! Role - the strategy an [`Agent`](super::Agent) runs tasks with

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{AgentType, Task};

/// Task execution failure, reported through a TASK_ERROR message
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{agent_type} agent cannot handle task type '{task_type}'")]
    Unsupported { agent_type: AgentType, task_type: String },

    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Wrap a collaborator failure, keeping its full cause chain in the message
    pub fn failed(context: &str, err: eyre::Report) -> Self {
        Self::Failed(format!("{} failed: {:#}", context, err))
    }
}

/// Role-specific behaviour inside the uniform task protocol
#[async_trait]
pub trait Role: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Task types this role accepts
    fn capabilities(&self) -> &'static [&'static str] {
        self.agent_type().capabilities()
    }

    /// Perform the work for `task` and return its result
    async fn handle_task(&self, task: &Task) -> Result<Value, TaskError>;
}

/// Fetch a required string parameter
pub fn required_str<'a>(task: &'a Task, name: &str) -> Result<&'a str, TaskError> {
    match task.param(name) {
        None => Err(TaskError::MissingParameter(name.to_string())),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(TaskError::MissingParameter(name.to_string())),
        Some(_) => Err(TaskError::InvalidParameter {
            name: name.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// Fetch a required parameter of any shape
pub fn required<'a>(task: &'a Task, name: &str) -> Result<&'a Value, TaskError> {
    task.param(name).ok_or_else(|| TaskError::MissingParameter(name.to_string()))
}

/// Reject task types outside `role`'s capabilities
pub fn ensure_supported(role: &dyn Role, task: &Task) -> Result<(), TaskError> {
    if role.capabilities().contains(&task.task_type.as_str()) {
        Ok(())
    } else {
        Err(TaskError::Unsupported {
            agent_type: role.agent_type(),
            task_type: task.task_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_str() {
        let task = Task::new("code.review", "test", json!({"code": "x", "blank": " ", "n": 3}));
        assert_eq!(required_str(&task, "code").unwrap(), "x");
        assert!(matches!(required_str(&task, "missing"), Err(TaskError::MissingParameter(_))));
        assert!(matches!(required_str(&task, "blank"), Err(TaskError::MissingParameter(_))));
        assert!(matches!(
            required_str(&task, "n"),
            Err(TaskError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = TaskError::Unsupported {
            agent_type: AgentType::Tester,
            task_type: "code.generate".into(),
        };
        assert_eq!(err.to_string(), "TESTER agent cannot handle task type 'code.generate'");

        let err = TaskError::failed("Code generation", eyre::eyre!("rate limited"));
        assert_eq!(err.to_string(), "Code generation failed: rate limited");
    }
}
