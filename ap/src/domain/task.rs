//! Task - a unit of work routed to an agent by capability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::new_id;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Assigned => write!(f, "ASSIGNED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(Self::Pending),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// A task as tracked by the coordinator and carried in assignment messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    /// Capability string this task requires, e.g. `code.generate`
    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// Carried for producers; scheduling is first-fit and ignores it
    #[serde(default)]
    pub priority: i32,

    /// Percent complete, 0-100
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub parameters: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    #[serde(default)]
    pub created_by: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    /// Create a pending task with a generated id
    pub fn new(task_type: impl Into<String>, created_by: impl Into<String>, parameters: Value) -> Self {
        Self::with_id(new_id(), task_type, created_by, parameters)
    }

    /// Create a pending task with an explicit id
    pub fn with_id(
        id: impl Into<String>,
        task_type: impl Into<String>,
        created_by: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            priority: 0,
            progress: 0,
            parameters,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            assigned_to: None,
            created_by: created_by.into(),
            dependencies: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Fetch a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Fetch a parameter of any shape
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_status_display_and_parse() {
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
    }

    #[test]
    fn test_task_serde_uses_wire_names() {
        let task = Task::with_id("42", "code.generate", "cli", json!({"prompt": "hello"}));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "code.generate");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["createdBy"], "cli");
        assert!(value.get("assignedTo").is_none());

        let parsed: Task = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_minimal_task_deserializes_with_defaults() {
        let task: Task = serde_json::from_value(json!({"id": "42", "type": "code.review"})).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.parameters.is_null());
        assert!(task.param_str("code").is_none());
    }

    #[test]
    fn test_param_accessors() {
        let task = Task::new("code.review", "cli", json!({"code": "fn main() {}", "focus": null}));
        assert_eq!(task.param_str("code"), Some("fn main() {}"));
        assert!(task.param("focus").is_none());
        assert!(!task.id.is_empty());
    }
}
