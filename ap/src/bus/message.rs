//! Messages carried by the bus
//!
//! The payload is a tagged enum; its variant is the message type. On the wire
//! a message looks like:
//!
//! ```json
//! {
//!   "id": "...", "timestamp": "...", "sender": "coordinator", "recipient": "dev-1",
//!   "type": "TASK_ASSIGNMENT", "payload": { "id": "42", "type": "code.generate", ... },
//!   "metadata": { "correlationId": "...", "agentType": "COORDINATOR" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::BusError;
use crate::domain::{AgentType, StateUpdate, Task, TaskStatus, new_id};

/// Reserved fan-out recipient
pub const BROADCAST: &str = "broadcast";

/// Reserved recipient of the scheduler
pub const COORDINATOR: &str = "coordinator";

/// Sender name used for state change notifications
pub const STATE_MANAGER: &str = "state-manager";

/// Kinds of opaque work a `Work` payload can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkKind {
    CodeAnalysis,
    CodeGeneration,
    CodeReview,
    ArchitectureReview,
    TestGeneration,
    TestExecution,
    Deployment,
    Monitoring,
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeAnalysis => write!(f, "CODE_ANALYSIS"),
            Self::CodeGeneration => write!(f, "CODE_GENERATION"),
            Self::CodeReview => write!(f, "CODE_REVIEW"),
            Self::ArchitectureReview => write!(f, "ARCHITECTURE_REVIEW"),
            Self::TestGeneration => write!(f, "TEST_GENERATION"),
            Self::TestExecution => write!(f, "TEST_EXECUTION"),
            Self::Deployment => write!(f, "DEPLOYMENT"),
            Self::Monitoring => write!(f, "MONITORING"),
        }
    }
}

/// Message type tag, derived from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    AgentRegister,
    AgentReady,
    AgentError,
    AgentShutdown,
    TaskAssignment,
    TaskStatus,
    TaskComplete,
    TaskError,
    TaskCancelled,
    StateUpdate,
    Work(WorkKind),
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentRegister => write!(f, "AGENT_REGISTER"),
            Self::AgentReady => write!(f, "AGENT_READY"),
            Self::AgentError => write!(f, "AGENT_ERROR"),
            Self::AgentShutdown => write!(f, "AGENT_SHUTDOWN"),
            Self::TaskAssignment => write!(f, "TASK_ASSIGNMENT"),
            Self::TaskStatus => write!(f, "TASK_STATUS"),
            Self::TaskComplete => write!(f, "TASK_COMPLETE"),
            Self::TaskError => write!(f, "TASK_ERROR"),
            Self::TaskCancelled => write!(f, "TASK_CANCELLED"),
            Self::StateUpdate => write!(f, "STATE_UPDATE"),
            Self::Work(kind) => write!(f, "{}", kind),
        }
    }
}

/// Message body, one variant per message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Payload {
    AgentRegister {
        agent_id: String,
        agent_type: AgentType,
        capabilities: Vec<String>,
    },
    AgentReady {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default)]
        acknowledged: bool,
    },
    AgentError {
        agent_id: String,
        error: String,
    },
    AgentShutdown {
        agent_id: String,
    },
    TaskAssignment(Task),
    TaskStatus {
        task_id: String,
        status: TaskStatus,
        #[serde(default)]
        progress: u8,
    },
    TaskComplete {
        task_id: String,
        #[serde(default)]
        result: Value,
    },
    TaskError {
        task_id: String,
        error: String,
    },
    TaskCancelled {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    StateUpdate(StateUpdate),
    Work {
        kind: WorkKind,
        #[serde(default)]
        data: Value,
    },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AgentRegister { .. } => MessageType::AgentRegister,
            Self::AgentReady { .. } => MessageType::AgentReady,
            Self::AgentError { .. } => MessageType::AgentError,
            Self::AgentShutdown { .. } => MessageType::AgentShutdown,
            Self::TaskAssignment(_) => MessageType::TaskAssignment,
            Self::TaskStatus { .. } => MessageType::TaskStatus,
            Self::TaskComplete { .. } => MessageType::TaskComplete,
            Self::TaskError { .. } => MessageType::TaskError,
            Self::TaskCancelled { .. } => MessageType::TaskCancelled,
            Self::StateUpdate(_) => MessageType::StateUpdate,
            Self::Work { kind, .. } => MessageType::Work(*kind),
        }
    }
}

/// Routing metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Type of the sending agent, when the sender is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,

    /// Anything else a producer wants to carry along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A routed message; immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create a message with a fresh id and the current time
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload,
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.correlation_id.as_deref()
    }

    /// Reject messages that cannot be routed
    pub fn validate(&self) -> Result<(), BusError> {
        let mut missing = Vec::new();
        if self.sender.trim().is_empty() {
            missing.push("sender");
        }
        if self.recipient.trim().is_empty() {
            missing.push("recipient");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BusError::InvalidMessage(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_from_payload() {
        let message = Message::new(
            "coordinator",
            "dev-1",
            Payload::TaskAssignment(Task::with_id("42", "code.generate", "cli", json!({}))),
        );
        assert_eq!(message.message_type(), MessageType::TaskAssignment);
        assert_eq!(message.message_type().to_string(), "TASK_ASSIGNMENT");

        let work = Payload::Work {
            kind: WorkKind::TestExecution,
            data: Value::Null,
        };
        assert_eq!(work.message_type().to_string(), "TEST_EXECUTION");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut message = Message::new("", "dev-1", Payload::AgentShutdown { agent_id: "x".into() });
        let err = message.validate().unwrap_err();
        assert!(matches!(err, BusError::InvalidMessage(_)));
        assert!(err.to_string().starts_with("Invalid message format"));

        message.sender = "a".into();
        message.recipient = " ".into();
        assert!(message.validate().is_err());

        message.recipient = "b".into();
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_wire_format() {
        let message = Message::new(
            "dev-1",
            COORDINATOR,
            Payload::TaskComplete {
                task_id: "42".into(),
                result: json!({"ok": true}),
            },
        )
        .with_correlation_id("corr-1");

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "TASK_COMPLETE");
        assert_eq!(value["payload"]["taskId"], "42");
        assert_eq!(value["payload"]["result"]["ok"], true);
        assert_eq!(value["metadata"]["correlationId"], "corr-1");

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_parse_register_from_json() {
        let message: Message = serde_json::from_value(json!({
            "id": "m-1",
            "timestamp": "2026-01-01T00:00:00Z",
            "sender": "dev-1",
            "recipient": "coordinator",
            "type": "AGENT_REGISTER",
            "payload": {"agentId": "dev-1", "agentType": "DEVELOPER", "capabilities": ["code.generate"]}
        }))
        .unwrap();

        assert_eq!(message.message_type(), MessageType::AgentRegister);
        assert_eq!(message.correlation_id(), None);
        match message.payload {
            Payload::AgentRegister { agent_type, .. } => assert_eq!(agent_type, AgentType::Developer),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
