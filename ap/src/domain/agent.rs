//! Agent state, the partial patches merged into it, and the history records they leave

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use statestore::HistoryRecord;

use super::capability;
use super::task::Task;

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    Initializing,
    Ready,
    Idle,
    Busy,
    Working,
    Error,
    Shutdown,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Ready => write!(f, "READY"),
            Self::Idle => write!(f, "IDLE"),
            Self::Busy => write!(f, "BUSY"),
            Self::Working => write!(f, "WORKING"),
            Self::Error => write!(f, "ERROR"),
            Self::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INITIALIZING" => Ok(Self::Initializing),
            "READY" => Ok(Self::Ready),
            "IDLE" => Ok(Self::Idle),
            "BUSY" => Ok(Self::Busy),
            "WORKING" => Ok(Self::Working),
            "ERROR" => Ok(Self::Error),
            "SHUTDOWN" => Ok(Self::Shutdown),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

/// The fixed set of agent roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    Coordinator,
    Developer,
    Analyzer,
    Architect,
    Tester,
    #[serde(rename = "DEVOPS")]
    DevOps,
    /// State created implicitly for an id nobody has described yet
    #[default]
    Unknown,
}

impl AgentType {
    /// Task types an agent of this type can take on
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Developer => capability::DEVELOPER,
            Self::Analyzer => capability::ANALYZER,
            Self::Architect => capability::ARCHITECT,
            Self::Tester => capability::TESTER,
            Self::DevOps => capability::DEVOPS,
            Self::Coordinator | Self::Unknown => &[],
        }
    }

    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities().contains(&task_type)
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "COORDINATOR"),
            Self::Developer => write!(f, "DEVELOPER"),
            Self::Analyzer => write!(f, "ANALYZER"),
            Self::Architect => write!(f, "ARCHITECT"),
            Self::Tester => write!(f, "TESTER"),
            Self::DevOps => write!(f, "DEVOPS"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "COORDINATOR" => Ok(Self::Coordinator),
            "DEVELOPER" => Ok(Self::Developer),
            "ANALYZER" => Ok(Self::Analyzer),
            "ARCHITECT" => Ok(Self::Architect),
            "TESTER" => Ok(Self::Tester),
            "DEVOPS" => Ok(Self::DevOps),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Unknown agent type: {}", s)),
        }
    }
}

/// Authoritative state of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: String,

    #[serde(rename = "type", default)]
    pub agent_type: AgentType,

    #[serde(default)]
    pub status: AgentStatus,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub current_task: Option<Task>,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default)]
    pub metrics: Map<String, Value>,

    pub last_update: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AgentState {
    /// The state an unknown id starts from
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: AgentType::default(),
            status: AgentStatus::default(),
            tasks: Vec::new(),
            current_task: None,
            capabilities: BTreeSet::new(),
            metrics: Map::new(),
            last_update: Utc::now(),
            last_error: None,
        }
    }
}

/// Deserialize a present field (including `null`) as `Some(..)`
///
/// Combined with `#[serde(default)]` this tells "absent" (`None`) apart from
/// "explicitly null" (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A shallow partial update to an [`AgentState`]
///
/// Every field is optional; `None` leaves the current value alone. The
/// clearable fields use `Option<Option<_>>` so `Some(None)` resets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatePatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,

    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Option<Task>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Option<String>>,
}

impl AgentStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only changes the status
    pub fn status(status: AgentStatus) -> Self {
        Self::new().with_status(status)
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    /// Set (`Some`) or clear (`None`) the current task
    pub fn with_current_task(mut self, task: Option<Task>) -> Self {
        self.current_task = Some(task);
        self
    }

    /// Set (`Some`) or clear (`None`) the last error
    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn with_metrics(mut self, metrics: Map<String, Value>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_last_update(mut self, at: DateTime<Utc>) -> Self {
        self.last_update = Some(at);
        self
    }

    /// Merge onto `state`, field by field
    ///
    /// `lastUpdate` is taken from the patch when supplied, otherwise left as is.
    pub fn apply_to(&self, state: &mut AgentState) {
        if let Some(agent_type) = self.agent_type {
            state.agent_type = agent_type;
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(tasks) = &self.tasks {
            state.tasks = tasks.clone();
        }
        if let Some(current_task) = &self.current_task {
            state.current_task = current_task.clone();
        }
        if let Some(capabilities) = &self.capabilities {
            state.capabilities = capabilities.clone();
        }
        if let Some(metrics) = &self.metrics {
            state.metrics = metrics.clone();
        }
        if let Some(last_update) = self.last_update {
            state.last_update = last_update;
        }
        if let Some(last_error) = &self.last_error {
            state.last_error = last_error.clone();
        }
    }
}

/// History record: the patch applied to one agent and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub agent_id: String,
    pub state: AgentStatePatch,
    pub timestamp: DateTime<Utc>,
}

impl StateUpdate {
    pub fn new(agent_id: impl Into<String>, state: AgentStatePatch) -> Self {
        Self {
            agent_id: agent_id.into(),
            state,
            timestamp: Utc::now(),
        }
    }
}

impl HistoryRecord for StateUpdate {
    fn owner_id(&self) -> &str {
        &self.agent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_type_capabilities() {
        assert!(AgentType::Developer.can_handle("code.generate"));
        assert!(AgentType::Developer.can_handle("code.review"));
        assert!(!AgentType::Developer.can_handle("code.analyze"));
        assert!(AgentType::DevOps.can_handle("monitoring.configure"));
        assert!(AgentType::Coordinator.capabilities().is_empty());
        assert!(!AgentType::Unknown.can_handle("code.generate"));
    }

    #[test]
    fn test_agent_type_wire_names() {
        assert_eq!(serde_json::to_string(&AgentType::DevOps).unwrap(), "\"DEVOPS\"");
        assert_eq!("devops".parse::<AgentType>().unwrap(), AgentType::DevOps);
        assert_eq!(AgentType::Architect.to_string(), "ARCHITECT");
    }

    #[test]
    fn test_agent_status_parse() {
        assert_eq!("working".parse::<AgentStatus>().unwrap(), AgentStatus::Working);
        assert!("sleeping".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_new_state_defaults() {
        let state = AgentState::new("dev-1");
        assert_eq!(state.status, AgentStatus::Initializing);
        assert_eq!(state.agent_type, AgentType::Unknown);
        assert!(state.tasks.is_empty());
        assert!(state.capabilities.is_empty());
        assert!(state.metrics.is_empty());
        assert!(state.current_task.is_none());
    }

    #[test]
    fn test_patch_is_shallow_merge() {
        let mut state = AgentState::new("dev-1");
        AgentStatePatch::status(AgentStatus::Idle)
            .with_type(AgentType::Developer)
            .with_capabilities(["code.generate"])
            .apply_to(&mut state);

        AgentStatePatch::status(AgentStatus::Working).apply_to(&mut state);

        assert_eq!(state.status, AgentStatus::Working);
        assert_eq!(state.agent_type, AgentType::Developer);
        assert!(state.capabilities.contains("code.generate"));
    }

    #[test]
    fn test_patch_clears_current_task() {
        let mut state = AgentState::new("dev-1");
        let task = Task::with_id("42", "code.generate", "test", json!({}));
        AgentStatePatch::new().with_current_task(Some(task)).apply_to(&mut state);
        assert_eq!(state.current_task.as_ref().map(|t| t.id.as_str()), Some("42"));

        // Absent leaves it alone
        AgentStatePatch::status(AgentStatus::Idle).apply_to(&mut state);
        assert!(state.current_task.is_some());

        AgentStatePatch::new().with_current_task(None).apply_to(&mut state);
        assert!(state.current_task.is_none());
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let absent: AgentStatePatch = serde_json::from_value(json!({"status": "IDLE"})).unwrap();
        assert_eq!(absent.current_task, None);
        assert_eq!(absent.last_error, None);

        let null: AgentStatePatch = serde_json::from_value(json!({"currentTask": null, "lastError": null})).unwrap();
        assert_eq!(null.current_task, Some(None));
        assert_eq!(null.last_error, Some(None));

        // And it serializes back the same way
        let value = serde_json::to_value(&null).unwrap();
        assert_eq!(value, json!({"currentTask": null, "lastError": null}));
        assert_eq!(serde_json::to_value(&absent).unwrap(), json!({"status": "IDLE"}));
    }

    #[test]
    fn test_state_update_owner() {
        let update = StateUpdate::new("dev-1", AgentStatePatch::status(AgentStatus::Busy));
        assert_eq!(update.owner_id(), "dev-1");
    }
}
