//! AgentCore - identity, messaging and state plumbing shared by every agent

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use eyre::Result;
use tokio::sync::broadcast;
use tracing::debug;

use super::config::AgentConfig;
use crate::bus::{DeliveryResult, Message, MessageBus, MessageMetadata, Payload};
use crate::domain::{AgentState, AgentStatePatch, AgentType, new_id};
use crate::state::StateManager;

/// Local notifications from one agent
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged(AgentState),
}

/// A message about to be sent; the core fills in the rest
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient: String,
    pub payload: Payload,
    pub correlation_id: Option<String>,
}

impl OutgoingMessage {
    pub fn new(recipient: impl Into<String>, payload: Payload) -> Self {
        Self {
            recipient: recipient.into(),
            payload,
            correlation_id: None,
        }
    }

    /// Reuse the correlation id of the message this one answers, if it had one
    pub fn in_reply_to(mut self, trigger: &Message) -> Self {
        self.correlation_id = trigger.metadata.correlation_id.clone();
        self
    }
}

/// Identity plus bus and state manager access
pub struct AgentCore {
    id: String,
    agent_type: AgentType,
    config: AgentConfig,
    bus: Arc<MessageBus>,
    state_manager: Arc<StateManager>,
    state: Mutex<AgentState>,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl AgentCore {
    /// Create a core with a fresh id
    pub fn new(agent_type: AgentType, bus: Arc<MessageBus>, state_manager: Arc<StateManager>, config: AgentConfig) -> Self {
        Self::with_id(new_id(), agent_type, bus, state_manager, config)
    }

    pub fn with_id(
        id: impl Into<String>,
        agent_type: AgentType,
        bus: Arc<MessageBus>,
        state_manager: Arc<StateManager>,
        config: AgentConfig,
    ) -> Self {
        let id = id.into();
        debug!(%id, %agent_type, "AgentCore::new: called");
        let mut state = AgentState::new(id.clone());
        state.agent_type = agent_type;
        let (event_tx, _) = broadcast::channel(64);
        Self {
            id,
            agent_type,
            config,
            bus,
            state_manager,
            state: Mutex::new(state),
            event_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Locally cached copy of this agent's state
    pub fn state(&self) -> AgentState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Publish a message from this agent
    ///
    /// Fills id, timestamp and sender, records the agent type, and carries the
    /// correlation id over or generates a new one.
    pub async fn send(&self, outgoing: OutgoingMessage) -> Result<DeliveryResult> {
        let message = Message {
            id: new_id(),
            timestamp: Utc::now(),
            sender: self.id.clone(),
            recipient: outgoing.recipient,
            payload: outgoing.payload,
            metadata: MessageMetadata {
                correlation_id: Some(outgoing.correlation_id.unwrap_or_else(new_id)),
                agent_type: Some(self.agent_type),
                ..Default::default()
            },
        };
        debug!(
            agent_id = %self.id,
            message_type = %message.message_type(),
            recipient = %message.recipient,
            "AgentCore::send: called"
        );
        Ok(self.bus.publish(message).await?)
    }

    /// Merge `patch` into the state manager, then into the local state
    ///
    /// The local copy is left alone when the state manager rejects the update.
    pub async fn update_state(&self, patch: AgentStatePatch) -> Result<AgentState> {
        debug!(agent_id = %self.id, status = ?patch.status, "AgentCore::update_state: called");
        let merged = self.state_manager.update_state(&self.id, patch.clone()).await?;

        let local = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            patch.apply_to(&mut state);
            state.last_update = merged.last_update;
            state.clone()
        };
        let _ = self.event_tx.send(AgentEvent::StateChanged(local.clone()));
        Ok(local)
    }

    /// Subscribe to this agent's local events
    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::COORDINATOR;
    use crate::domain::{AgentStatus, StateUpdate};
    use crate::state::{AgentStore, StateManagerOptions};
    use statestore::MemoryStateStore;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<MessageBus>, Arc<StateManager>) {
        let bus = Arc::new(MessageBus::default());
        let store: Arc<AgentStore> = Arc::new(MemoryStateStore::<AgentState, StateUpdate>::default());
        let manager = Arc::new(StateManager::new(Arc::clone(&bus), store, StateManagerOptions::default()));
        manager.initialize().await.unwrap();
        (bus, manager)
    }

    #[tokio::test]
    async fn test_send_fills_envelope() {
        let (bus, manager) = setup().await;
        let core = AgentCore::with_id("dev-1", AgentType::Developer, Arc::clone(&bus), manager, AgentConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(COORDINATOR, move |message| {
            let tx = tx.clone();
            async move {
                tx.send(message)?;
                Ok(())
            }
        });

        let payload = Payload::AgentShutdown {
            agent_id: "dev-1".into(),
        };
        core.send(OutgoingMessage::new(COORDINATOR, payload.clone())).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.sender, "dev-1");
        assert_eq!(first.metadata.agent_type, Some(AgentType::Developer));
        assert!(first.correlation_id().is_some());

        // A reply reuses the triggering correlation id
        core.send(OutgoingMessage::new(COORDINATOR, payload).in_reply_to(&first))
            .await
            .unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.correlation_id(), first.correlation_id());
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_update_state_merges_and_notifies() {
        let (bus, manager) = setup().await;
        let core = AgentCore::with_id(
            "dev-1",
            AgentType::Developer,
            bus,
            Arc::clone(&manager),
            AgentConfig::default(),
        );
        let mut events = core.subscribe_events();

        let local = core
            .update_state(AgentStatePatch::status(AgentStatus::Idle).with_capabilities(["code.generate"]))
            .await
            .unwrap();
        assert_eq!(local.status, AgentStatus::Idle);
        assert_eq!(local.agent_type, AgentType::Developer);

        let AgentEvent::StateChanged(changed) = events.recv().await.unwrap();
        assert_eq!(changed.status, AgentStatus::Idle);

        let stored = manager.get_state("dev-1").await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Idle);
        assert!(stored.capabilities.contains("code.generate"));
    }

    #[tokio::test]
    async fn test_rejected_update_keeps_local_state() {
        let bus = Arc::new(MessageBus::default());
        let store: Arc<AgentStore> = Arc::new(crate::state::mock::FlakyStore::failing_after(1));
        let manager = Arc::new(StateManager::new(Arc::clone(&bus), store, StateManagerOptions::default()));
        manager.initialize().await.unwrap();
        let core = AgentCore::with_id("dev-1", AgentType::Developer, bus, Arc::clone(&manager), AgentConfig::default());

        core.update_state(AgentStatePatch::status(AgentStatus::Idle)).await.unwrap();
        assert!(core.update_state(AgentStatePatch::status(AgentStatus::Working)).await.is_err());

        assert_eq!(core.state().status, AgentStatus::Idle);
        let stored = manager.get_state("dev-1").await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Idle);
        assert_eq!(core.state().last_update, stored.last_update);
    }
}
