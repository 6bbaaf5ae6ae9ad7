//! AgentPlane - wires bus, store, state manager and coordinator from a [`Config`]

use std::sync::{Arc, Mutex, PoisonError};

use eyre::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, Role};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::coordinator::{CoordinatorAgent, FailureHandler, LogFailures};
use crate::domain::{AgentState, StateUpdate, Task};
use crate::state::{AgentStore, StateManager, StateManagerOptions};
use statestore::FileStateStore;

/// A running control plane
pub struct AgentPlane {
    config: Config,
    bus: Arc<MessageBus>,
    state_manager: Arc<StateManager>,
    coordinator: Arc<CoordinatorAgent>,
    agents: Mutex<Vec<Arc<Agent>>>,
    event_logger: JoinHandle<()>,
}

impl AgentPlane {
    /// Start with the file store under `state.storage-dir`
    pub async fn start(config: Config) -> Result<Self> {
        let store: Arc<AgentStore> = Arc::new(FileStateStore::<AgentState, StateUpdate>::new(
            &config.state.storage_dir,
            config.state.store_options(),
        ));
        Self::start_with(config, store, Arc::new(LogFailures)).await
    }

    /// Start with a caller-supplied store and failure handler
    pub async fn start_with(
        config: Config,
        store: Arc<AgentStore>,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Result<Self> {
        debug!(?config, "AgentPlane::start_with: called");
        let bus = Arc::new(MessageBus::new(config.bus.delivery_timeout()));
        let event_logger = bus.spawn_event_logger();

        let state_manager = Arc::new(StateManager::new(
            Arc::clone(&bus),
            store,
            StateManagerOptions {
                history_limit: config.state.history_limit,
            },
        ));
        state_manager
            .initialize()
            .await
            .context("Failed to initialize state manager")?;

        let coordinator = CoordinatorAgent::with_failure_handler(
            Arc::clone(&bus),
            Arc::clone(&state_manager),
            config.agent.clone(),
            failure_handler,
        );
        coordinator.initialize().await.context("Failed to initialize coordinator")?;

        info!("AgentPlane started");
        Ok(Self {
            config,
            bus,
            state_manager,
            coordinator,
            agents: Mutex::new(Vec::new()),
            event_logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn coordinator(&self) -> &Arc<CoordinatorAgent> {
        &self.coordinator
    }

    /// Create, initialize and register an agent running `role`
    pub async fn spawn_agent(&self, role: Arc<dyn Role>) -> Result<Arc<Agent>> {
        let agent = Agent::new(
            role,
            Arc::clone(&self.bus),
            Arc::clone(&self.state_manager),
            self.config.agent.clone(),
        );
        self.start_agent(agent).await
    }

    /// Like [`spawn_agent`](Self::spawn_agent) with a chosen id
    pub async fn spawn_agent_with_id(&self, id: &str, role: Arc<dyn Role>) -> Result<Arc<Agent>> {
        let agent = Agent::with_id(
            id,
            role,
            Arc::clone(&self.bus),
            Arc::clone(&self.state_manager),
            self.config.agent.clone(),
        );
        self.start_agent(agent).await
    }

    async fn start_agent(&self, agent: Arc<Agent>) -> Result<Arc<Agent>> {
        debug!(agent_id = %agent.id(), agent_type = %agent.agent_type(), "AgentPlane::start_agent: called");
        agent
            .initialize()
            .await
            .context(format!("Failed to initialize agent {}", agent.id()))?;
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&agent));
        Ok(agent)
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Hand a task to the coordinator
    pub async fn submit_task(&self, task: Task) -> Result<()> {
        self.coordinator.submit_task(task).await
    }

    /// Stop agents, then the coordinator, then flush state and close the bus
    pub async fn shutdown(&self) -> Result<()> {
        debug!("AgentPlane::shutdown: called");
        let agents = std::mem::take(&mut *self.agents.lock().unwrap_or_else(PoisonError::into_inner));
        for agent in agents {
            if let Err(e) = agent.shutdown().await {
                warn!(agent_id = %agent.id(), error = %e, "Agent shutdown failed");
            }
        }
        if let Err(e) = self.coordinator.shutdown().await {
            warn!(error = %e, "Coordinator shutdown failed");
        }
        self.state_manager
            .shutdown()
            .await
            .context("Failed to shut down state manager")?;
        self.bus.shutdown();
        self.event_logger.abort();
        info!("AgentPlane stopped");
        Ok(())
    }
}
