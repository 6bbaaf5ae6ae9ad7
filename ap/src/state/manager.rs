//! StateManager - actor that owns the agent state map, the history and the store
//!
//! All mutations are serialized through the actor, which also serializes every
//! call into the store. Broadcasting and observer notification happen on the
//! caller's side after the actor replies, so a subscriber may call back into
//! the manager without deadlocking it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use statestore::{DEFAULT_HISTORY_LIMIT, StateMap, StateStore};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{StateCommand, StateError, StateQuery, StateResponse};
use crate::bus::{BROADCAST, Message, MessageBus, Payload, STATE_MANAGER};
use crate::domain::{AgentState, AgentStatePatch, StateUpdate};

/// Store holding agent states and their update history
pub type AgentStore = dyn StateStore<State = AgentState, Update = StateUpdate>;

/// Event broadcast when state changes
#[derive(Debug, Clone)]
pub enum StateEvent {
    Updated(StateUpdate),
    Cleared,
}

/// StateManager options
#[derive(Debug, Clone)]
pub struct StateManagerOptions {
    /// Maximum number of history records kept in memory
    pub history_limit: usize,
}

impl Default for StateManagerOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

type ObserverFn = Arc<dyn Fn(&StateUpdate) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    handlers: Vec<(u64, ObserverFn)>,
}

/// Handle returned by [`StateManager::on_state_update`]
pub struct StateObserver {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl StateObserver {
    /// Stop receiving updates
    pub fn unregister(self) {
        debug!(id = self.id, "StateObserver::unregister: called");
        if let Some(observers) = self.observers.upgrade() {
            observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

struct Running {
    tx: mpsc::Sender<StateCommand>,
    actor: JoinHandle<()>,
}

/// Authoritative view of every agent's state
pub struct StateManager {
    bus: Arc<MessageBus>,
    store: Arc<AgentStore>,
    options: StateManagerOptions,
    running: tokio::sync::Mutex<Option<Running>>,
    event_tx: broadcast::Sender<StateEvent>,
    observers: Arc<Mutex<Observers>>,
}

impl StateManager {
    pub fn new(bus: Arc<MessageBus>, store: Arc<AgentStore>, options: StateManagerOptions) -> Self {
        debug!(history_limit = options.history_limit, "StateManager::new: called");
        let (event_tx, _) = broadcast::channel(256);
        Self {
            bus,
            store,
            options,
            running: tokio::sync::Mutex::new(None),
            event_tx,
            observers: Arc::new(Mutex::new(Observers::default())),
        }
    }

    /// Load persisted state and start the actor. Idempotent.
    pub async fn initialize(&self) -> StateResponse<()> {
        debug!("StateManager::initialize: called");
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("StateManager::initialize: already initialized");
            return Ok(());
        }

        self.store.initialize().await?;
        let states = self.store.get_all_states().await?;
        let history: VecDeque<StateUpdate> = self
            .store
            .get_recent_history(Some(self.options.history_limit))
            .await?
            .into();

        let (tx, rx) = mpsc::channel(256);
        let actor = Actor {
            store: Arc::clone(&self.store),
            states,
            history,
            history_limit: self.options.history_limit,
        };
        info!(
            states = actor.states.len(),
            history = actor.history.len(),
            "StateManager initialized"
        );
        let actor = tokio::spawn(actor.run(rx));

        *running = Some(Running { tx, actor });
        Ok(())
    }

    /// Shut the store down and return to the uninitialized state
    ///
    /// No-op when not initialized.
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("StateManager::shutdown: called");
        let Some(running) = self.running.lock().await.take() else {
            debug!("StateManager::shutdown: not initialized");
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        running
            .tx
            .send(StateCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        let result = reply_rx.await.map_err(|_| StateError::ChannelError)?;

        drop(running.tx);
        if let Err(e) = running.actor.await {
            warn!(error = %e, "StateManager actor ended abnormally");
        }
        info!("StateManager shut down");
        result
    }

    pub async fn is_initialized(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn sender(&self) -> StateResponse<mpsc::Sender<StateCommand>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.tx.clone())
            .ok_or(StateError::NotInitialized)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let tx = self.sender().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx)).await.map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Merge `patch` into the agent's state and return the result
    ///
    /// Unknown ids start from the default state. The change is persisted,
    /// recorded in history, broadcast as STATE_UPDATE and passed to observers.
    pub async fn update_state(&self, agent_id: &str, patch: AgentStatePatch) -> StateResponse<AgentState> {
        debug!(%agent_id, status = ?patch.status, "StateManager::update_state: called");
        let (state, update) = self
            .request(|reply| StateCommand::Update {
                agent_id: agent_id.to_string(),
                patch,
                reply,
            })
            .await?;

        self.broadcast(&update).await;
        self.notify_observers(&update);
        let _ = self.event_tx.send(StateEvent::Updated(update));
        Ok(state)
    }

    async fn broadcast(&self, update: &StateUpdate) {
        let message = Message::new(STATE_MANAGER, BROADCAST, Payload::StateUpdate(update.clone()));
        match self.bus.publish(message).await {
            Ok(result) => {
                if let Some(error) = result.error {
                    warn!(agent_id = %update.agent_id, %error, "State update broadcast had delivery failures");
                }
            }
            Err(e) => debug!(agent_id = %update.agent_id, error = %e, "StateManager::broadcast: not published"),
        }
    }

    fn notify_observers(&self, update: &StateUpdate) {
        let handlers: Vec<ObserverFn> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(update);
        }
    }

    /// Current state of one agent, or `None` if it was never seen
    pub async fn get_state(&self, agent_id: &str) -> StateResponse<Option<AgentState>> {
        debug!(%agent_id, "StateManager::get_state: called");
        self.request(|reply| StateCommand::Get {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_all_states(&self) -> StateResponse<StateMap<AgentState>> {
        debug!("StateManager::get_all_states: called");
        self.request(|reply| StateCommand::GetAll { reply }).await
    }

    /// States matching every set filter in `query`
    pub async fn query_states(&self, query: StateQuery) -> StateResponse<Vec<AgentState>> {
        debug!(?query, "StateManager::query_states: called");
        self.request(|reply| StateCommand::Query { query, reply }).await
    }

    /// History for one agent, newest first
    pub async fn get_state_history(&self, agent_id: &str, limit: Option<usize>) -> StateResponse<Vec<StateUpdate>> {
        debug!(%agent_id, ?limit, "StateManager::get_state_history: called");
        self.request(|reply| StateCommand::History {
            agent_id: agent_id.to_string(),
            limit,
            reply,
        })
        .await
    }

    /// History across all agents, newest first
    pub async fn get_recent_history(&self, limit: Option<usize>) -> StateResponse<Vec<StateUpdate>> {
        debug!(?limit, "StateManager::get_recent_history: called");
        self.request(|reply| StateCommand::RecentHistory { limit, reply }).await
    }

    /// Drop all states and history, in memory and in the store
    pub async fn clear(&self) -> StateResponse<()> {
        debug!("StateManager::clear: called");
        self.request(|reply| StateCommand::Clear { reply }).await?;
        let _ = self.event_tx.send(StateEvent::Cleared);
        info!("State cleared");
        Ok(())
    }

    /// Register a synchronous observer for every applied update
    pub fn on_state_update<F>(&self, handler: F) -> StateObserver
    where
        F: Fn(&StateUpdate) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.next_id += 1;
        let id = observers.next_id;
        debug!(id, "StateManager::on_state_update: called");
        observers.handlers.push((id, Arc::new(handler)));
        StateObserver {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }
}

/// The task that owns the state
struct Actor {
    store: Arc<AgentStore>,
    states: StateMap<AgentState>,
    /// Newest first
    history: VecDeque<StateUpdate>,
    history_limit: usize,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<StateCommand>) {
        debug!("StateManager actor started");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                StateCommand::Update { agent_id, patch, reply } => {
                    debug!(%agent_id, "actor_loop: Update command");
                    let result = self.update(agent_id, patch).await;
                    let _ = reply.send(result);
                }

                StateCommand::Get { agent_id, reply } => {
                    debug!(%agent_id, "actor_loop: Get command");
                    let _ = reply.send(Ok(self.states.get(&agent_id).cloned()));
                }

                StateCommand::GetAll { reply } => {
                    debug!("actor_loop: GetAll command");
                    let _ = reply.send(Ok(self.states.clone()));
                }

                StateCommand::Query { query, reply } => {
                    debug!(?query, "actor_loop: Query command");
                    let matching = self.states.values().filter(|s| query.matches(s)).cloned().collect();
                    let _ = reply.send(Ok(matching));
                }

                StateCommand::History { agent_id, limit, reply } => {
                    debug!(%agent_id, ?limit, "actor_loop: History command");
                    let matching = self.history.iter().filter(|u| u.agent_id == agent_id);
                    let history = match limit {
                        Some(limit) => matching.take(limit).cloned().collect(),
                        None => matching.cloned().collect(),
                    };
                    let _ = reply.send(Ok(history));
                }

                StateCommand::RecentHistory { limit, reply } => {
                    debug!(?limit, "actor_loop: RecentHistory command");
                    let limit = limit.unwrap_or(self.history.len());
                    let _ = reply.send(Ok(self.history.iter().take(limit).cloned().collect()));
                }

                StateCommand::Clear { reply } => {
                    debug!("actor_loop: Clear command");
                    self.states.clear();
                    self.history.clear();
                    let result = self.store.clear().await.map_err(StateError::from);
                    let _ = reply.send(result);
                }

                StateCommand::Shutdown { reply } => {
                    debug!("actor_loop: Shutdown command");
                    let result = self.store.shutdown().await.map_err(StateError::from);
                    let _ = reply.send(result);
                    break;
                }
            }
        }

        debug!("StateManager actor stopped");
    }

    async fn update(&mut self, agent_id: String, patch: AgentStatePatch) -> StateResponse<(AgentState, StateUpdate)> {
        let now = Utc::now();
        let mut state = self
            .states
            .get(&agent_id)
            .cloned()
            .unwrap_or_else(|| AgentState::new(agent_id.clone()));
        patch.apply_to(&mut state);
        state.last_update = patch.last_update.unwrap_or(now);

        let update = StateUpdate {
            agent_id: agent_id.clone(),
            state: patch,
            timestamp: now,
        };

        // Memory only changes once the store has accepted the write
        self.store.save_state(&agent_id, state.clone()).await?;
        self.store.save_state_update(update.clone()).await?;

        self.states.insert(agent_id.clone(), state.clone());
        self.history.push_front(update.clone());
        self.history.truncate(self.history_limit);

        Ok((state, update))
    }
}
