//! CoordinatorAgent - capability-based task scheduler
//!
//! Tracks registered agents in registration order, a FIFO queue of pending
//! tasks, and at most one active task per agent. Tasks are handed out
//! first-fit: the first registered agent that is free and whose type covers
//! the task type gets it. Bookkeeping lives behind one std mutex that is
//! never held across a publish, because a publish can re-enter the
//! coordinator through the agent's replies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use eyre::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::failure::{FailureHandler, LogFailures};
use crate::agent::{AgentConfig, AgentCore, OutgoingMessage};
use crate::bus::{BROADCAST, COORDINATOR, Message, MessageBus, Payload, Subscription};
use crate::domain::{AgentStatePatch, AgentStatus, AgentType, Task, TaskStatus};
use crate::state::StateManager;

#[derive(Default)]
struct Bookkeeping {
    /// Agent id and type, in registration order
    registry: Vec<(String, AgentType)>,
    pending: VecDeque<Task>,
    /// Agent id to its active task
    active: HashMap<String, Task>,
    finished: Vec<Task>,
}

impl Bookkeeping {
    /// Pair queued tasks with free capable agents, marking them ASSIGNED
    fn plan_assignments(&mut self) -> Vec<(String, Task)> {
        let mut assignments = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.pending.len());

        while let Some(mut task) = self.pending.pop_front() {
            let agent_id = self
                .registry
                .iter()
                .find(|(id, agent_type)| !self.active.contains_key(id.as_str()) && agent_type.can_handle(&task.task_type))
                .map(|(id, _)| id.clone());

            match agent_id {
                Some(agent_id) => {
                    task.status = TaskStatus::Assigned;
                    task.assigned_to = Some(agent_id.clone());
                    task.start_time = Some(Utc::now());
                    self.active.insert(agent_id.clone(), task.clone());
                    assignments.push((agent_id, task));
                }
                None => waiting.push_back(task),
            }
        }

        self.pending = waiting;
        assignments
    }

    /// Undo an assignment that could not be delivered; the task goes back to the front
    fn requeue(&mut self, agent_id: &str, mut task: Task) {
        if self.active.get(agent_id).is_some_and(|t| t.id == task.id) {
            self.active.remove(agent_id);
        }
        task.status = TaskStatus::Pending;
        task.assigned_to = None;
        task.start_time = None;
        task.progress = 0;
        self.pending.push_front(task);
    }

    /// Take `agent_id`'s active task if it is `task_id`
    fn take_active(&mut self, agent_id: &str, task_id: &str) -> Option<Task> {
        if self.active.get(agent_id).is_some_and(|t| t.id == task_id) {
            self.active.remove(agent_id)
        } else {
            None
        }
    }
}

/// The scheduler agent, listening on "coordinator" and "broadcast"
pub struct CoordinatorAgent {
    core: AgentCore,
    book: Mutex<Bookkeeping>,
    failure_handler: Arc<dyn FailureHandler>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl CoordinatorAgent {
    pub fn new(bus: Arc<MessageBus>, state_manager: Arc<StateManager>, config: AgentConfig) -> Arc<Self> {
        Self::with_failure_handler(bus, state_manager, config, Arc::new(LogFailures))
    }

    pub fn with_failure_handler(
        bus: Arc<MessageBus>,
        state_manager: Arc<StateManager>,
        config: AgentConfig,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Arc<Self> {
        debug!("CoordinatorAgent::new: called");
        Arc::new(Self {
            core: AgentCore::with_id(COORDINATOR, AgentType::Coordinator, bus, state_manager, config),
            book: Mutex::new(Bookkeeping::default()),
            failure_handler,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listen on "coordinator" and "broadcast", go IDLE and announce readiness
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        debug!("CoordinatorAgent::initialize: called");
        let mut subscriptions = Vec::new();
        for recipient in [COORDINATOR, BROADCAST] {
            let weak = Arc::downgrade(self);
            subscriptions.push(self.core.bus().subscribe(recipient, move |message| {
                let coordinator = weak.upgrade();
                async move {
                    match coordinator {
                        Some(coordinator) => coordinator.handle_message(message).await,
                        None => Ok(()),
                    }
                }
            }));
        }
        let previous = std::mem::replace(
            &mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner),
            subscriptions,
        );
        for subscription in &previous {
            self.core.bus().unsubscribe(subscription);
        }

        self.core
            .update_state(AgentStatePatch::status(AgentStatus::Idle).with_type(AgentType::Coordinator))
            .await?;
        self.core
            .send(OutgoingMessage::new(
                BROADCAST,
                Payload::AgentReady {
                    agent_id: Some(self.id().to_string()),
                    acknowledged: false,
                },
            ))
            .await?;

        info!("Coordinator initialized");
        Ok(())
    }

    /// Stop listening and go SHUTDOWN
    pub async fn shutdown(&self) -> Result<()> {
        debug!("CoordinatorAgent::shutdown: called");
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner));
        for subscription in &subscriptions {
            self.core.bus().unsubscribe(subscription);
        }
        self.core.update_state(AgentStatePatch::status(AgentStatus::Shutdown)).await?;
        info!("Coordinator shut down");
        Ok(())
    }

    /// Queue a task as PENDING and try to hand it out
    pub async fn submit_task(&self, mut task: Task) -> Result<()> {
        debug!(task_id = %task.id, task_type = %task.task_type, "CoordinatorAgent::submit_task: called");
        task.status = TaskStatus::Pending;
        self.book().pending.push_back(task);
        self.assign_pending_tasks().await?;
        Ok(())
    }

    /// Hand queued tasks to free capable agents and return how many were delivered
    ///
    /// An assignment nobody receives drops the agent from the registry and
    /// puts the task back at the front of the queue.
    pub async fn assign_pending_tasks(&self) -> Result<usize> {
        debug!("CoordinatorAgent::assign_pending_tasks: called");
        let mut assigned = 0;
        loop {
            let assignments = self.book().plan_assignments();
            if assignments.is_empty() {
                break;
            }

            let mut requeued = false;
            let mut batch = assignments.into_iter();
            while let Some((agent_id, task)) = batch.next() {
                info!(task_id = %task.id, task_type = %task.task_type, %agent_id, "Assigning task");
                let outgoing = OutgoingMessage::new(agent_id.clone(), Payload::TaskAssignment(task.clone()));
                match self.core.send(outgoing).await {
                    Ok(result) if result.no_subscribers() => {
                        warn!(%agent_id, task_id = %task.id, "Agent no longer listening, requeueing task");
                        let mut book = self.book();
                        book.registry.retain(|(id, _)| id != &agent_id);
                        book.requeue(&agent_id, task);
                        requeued = true;
                    }
                    Ok(result) => {
                        if let Some(error) = result.error {
                            warn!(%agent_id, task_id = %task.id, %error, "Task assignment delivery reported failures");
                        }
                        assigned += 1;
                    }
                    Err(e) => {
                        // Nothing after this one was sent either; free every slot
                        // and restore the queue order
                        let mut book = self.book();
                        for (agent_id, task) in batch.rev() {
                            book.requeue(&agent_id, task);
                        }
                        book.requeue(&agent_id, task);
                        return Err(e);
                    }
                }
            }

            if !requeued {
                break;
            }
        }
        Ok(assigned)
    }

    /// Dispatch one message from "coordinator" or "broadcast"
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        debug!(
            message_type = %message.message_type(),
            sender = %message.sender,
            recipient = %message.recipient,
            "CoordinatorAgent::handle_message: called"
        );
        match message.payload {
            Payload::AgentRegister {
                ref agent_id,
                agent_type,
                ..
            } if message.recipient == COORDINATOR => self.on_register(&message, agent_id, agent_type).await,
            Payload::TaskStatus {
                ref task_id,
                status,
                progress,
            } if message.recipient == COORDINATOR => {
                self.on_status(&message.sender, task_id, status, progress);
                Ok(())
            }
            Payload::TaskComplete {
                ref task_id,
                ref result,
            } if message.recipient == COORDINATOR => self.on_complete(&message.sender, task_id, result.clone()).await,
            Payload::TaskError { ref task_id, ref error } if message.recipient == COORDINATOR => {
                self.on_error(&message.sender, task_id, error).await
            }
            Payload::TaskCancelled {
                ref task_id,
                ref reason,
            } if message.recipient == COORDINATOR => self.on_cancelled(task_id, reason.clone()).await,
            Payload::AgentShutdown { ref agent_id } if agent_id != self.id() => self.on_agent_shutdown(agent_id).await,
            _ => {
                debug!(message_type = %message.message_type(), "CoordinatorAgent::handle_message: ignoring");
                Ok(())
            }
        }
    }

    async fn on_register(&self, trigger: &Message, agent_id: &str, agent_type: AgentType) -> Result<()> {
        {
            let mut book = self.book();
            match book.registry.iter_mut().find(|(id, _)| id == agent_id) {
                Some(entry) => entry.1 = agent_type,
                None => book.registry.push((agent_id.to_string(), agent_type)),
            }
        }
        info!(%agent_id, %agent_type, "Agent registered");

        self.core
            .send(
                OutgoingMessage::new(
                    agent_id,
                    Payload::AgentReady {
                        agent_id: Some(agent_id.to_string()),
                        acknowledged: true,
                    },
                )
                .in_reply_to(trigger),
            )
            .await?;
        self.assign_pending_tasks().await?;
        Ok(())
    }

    fn on_status(&self, agent_id: &str, task_id: &str, status: TaskStatus, progress: u8) {
        let mut book = self.book();
        match book.active.get_mut(agent_id) {
            Some(task) if task.id == task_id => {
                task.status = status;
                task.progress = progress.min(100);
                debug!(%agent_id, %task_id, %status, progress, "CoordinatorAgent::on_status: updated");
            }
            _ => debug!(%agent_id, %task_id, "CoordinatorAgent::on_status: not the active task, ignoring"),
        }
    }

    async fn on_complete(&self, agent_id: &str, task_id: &str, result: Value) -> Result<()> {
        let found = {
            let mut book = self.book();
            match book.take_active(agent_id, task_id) {
                Some(mut task) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    task.progress = 100;
                    task.end_time = Some(Utc::now());
                    book.finished.push(task);
                    true
                }
                None => false,
            }
        };
        if found {
            info!(%agent_id, %task_id, "Task completed");
        } else {
            warn!(%agent_id, %task_id, "Completion for a task that is not active, ignoring");
        }
        self.assign_pending_tasks().await?;
        Ok(())
    }

    async fn on_error(&self, agent_id: &str, task_id: &str, error: &str) -> Result<()> {
        let failed = {
            let mut book = self.book();
            book.take_active(agent_id, task_id).map(|mut task| {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                task.end_time = Some(Utc::now());
                book.finished.push(task.clone());
                task
            })
        };
        match failed {
            Some(task) => {
                if let Err(e) = self.failure_handler.handle_failure(&task).await {
                    warn!(%task_id, error = %e, "Failure handler failed");
                }
            }
            None => warn!(%agent_id, %task_id, "Error for a task that is not active, ignoring"),
        }
        self.assign_pending_tasks().await?;
        Ok(())
    }

    async fn on_cancelled(&self, task_id: &str, reason: Option<String>) -> Result<()> {
        let notify = {
            let mut book = self.book();
            let mut cancelled = None;
            let mut notify = None;
            if let Some(pos) = book.pending.iter().position(|t| t.id == task_id) {
                cancelled = book.pending.remove(pos);
            } else if let Some(agent_id) = book
                .active
                .iter()
                .find(|(_, t)| t.id == task_id)
                .map(|(agent_id, _)| agent_id.clone())
            {
                cancelled = book.active.remove(&agent_id);
                notify = Some(agent_id);
            }
            match cancelled {
                Some(mut task) => {
                    task.status = TaskStatus::Cancelled;
                    task.end_time = Some(Utc::now());
                    book.finished.push(task);
                }
                None => warn!(%task_id, "Cancellation for an unknown task, ignoring"),
            }
            notify
        };

        if let Some(agent_id) = notify {
            info!(%task_id, %agent_id, "Active task cancelled");
            self.core
                .send(OutgoingMessage::new(
                    agent_id,
                    Payload::TaskCancelled {
                        task_id: task_id.to_string(),
                        reason,
                    },
                ))
                .await?;
        }
        self.assign_pending_tasks().await?;
        Ok(())
    }

    async fn on_agent_shutdown(&self, agent_id: &str) -> Result<()> {
        let removed = {
            let mut book = self.book();
            let before = book.registry.len();
            book.registry.retain(|(id, _)| id != agent_id);
            if let Some(task) = book.active.remove(agent_id) {
                book.requeue(agent_id, task);
            }
            before != book.registry.len()
        };
        if removed {
            info!(%agent_id, "Agent deregistered");
            self.assign_pending_tasks().await?;
        }
        Ok(())
    }

    /// Queued tasks in queue order
    pub fn pending_tasks(&self) -> Vec<Task> {
        self.book().pending.iter().cloned().collect()
    }

    pub fn active_task(&self, agent_id: &str) -> Option<Task> {
        self.book().active.get(agent_id).cloned()
    }

    pub fn active_tasks(&self) -> Vec<Task> {
        self.book().active.values().cloned().collect()
    }

    /// Completed, failed and cancelled tasks in the order they finished
    pub fn finished_tasks(&self) -> Vec<Task> {
        self.book().finished.clone()
    }

    pub fn registered_agents(&self) -> Vec<(String, AgentType)> {
        self.book().registry.clone()
    }
}
