//! Agent - a worker that runs tasks with a [`Role`] inside the uniform task protocol
//!
//! On TASK_ASSIGNMENT the agent records the task, goes WORKING, reports
//! IN_PROGRESS to the coordinator and runs the role. Success resets it to IDLE
//! and sends TASK_COMPLETE; failure sets ERROR (with `lastError`) and sends
//! TASK_ERROR. The local state is reset before the outcome is sent, so an
//! assignment triggered by that outcome is never overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eyre::Result;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::core::{AgentCore, OutgoingMessage};
use super::role::Role;
use crate::bus::{BROADCAST, COORDINATOR, Message, MessageBus, Payload, Subscription};
use crate::domain::{AgentStatePatch, AgentStatus, AgentType, Task, TaskStatus};
use crate::state::StateManager;

/// A worker agent
pub struct Agent {
    core: AgentCore,
    role: Arc<dyn Role>,
    subscription: Mutex<Option<Subscription>>,
    registered: AtomicBool,
}

impl Agent {
    /// Create an agent with a fresh id
    pub fn new(role: Arc<dyn Role>, bus: Arc<MessageBus>, state_manager: Arc<StateManager>, config: AgentConfig) -> Arc<Self> {
        let core = AgentCore::new(role.agent_type(), bus, state_manager, config);
        Self::from_core(core, role)
    }

    /// Create an agent with a caller-chosen id
    pub fn with_id(
        id: impl Into<String>,
        role: Arc<dyn Role>,
        bus: Arc<MessageBus>,
        state_manager: Arc<StateManager>,
        config: AgentConfig,
    ) -> Arc<Self> {
        let core = AgentCore::with_id(id, role.agent_type(), bus, state_manager, config);
        Self::from_core(core, role)
    }

    fn from_core(core: AgentCore, role: Arc<dyn Role>) -> Arc<Self> {
        debug!(agent_id = %core.id(), agent_type = %core.agent_type(), "Agent::new: called");
        Arc::new(Self {
            core,
            role,
            subscription: Mutex::new(None),
            registered: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn agent_type(&self) -> AgentType {
        self.core.agent_type()
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    /// The coordinator acknowledged our registration
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Subscribe to our own id, go IDLE, and register with the coordinator
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        debug!(agent_id = %self.id(), "Agent::initialize: called");
        let weak = Arc::downgrade(self);
        let subscription = self.core.bus().subscribe(self.id(), move |message| {
            let agent = weak.upgrade();
            async move {
                match agent {
                    Some(agent) => agent.handle_message(message).await,
                    None => Ok(()),
                }
            }
        });
        if let Some(previous) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription)
        {
            self.core.bus().unsubscribe(&previous);
        }

        let capabilities = self.role.capabilities();
        self.core
            .update_state(
                AgentStatePatch::status(AgentStatus::Idle)
                    .with_type(self.agent_type())
                    .with_capabilities(capabilities.iter().copied()),
            )
            .await?;

        self.core
            .send(OutgoingMessage::new(
                COORDINATOR,
                Payload::AgentRegister {
                    agent_id: self.id().to_string(),
                    agent_type: self.agent_type(),
                    capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                },
            ))
            .await?;

        info!(agent_id = %self.id(), agent_type = %self.agent_type(), "Agent initialized");
        Ok(())
    }

    /// Dispatch one message addressed to this agent
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        debug!(
            agent_id = %self.id(),
            message_type = %message.message_type(),
            sender = %message.sender,
            "Agent::handle_message: called"
        );
        match &message.payload {
            Payload::TaskAssignment(task) => self.handle_assignment(&message, task.clone()).await,
            Payload::AgentReady { acknowledged, .. } => {
                if *acknowledged {
                    self.registered.store(true, Ordering::SeqCst);
                    info!(agent_id = %self.id(), "Registration acknowledged");
                }
                Ok(())
            }
            Payload::TaskCancelled { task_id, reason } => {
                // In-flight work cannot be interrupted
                info!(agent_id = %self.id(), %task_id, ?reason, "Task cancelled by coordinator");
                Ok(())
            }
            _ => {
                debug!(message_type = %message.message_type(), "Agent::handle_message: ignoring");
                Ok(())
            }
        }
    }

    /// Run one assigned task; TASK_COMPLETE or TASK_ERROR is always sent back
    async fn handle_assignment(&self, trigger: &Message, mut task: Task) -> Result<()> {
        info!(agent_id = %self.id(), task_id = %task.id, task_type = %task.task_type, "Task assigned");
        task.status = TaskStatus::InProgress;

        let outcome = match self
            .core
            .update_state(AgentStatePatch::status(AgentStatus::Working).with_current_task(Some(task.clone())))
            .await
        {
            Ok(_) => {
                self.report_progress(trigger, &task).await;
                self.role.handle_task(&task).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("Failed to record task start: {}", e)),
        };

        // The local reset happens before the outcome goes out, so a follow-up
        // assignment triggered by it is never overwritten
        let outcome = match outcome {
            Ok(result) => match self
                .core
                .update_state(
                    AgentStatePatch::status(AgentStatus::Idle)
                        .with_current_task(None)
                        .with_last_error(None),
                )
                .await
            {
                Ok(_) => Ok(result),
                Err(e) => Err(format!("Failed to reset agent state: {}", e)),
            },
            Err(error) => Err(error),
        };

        let payload = match outcome {
            Ok(result) => {
                info!(agent_id = %self.id(), task_id = %task.id, "Task completed");
                Payload::TaskComplete {
                    task_id: task.id.clone(),
                    result,
                }
            }
            Err(error) => {
                warn!(agent_id = %self.id(), task_id = %task.id, %error, "Task failed");
                if let Err(e) = self
                    .core
                    .update_state(
                        AgentStatePatch::status(AgentStatus::Error)
                            .with_current_task(None)
                            .with_last_error(Some(error.clone())),
                    )
                    .await
                {
                    warn!(agent_id = %self.id(), task_id = %task.id, error = %e, "Failed to record task failure");
                }
                Payload::TaskError {
                    task_id: task.id.clone(),
                    error,
                }
            }
        };

        self.core
            .send(OutgoingMessage::new(COORDINATOR, payload).in_reply_to(trigger))
            .await?;
        Ok(())
    }

    async fn report_progress(&self, trigger: &Message, task: &Task) {
        let status = OutgoingMessage::new(
            COORDINATOR,
            Payload::TaskStatus {
                task_id: task.id.clone(),
                status: TaskStatus::InProgress,
                progress: 0,
            },
        )
        .in_reply_to(trigger);
        if let Err(e) = self.core.send(status).await {
            warn!(agent_id = %self.id(), task_id = %task.id, error = %e, "Failed to report task progress");
        }
    }

    /// Go SHUTDOWN, announce it on broadcast, and stop receiving messages
    pub async fn shutdown(&self) -> Result<()> {
        debug!(agent_id = %self.id(), "Agent::shutdown: called");
        self.core.update_state(AgentStatePatch::status(AgentStatus::Shutdown)).await?;
        self.core
            .send(OutgoingMessage::new(
                BROADCAST,
                Payload::AgentShutdown {
                    agent_id: self.id().to_string(),
                },
            ))
            .await?;

        let subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(subscription) = subscription {
            self.core.bus().unsubscribe(&subscription);
        }
        info!(agent_id = %self.id(), "Agent shut down");
        Ok(())
    }
}
