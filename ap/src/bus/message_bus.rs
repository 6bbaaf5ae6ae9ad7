//! MessageBus - in-process pub/sub router
//!
//! Subscriptions are keyed by the exact recipient string. A publish fans out
//! to every subscription for the recipient; each delivery runs as its own
//! task raced against the delivery timeout, so one slow or failing subscriber
//! never holds up the others. Delivery is at-most-once: a message for a
//! recipient nobody listens to is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, join_all};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{BusError, DeliveryError};
use super::message::{Message, MessageType};
use crate::domain::new_id;

/// Default per-delivery timeout
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5000;

/// Capacity of the observability channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Boxed subscriber callback
pub type Callback = Arc<dyn Fn(Message) -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>;

/// Handle returned by [`MessageBus::subscribe`]; pass it back to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub recipient: String,
}

struct Subscriber {
    id: String,
    callback: Callback,
}

/// Outcome of one publish
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// At least one subscriber handled the message
    pub delivered: bool,
    /// `[recipient]` when delivered, empty otherwise
    pub recipients: Vec<String>,
    /// Aggregated subscriber failures, if any
    pub error: Option<DeliveryError>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    fn undelivered() -> Self {
        Self {
            delivered: false,
            recipients: Vec::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Nobody was subscribed to the recipient
    pub fn no_subscribers(&self) -> bool {
        !self.delivered && self.error.is_none()
    }
}

/// Observability events
#[derive(Debug, Clone)]
pub enum BusEvent {
    Subscribed {
        subscription_id: String,
        recipient: String,
    },
    Unsubscribed {
        subscription_id: String,
        recipient: String,
    },
    Delivered {
        message_id: String,
        message_type: MessageType,
        recipient: String,
        delivered: bool,
        failures: usize,
    },
    Error {
        message_id: String,
        error: DeliveryError,
    },
}

/// In-process message router
pub struct MessageBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscriber>>>,
    delivery_timeout: Duration,
    event_tx: broadcast::Sender<BusEvent>,
    closed: AtomicBool,
}

impl MessageBus {
    /// Create a bus with the given per-delivery timeout
    pub fn new(delivery_timeout: Duration) -> Self {
        debug!(?delivery_timeout, "MessageBus::new: called");
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            delivery_timeout,
            event_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Register a callback for messages addressed to `recipient`
    ///
    /// Several callbacks may share a recipient; each gets every message.
    pub fn subscribe<F, Fut>(&self, recipient: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let recipient = recipient.into();
        let subscription = Subscription {
            id: new_id(),
            recipient: recipient.clone(),
        };
        debug!(%recipient, subscription_id = %subscription.id, "MessageBus::subscribe: called");

        let callback: Callback = Arc::new(move |message| Box::pin(callback(message)));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(recipient.clone())
            .or_default()
            .push(Subscriber {
                id: subscription.id.clone(),
                callback,
            });

        self.emit(BusEvent::Subscribed {
            subscription_id: subscription.id.clone(),
            recipient,
        });
        subscription
    }

    /// Remove one subscription; siblings on the same recipient are untouched
    ///
    /// Returns false when the subscription was not registered.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        debug!(recipient = %subscription.recipient, subscription_id = %subscription.id, "MessageBus::unsubscribe: called");
        let removed = {
            let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
            let Some(subscribers) = subscriptions.get_mut(&subscription.recipient) else {
                return false;
            };
            let before = subscribers.len();
            subscribers.retain(|s| s.id != subscription.id);
            let removed = subscribers.len() != before;
            if subscribers.is_empty() {
                subscriptions.remove(&subscription.recipient);
            }
            removed
        };

        if removed {
            self.emit(BusEvent::Unsubscribed {
                subscription_id: subscription.id.clone(),
                recipient: subscription.recipient.clone(),
            });
        }
        removed
    }

    /// Number of live subscriptions for `recipient`
    pub fn subscriber_count(&self, recipient: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(recipient)
            .map_or(0, Vec::len)
    }

    /// Deliver `message` to every subscriber of its recipient
    ///
    /// Fails only when the message is invalid. Shutdown clears the
    /// subscriptions, so a later publish is a silent drop.
    /// Subscriber failures and timeouts are reported in the result.
    pub async fn publish(&self, message: Message) -> Result<DeliveryResult, BusError> {
        let message_type = message.message_type();
        debug!(
            message_id = %message.id,
            %message_type,
            sender = %message.sender,
            recipient = %message.recipient,
            "MessageBus::publish: called"
        );

        message.validate()?;

        let callbacks: Vec<Callback> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.recipient)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();

        if callbacks.is_empty() {
            debug!(recipient = %message.recipient, "MessageBus::publish: no subscribers, dropping message");
            return Ok(DeliveryResult::undelivered());
        }

        let attempted = callbacks.len();
        let deliveries = callbacks
            .into_iter()
            .map(|callback| self.deliver(callback, message.clone()));
        let failures: Vec<DeliveryError> = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        for failure in &failures {
            warn!(message_id = %message.id, %message_type, error = %failure, "Delivery failed");
            self.emit(BusEvent::Error {
                message_id: message.id.clone(),
                error: failure.clone(),
            });
        }

        let failure_count = failures.len();
        let delivered = failure_count < attempted;
        let result = DeliveryResult {
            delivered,
            recipients: if delivered {
                vec![message.recipient.clone()]
            } else {
                Vec::new()
            },
            error: DeliveryError::aggregate(failures),
            timestamp: Utc::now(),
        };

        debug!(attempted, failure_count, delivered, "MessageBus::publish: settled");
        self.emit(BusEvent::Delivered {
            message_id: message.id,
            message_type,
            recipient: message.recipient,
            delivered,
            failures: failure_count,
        });
        Ok(result)
    }

    /// Run one callback on its own task and race it against the timeout
    ///
    /// A timed-out callback is not cancelled; it keeps running detached.
    async fn deliver(&self, callback: Callback, message: Message) -> Result<(), DeliveryError> {
        let recipient = message.recipient.clone();
        let handle = tokio::spawn(callback(message));

        match tokio::time::timeout(self.delivery_timeout, handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(DeliveryError::Failed {
                recipient,
                reason: e.to_string(),
            }),
            Ok(Err(join_error)) => Err(DeliveryError::Failed {
                recipient,
                reason: if join_error.is_panic() {
                    "subscriber panicked".to_string()
                } else {
                    join_error.to_string()
                },
            }),
            Err(_) => Err(DeliveryError::Timeout {
                recipient,
                timeout_ms: self.delivery_timeout.as_millis() as u64,
            }),
        }
    }

    /// Subscribe to observability events
    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        debug!("MessageBus::subscribe_events: called");
        self.event_tx.subscribe()
    }

    /// Forward observability events to `tracing` until the bus is dropped
    pub fn spawn_event_logger(&self) -> JoinHandle<()> {
        debug!("MessageBus::spawn_event_logger: called");
        let mut rx = self.subscribe_events();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BusEvent::Subscribed {
                        subscription_id,
                        recipient,
                    }) => info!(%recipient, %subscription_id, "bus: subscribed"),
                    Ok(BusEvent::Unsubscribed {
                        subscription_id,
                        recipient,
                    }) => info!(%recipient, %subscription_id, "bus: unsubscribed"),
                    Ok(BusEvent::Delivered {
                        message_id,
                        message_type,
                        recipient,
                        delivered,
                        failures,
                    }) => debug!(%message_id, %message_type, %recipient, delivered, failures, "bus: delivered"),
                    Ok(BusEvent::Error { message_id, error }) => warn!(%message_id, %error, "bus: delivery error"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "bus event logger lagged behind, missed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("bus event logger: channel closed, shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Drop every subscription and refuse further publishes. Idempotent.
    pub fn shutdown(&self) {
        debug!("MessageBus::shutdown: called");
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("MessageBus::shutdown: already shut down");
            return;
        }
        let dropped: usize = {
            let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
            let count = subscriptions.values().map(Vec::len).sum();
            subscriptions.clear();
            count
        };
        info!(dropped, "Message bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: BusEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS))
    }
}
