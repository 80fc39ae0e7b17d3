// Agent event system
//
// Agents publish lifecycle events on their own bus; the coordinator forwards
// every agent bus into one fan-out bus that transports subscribe to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{AgentRuntimeState, AgentStatus};
use crate::domain::task::{LogLevel, Payload};

/// Lifecycle event, carrying a snapshot of the originating agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StatusChanged {
        agent: AgentRuntimeState,
        previous: AgentStatus,
    },
    #[serde(rename_all = "camelCase")]
    TaskLog {
        agent: AgentRuntimeState,
        task_id: Uuid,
        level: LogLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        agent: AgentRuntimeState,
        task_id: Uuid,
        output: Payload,
    },
    #[serde(rename_all = "camelCase")]
    TaskFailed {
        agent: AgentRuntimeState,
        task_id: Uuid,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Thinking {
        agent: AgentRuntimeState,
        task_id: Uuid,
        content: String,
    },
}

impl AgentEvent {
    pub fn agent(&self) -> &AgentRuntimeState {
        match self {
            AgentEvent::StatusChanged { agent, .. }
            | AgentEvent::TaskLog { agent, .. }
            | AgentEvent::TaskCompleted { agent, .. }
            | AgentEvent::TaskFailed { agent, .. }
            | AgentEvent::Thinking { agent, .. } => agent,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::StatusChanged { .. } => "status_changed",
            AgentEvent::TaskLog { .. } => "task_log",
            AgentEvent::TaskCompleted { .. } => "task_completed",
            AgentEvent::TaskFailed { .. } => "task_failed",
            AgentEvent::Thinking { .. } => "thinking",
        }
    }
}

pub type Listener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Where a subscription delivers events
#[derive(Clone)]
enum Sink {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<AgentEvent>),
}

/// Synchronous publish/subscribe channel
///
/// Listeners run on the emitting task, in registration order, once per
/// event. Emission works on a snapshot of the listener list, so a listener
/// may subscribe or unsubscribe without deadlocking the bus. Channel
/// subscriptions whose receiver was dropped are removed on the next emit.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(Subscription, Sink)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(Sink::Callback(Arc::new(listener)))
    }

    fn add(&self, sink: Sink) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((subscription, sink));
        subscription
    }

    /// Returns false when the subscription was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(s, _)| *s != subscription);
        listeners.len() != before
    }

    pub fn emit(&self, event: &AgentEvent) {
        let snapshot: Vec<(Subscription, Sink)> = self.listeners.read().clone();

        let mut closed = Vec::new();
        for (subscription, sink) in snapshot {
            match sink {
                Sink::Callback(listener) => listener(event),
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(subscription);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.listeners.write().retain(|(s, _)| !closed.contains(s));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Subscribe an unbounded channel; events arrive in emission order
    ///
    /// Dropping the receiver ends the subscription.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(Sink::Channel(tx)), rx)
    }
}
