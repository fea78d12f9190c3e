// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Bot Lifecycle Events
//
// In-memory event streaming over tokio broadcast channels. Events are
// published after the corresponding change has been persisted; nothing is
// replayed after a restart.

use crate::domain::bot::BotId;
use crate::domain::events::BotLifecycleEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to bot lifecycle events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BotLifecycleEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow subscribers lose the oldest events once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: BotLifecycleEvent) {
        debug!(bot_id = %event.bot_id(), "Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all lifecycle events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single bot
    pub fn subscribe_bot(&self, bot_id: BotId) -> BotEventReceiver {
        BotEventReceiver {
            receiver: self.sender.subscribe(),
            bot_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all lifecycle events
pub struct EventReceiver {
    receiver: broadcast::Receiver<BotLifecycleEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<BotLifecycleEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<BotLifecycleEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one bot
pub struct BotEventReceiver {
    receiver: broadcast::Receiver<BotLifecycleEvent>,
    bot_id: BotId,
}

impl BotEventReceiver {
    pub async fn recv(&mut self) -> Result<BotLifecycleEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.bot_id() == self.bot_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bot::BotStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let bot_id = BotId::new();

        event_bus.publish(BotLifecycleEvent::StatusChanged {
            bot_id,
            from: BotStatus::Starting,
            to: BotStatus::Running,
            changed_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        match received {
            BotLifecycleEvent::StatusChanged { bot_id: id, to, .. } => {
                assert_eq!(id, bot_id);
                assert_eq!(to, BotStatus::Running);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bot_filtered_subscription() {
        let event_bus = EventBus::new(10);
        let watched = BotId::new();
        let mut receiver = event_bus.subscribe_bot(watched);

        event_bus.publish(BotLifecycleEvent::BotTerminated {
            bot_id: BotId::new(),
            terminated_at: Utc::now(),
        });
        event_bus.publish(BotLifecycleEvent::BotTerminated {
            bot_id: watched,
            terminated_at: Utc::now(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.bot_id(), watched);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(BotLifecycleEvent::BotTerminated {
            bot_id: BotId::new(),
            terminated_at: Utc::now(),
        });
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
