//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Fused pose updates, motion state changes |
//! | [`Topic::Perception`] | Tracked obstacle lists |
//! | [`Topic::Commands`] | Motor commands as issued to the bridge, actuation faults |
//! | [`Topic::SafetyAlerts`] | Alerts and emergency status snapshots |

use hauler_types::Event;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Perception,
    Commands,
    SafetyAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    safety_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (telemetry, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (safety_alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            perception,
            commands,
            safety_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`].
    ///
    /// Returns the number of receivers handed the event; `0` when nobody is
    /// listening, which is normal for read-only exports.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "no subscribers; event dropped");
                0
            }
        }
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Perception => &self.perception,
            Topic::Commands => &self.commands,
            Topic::SafetyAlerts => &self.safety_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Lagging is logged and skipped; `None` means the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered without waiting.
    ///
    /// Used from synchronous ticks that must not suspend.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(_) => break,
            }
        }
        events
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_types::{EventPayload, Pose};

    fn make_event(source: &str) -> Event {
        Event::new(source, EventPayload::PoseUpdate(Pose::at(1.0, 2.0, 0.0)))
    }

    #[test]
    fn publish_without_subscribers_is_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.publish_to(Topic::Telemetry, make_event("test")), 0);
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut sub1 = bus.subscribe_to(Topic::Telemetry);
        let mut sub2 = bus.subscribe_to(Topic::Telemetry);

        let event = make_event("hauler-perception::pose");
        assert_eq!(bus.publish_to(Topic::Telemetry, event.clone()), 2);

        assert_eq!(sub1.recv().await.unwrap().id, event.id);
        assert_eq!(sub2.recv().await.unwrap().id, event.id);
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SafetyAlerts);
        let _telemetry = bus.subscribe_to(Topic::Telemetry);

        bus.publish_to(Topic::Telemetry, make_event("hauler-perception::pose"));

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "SafetyAlerts must not see Telemetry events");
    }

    #[test]
    fn drain_returns_buffered_events_in_order() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_to(Topic::Commands);
        let first = make_event("a");
        let second = make_event("b");
        bus.publish_to(Topic::Commands, first.clone());
        bus.publish_to(Topic::Commands, second.clone());

        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, first.id);
        assert_eq!(drained[1].id, second.id);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn drain_survives_lag() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Perception);
        for _ in 0..20 {
            bus.publish_to(Topic::Perception, make_event("flood"));
        }
        let drained = slow.drain();
        assert_eq!(drained.len(), 4);
    }
}
