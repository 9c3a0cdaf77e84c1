//! In-process event propagation.
//!
//! Mutation handlers publish [`Event`]s on the [`EventBus`]; every
//! [`SubscriptionSession`] subscribed to the event's [`Topic`] receives it and
//! streams it to its real-time client.

pub mod bus;
pub mod session;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;
use crate::models::Task;

pub use bus::{EventBus, SubscriptionHandle, SubscriptionId, DEFAULT_SUBSCRIBER_BUFFER};
pub use session::{SessionState, SubscriptionSession};

/// A named event category clients register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    TaskAdded,
    TaskUpdated,
    TaskDeleted,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::TaskAdded, Topic::TaskUpdated, Topic::TaskDeleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TaskAdded => "taskAdded",
            Topic::TaskUpdated => "taskUpdated",
            Topic::TaskDeleted => "taskDeleted",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == value)
            .ok_or_else(|| BusError::UnknownTopic(value.to_string()))
    }
}

/// What a mutation event carries: the task snapshot, or only its id once the
/// task is gone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Task(Task),
    TaskId(Uuid),
}

/// An immutable record of a committed mutation.
///
/// Events are shared between subscribers behind an `Arc` and never modified
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub topic: Topic,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: Topic, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
