//! One real-time connection's view of the event bus.

use std::sync::Arc;

use log::{debug, info};
use tokio_stream::{StreamExt, StreamMap};
use uuid::Uuid;

use super::{Event, EventBus, SubscriptionHandle, Topic};
use crate::error::BusError;

/// Lifecycle of a [`SubscriptionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection established, no subscriptions yet.
    Open,
    /// At least one subscription registered; events flow.
    Active,
    /// Teardown in progress; subscriptions are being released.
    Draining,
    /// Terminal. Nothing is delivered any more.
    Closed,
}

/// Binds one long-lived connection to a set of topic subscriptions.
///
/// At most one subscription per topic. Dropping the session closes it.
pub struct SubscriptionSession {
    id: Uuid,
    bus: Arc<EventBus>,
    state: SessionState,
    subscriptions: StreamMap<Topic, SubscriptionHandle>,
}

impl SubscriptionSession {
    pub fn open(bus: Arc<EventBus>) -> Self {
        let id = Uuid::new_v4();
        debug!("session {} opened", id);
        Self {
            id,
            bus,
            state: SessionState::Open,
            subscriptions: StreamMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.subscriptions.keys().copied().collect()
    }

    /// Registers interest in `topic`. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, topic: Topic) -> Result<bool, BusError> {
        self.ensure_accepting()?;
        if self.subscriptions.contains_key(&topic) {
            return Ok(false);
        }
        self.subscriptions.insert(topic, self.bus.subscribe(topic));
        self.state = SessionState::Active;
        Ok(true)
    }

    /// Releases the subscription on `topic`. Returns `false` if there was none.
    ///
    /// A session left without subscriptions goes back to `Open`.
    pub fn unsubscribe(&mut self, topic: Topic) -> Result<bool, BusError> {
        self.ensure_accepting()?;
        let Some(mut handle) = self.subscriptions.remove(&topic) else {
            return Ok(false);
        };
        handle.unsubscribe();
        if self.subscriptions.is_empty() {
            self.state = SessionState::Open;
        }
        Ok(true)
    }

    /// Waits for the next event on any subscribed topic.
    ///
    /// Pends while the session is `Open`. Returns `None` once the session is
    /// draining or closed, or when every subscription has been released by the
    /// bus.
    pub async fn next_event(&mut self) -> Option<Result<Arc<Event>, BusError>> {
        match self.state {
            SessionState::Open => std::future::pending().await,
            SessionState::Draining | SessionState::Closed => None,
            SessionState::Active => self.subscriptions.next().await.map(|(_, item)| item),
        }
    }

    /// Tears the session down: every bus subscription is released before this
    /// returns and anything still buffered is discarded.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Draining;
        for (_, handle) in self.subscriptions.iter_mut() {
            handle.unsubscribe();
        }
        self.subscriptions.clear();
        self.state = SessionState::Closed;
        info!("session {} closed", self.id);
    }

    fn ensure_accepting(&self) -> Result<(), BusError> {
        match self.state {
            SessionState::Open | SessionState::Active => Ok(()),
            SessionState::Draining | SessionState::Closed => Err(BusError::SessionClosed),
        }
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}
