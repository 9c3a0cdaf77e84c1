//! JSON frames exchanged over a real-time connection.

use serde::{Deserialize, Serialize};

use crate::events::{Event, SubscriptionSession, Topic};

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// A frame sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame<'a> {
    Subscribed { topic: Topic },
    Unsubscribed { topic: Topic },
    Event(&'a Event),
    Error { message: String },
}

impl ServerFrame<'_> {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"frame serialization failed: {}"}}"#, e)
        })
    }
}

/// Applies one client text frame to `session` and returns the reply.
///
/// Unparsable frames and unknown topics produce an error frame; the
/// connection stays open.
pub fn apply_client_frame(session: &mut SubscriptionSession, text: &str) -> ServerFrame<'static> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return ServerFrame::error(format!("invalid frame: {}", e)),
    };

    let result = match frame {
        ClientFrame::Subscribe { topic } => topic
            .parse::<Topic>()
            .and_then(|topic| session.subscribe(topic).map(|_| ServerFrame::Subscribed { topic })),
        ClientFrame::Unsubscribe { topic } => topic.parse::<Topic>().and_then(|topic| {
            session
                .unsubscribe(topic)
                .map(|_| ServerFrame::Unsubscribed { topic })
        }),
    };
    result.unwrap_or_else(|e| ServerFrame::error(e.to_string()))
}
