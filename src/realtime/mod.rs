//! WebSocket endpoint of the tasks service.
//!
//! Each connection owns one [`SubscriptionSession`](crate::events::SubscriptionSession).
//! Clients subscribe to topics with JSON frames (see [`protocol`]) and receive
//! every event published on those topics afterwards.

pub mod protocol;
pub mod server;

pub use protocol::{apply_client_frame, ClientFrame, ServerFrame};
pub use server::RealtimeServer;
