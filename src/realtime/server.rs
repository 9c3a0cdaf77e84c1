use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{apply_client_frame, ServerFrame};
use crate::auth::{ClaimSet, IdentityForwarder, USER_PAYLOAD_HEADER, USER_PAYLOAD_SIGNATURE_HEADER};
use crate::events::{EventBus, SubscriptionSession};

/// Time a client has to complete the WebSocket upgrade after connecting.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts real-time connections and serves one session per connection.
pub struct RealtimeServer {
    bus: Arc<EventBus>,
    forwarder: IdentityForwarder,
    shutdown: CancellationToken,
}

impl RealtimeServer {
    pub fn new(bus: Arc<EventBus>, forwarder: IdentityForwarder, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            forwarder,
            shutdown,
        }
    }

    /// Runs the accept loop until the shutdown token is cancelled, then
    /// waits for every open connection to finish.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Real-time endpoint listening on ws://{}", addr);
        }
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        connections.spawn(async move { server.handle_connection(stream, addr).await });
                    }
                    Err(e) => warn!("Failed to accept real-time connection: {}", e),
                },
            }
        }
        drop(listener);
        connections.close();
        debug!("Waiting for {} real-time connection(s) to close", connections.len());
        connections.wait().await;
        info!("Real-time endpoint stopped");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let mut payload: Option<Vec<u8>> = None;
        let mut signature: Option<Vec<u8>> = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let headers = request.headers();
            payload = headers.get(USER_PAYLOAD_HEADER).map(|v| v.as_bytes().to_vec());
            signature = headers
                .get(USER_PAYLOAD_SIGNATURE_HEADER)
                .map(|v| v.as_bytes().to_vec());
            Ok(response)
        };

        let handshake = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            handshake = timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback)) => handshake,
        };
        let ws_stream = match handshake {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("WebSocket handshake with {} timed out", addr);
                return;
            }
        };

        let identity = self
            .forwarder
            .resolve(payload.as_deref(), signature.as_deref());
        self.run_session(ws_stream, addr, identity).await;
    }

    async fn run_session(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        identity: Option<ClaimSet>,
    ) {
        let mut session = SubscriptionSession::open(Arc::clone(&self.bus));
        info!(
            "Real-time session {} opened for {} ({})",
            session.id(),
            addr,
            identity.as_ref().map(ClaimSet::email).unwrap_or("anonymous")
        );

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut close_frame: Option<CloseFrame<'static>> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    close_frame = Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "server shutting down".into(),
                    });
                    break;
                }
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = apply_client_frame(&mut session, &text).to_text();
                        if ws_sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Real-time connection {} failed: {}", addr, e);
                        break;
                    }
                },
                delivered = session.next_event() => match delivered {
                    Some(Ok(event)) => {
                        let frame = ServerFrame::Event(event.as_ref()).to_text();
                        if ws_sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(overflow)) => {
                        let frame = ServerFrame::error(overflow.to_string()).to_text();
                        let _ = ws_sender.send(Message::Text(frame)).await;
                        close_frame = Some(CloseFrame {
                            code: CloseCode::Again,
                            reason: "subscriber overflowed".into(),
                        });
                        break;
                    }
                    None => break,
                },
            }
        }

        session.close();
        let _ = ws_sender.send(Message::Close(close_frame)).await;
        let _ = ws_sender.close().await;
    }
}
