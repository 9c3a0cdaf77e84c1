//! Real-time bridge between clients and the tasks service.
//!
//! The credential is verified during the WebSocket handshake, taken from
//! `Authorization: Bearer <token>` or a `token` query parameter. A rejected
//! handshake is answered with the same status and JSON body as a rejected
//! HTTP request. Accepted connections are relayed frame by frame to the
//! tasks service's real-time endpoint with the verified identity forwarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::ResponseError;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::{bearer_credential, ClaimSet, IdentityForwarder, TokenVerifier};
use crate::error::{AppError, AuthError};
use crate::realtime::server::HANDSHAKE_TIMEOUT;
use crate::realtime::ServerFrame;

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
enum BridgeError {
    #[error(transparent)]
    Identity(#[from] AuthError),
    #[error("identity cannot be sent as a header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("tasks real-time endpoint unreachable: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("tasks real-time endpoint did not answer within {0:?}")]
    Timeout(Duration),
}

pub struct RealtimeBridge {
    verifier: TokenVerifier,
    forwarder: IdentityForwarder,
    upstream_url: Url,
    shutdown: CancellationToken,
}

impl RealtimeBridge {
    pub fn new(
        verifier: TokenVerifier,
        forwarder: IdentityForwarder,
        upstream_url: Url,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            verifier,
            forwarder,
            upstream_url,
            shutdown,
        }
    }

    /// Runs the accept loop until the shutdown token is cancelled, then
    /// waits for every bridged connection to finish.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "Real-time bridge listening on ws://{}, relaying to {}",
                addr, self.upstream_url
            );
        }
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let bridge = Arc::clone(&self);
                        connections.spawn(async move { bridge.handle_connection(stream, addr).await });
                    }
                    Err(e) => warn!("Failed to accept bridge connection: {}", e),
                },
            }
        }
        drop(listener);
        connections.close();
        connections.wait().await;
        info!("Real-time bridge stopped");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let mut identity: Option<ClaimSet> = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match self.verifier.authenticate(request_credential(request)) {
                Ok(claims) => {
                    identity = Some(claims);
                    Ok(response)
                }
                Err(err) => {
                    debug!("Rejected real-time handshake from {}: {}", addr, err);
                    Err(rejection(err))
                }
            }
        };

        let handshake = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            handshake = timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback)) => handshake,
        };
        let client = match handshake {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!("Bridge handshake with {} ended: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("Bridge handshake with {} timed out", addr);
                return;
            }
        };
        let Some(claims) = identity else {
            return;
        };

        match self.connect_upstream(&claims).await {
            Ok(upstream) => {
                info!("Bridging real-time connection for {} from {}", claims.email(), addr);
                self.relay(client, upstream).await;
            }
            Err(e) => {
                warn!("Real-time bridge for {} failed: {}", addr, e);
                let mut client = client;
                let frame = ServerFrame::error("real-time service unavailable").to_text();
                let _ = client.send(Message::Text(frame)).await;
                let _ = client
                    .close(Some(CloseFrame {
                        code: CloseCode::Again,
                        reason: "upstream unavailable".into(),
                    }))
                    .await;
            }
        }
    }

    async fn connect_upstream(&self, claims: &ClaimSet) -> Result<UpstreamStream, BridgeError> {
        let mut request = self.upstream_url.as_str().into_client_request()?;
        for (name, value) in self.forwarder.encode(claims)?.headers() {
            request
                .headers_mut()
                .insert(name, HeaderValue::from_str(&value)?);
        }
        let (upstream, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| BridgeError::Timeout(HANDSHAKE_TIMEOUT))??;
        Ok(upstream)
    }

    async fn relay(&self, client: WebSocketStream<TcpStream>, upstream: UpstreamStream) {
        let (mut client_tx, mut client_rx) = client.split();
        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = client_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
                from_client = client_rx.next() => match from_client {
                    Some(Ok(message)) if is_relayed(&message) => {
                        let closing = message.is_close();
                        if upstream_tx.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
                from_upstream = upstream_rx.next() => match from_upstream {
                    Some(Ok(message)) if is_relayed(&message) => {
                        let closing = message.is_close();
                        if client_tx.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
            }
        }

        let _ = upstream_tx.close().await;
        let _ = client_tx.close().await;
    }
}

/// Ping and pong frames are answered on each hop and not relayed.
fn is_relayed(message: &Message) -> bool {
    matches!(
        message,
        Message::Text(_) | Message::Binary(_) | Message::Close(_)
    )
}

/// Bearer credential from the `Authorization` header, falling back to a
/// `token` query parameter for clients that cannot set headers.
fn request_credential(request: &Request) -> Option<&str> {
    let from_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_credential);
    from_header.or_else(|| {
        request.uri().query().and_then(|query| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .filter(|token| !token.is_empty())
        })
    })
}

fn rejection(err: AuthError) -> ErrorResponse {
    let app_err = AppError::from(err);
    let mut response = ErrorResponse::new(Some(app_err.body().to_string()));
    *response.status_mut() =
        StatusCode::from_u16(app_err.status_code().as_u16()).unwrap_or(StatusCode::FORBIDDEN);
    response
}
