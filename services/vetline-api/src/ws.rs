//! WebSocket endpoint for live case events.
//!
//! Identity comes from the gateway headers on the upgrade request. Clients
//! send `join-distress`, `leave-distress` and `location-update`; every hub
//! event for the caller is pushed back as a JSON text frame.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, error, info, warn};
use vetline_core::{Caller, GeoPoint};
use vetline_notify::{HubEvent, Subscription};

use crate::extract::caller_from_headers;
use crate::state::AppState;

/// Messages accepted from clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinDistress(String),
    LeaveDistress(String),
    LocationUpdate {
        distress_id: String,
        coordinates: GeoPoint,
    },
}

pub struct WsServer {
    state: Arc<AppState>,
}

impl WsServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "WebSocket server listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer_addr).await {
                            debug!(%peer_addr, error = %e, "WebSocket connection ended with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "Failed to accept WebSocket connection"),
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let mut caller: Option<Caller> = None;
        let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
            let headers = request.headers();
            match caller_from_headers(|name| headers.get(name).and_then(|v| v.to_str().ok())) {
                Ok(identity) => {
                    caller = Some(identity);
                    Ok(response)
                }
                Err(e) => {
                    let mut rejection = ErrorResponse::new(Some(e.to_string()));
                    *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(rejection)
                }
            }
        })
        .await?;
        let Some(caller) = caller else {
            return Ok(());
        };

        info!(%peer_addr, user_id = %caller.user_id, role = ?caller.role, "Socket connected");
        let (ws_sender, ws_receiver) = ws_stream.split();
        self.serve_session(&caller, ws_sender, ws_receiver).await
    }

    /// Pump frames between one socket and the hub until either side ends.
    ///
    /// The hub registration is released on every exit, including send failures.
    async fn serve_session<S, R>(
        &self,
        caller: &Caller,
        mut sink: S,
        mut stream: R,
    ) -> anyhow::Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let hub = &self.state.hub;
        let mut subscription = hub.connect(caller);

        let outcome = self
            .pump(caller, &mut subscription, &mut sink, &mut stream)
            .await;

        hub.disconnect(&caller.user_id, subscription.connection_id);
        match &outcome {
            Ok(()) => info!(user_id = %caller.user_id, "Socket disconnected"),
            Err(e) => warn!(user_id = %caller.user_id, error = %e, "Socket dropped after send failure"),
        }
        outcome
    }

    async fn pump<S, R>(
        &self,
        caller: &Caller,
        subscription: &mut Subscription,
        sink: &mut S,
        stream: &mut R,
    ) -> anyhow::Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_message(caller, &text).await;
                            sink.send(Message::Text(serde_json::to_string(&reply)?)).await?;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => {
                            warn!(user_id = %caller.user_id, error = %e, "Socket receive failed");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                    }
                }
                outgoing = subscription.receiver.recv() => {
                    match outgoing {
                        Some(event) => {
                            sink.send(Message::Text(serde_json::to_string(&event)?)).await?;
                        }
                        // replaced by a newer connection for the same identity
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, caller: &Caller, text: &str) -> HubEvent {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => return HubEvent::nack("unknown", format!("Unreadable message: {}", e)),
        };

        match message {
            ClientMessage::JoinDistress(case_id) => {
                if self.state.hub.join_room(&caller.user_id, &case_id) {
                    HubEvent::ack("join-distress", Some(case_id))
                } else {
                    HubEvent::nack("join-distress", "Not connected")
                }
            }
            ClientMessage::LeaveDistress(case_id) => {
                self.state.hub.leave_room(&caller.user_id, &case_id);
                HubEvent::ack("leave-distress", Some(case_id))
            }
            ClientMessage::LocationUpdate {
                distress_id,
                coordinates,
            } => match self
                .state
                .relay
                .update_location(caller, &distress_id, coordinates)
                .await
            {
                Ok(_) => HubEvent::ack("location-update", Some(distress_id)),
                Err(e) => HubEvent::nack("location-update", e.to_string()),
            },
        }
    }
}
