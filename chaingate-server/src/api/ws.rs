//! `GET /ws?pid=<payment id>`, the checkout page's websocket.
//!
//! The socket is split into a [`ClientSink`] registered with the payment's
//! hub and a [`ClientStream`] read by the checkout session.

use async_trait::async_trait;
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chaingate_core::hub::{ClientSink, ClientStream, HubError};
use chaingate_core::processors::serve_checkout;
use chaingate_sdk::objects::ws::{WsClientMessage, WsEnvelope};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pid: Uuid,
}

/// Upgrades the connection and hands it to the checkout session.
pub async fn checkout_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let (sink, stream) = socket.split();
        serve_checkout(
            state.engine,
            params.pid,
            Box::new(SocketSink(sink)),
            SocketStream(stream),
        )
    })
}

struct SocketSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl ClientSink for SocketSink {
    async fn send(&mut self, envelope: &WsEnvelope) -> Result<(), HubError> {
        let json = serde_json::to_string(envelope)
            .map_err(|e| HubError::Transport(e.to_string()))?;
        self.0
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.0.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "WS: close frame not delivered");
        }
        let _ = self.0.close().await;
    }
}

struct SocketStream(SplitStream<WebSocket>);

#[async_trait]
impl ClientStream for SocketStream {
    async fn recv(&mut self) -> Option<Result<WsClientMessage, HubError>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(error = %e, "WS: read failed");
                    return None;
                }
            };
            return match message {
                Message::Text(text) => Some(
                    serde_json::from_str::<WsClientMessage>(text.as_str())
                        .map_err(|e| HubError::Malformed(e.to_string())),
                ),
                Message::Binary(_) => Some(Err(HubError::Malformed(
                    "binary frames are not supported".to_string(),
                ))),
                // Pings are answered by axum.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => None,
            };
        }
    }
}
