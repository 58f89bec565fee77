//! Per-payment notification hubs.
//!
//! A [`Hub`] is responsible for:
//! - Owning the set of websocket clients watching one payment
//! - Serializing register, unregister, send and broadcast through a single
//!   worker task fed by a bounded command queue
//! - Dropping (and closing) any client whose write fails or times out,
//!   without affecting delivery to the others
//!
//! Hubs carry no business logic. What to send, and when, is decided by the
//! payment engine; hub lifetime is managed by [`HubRegistry`].

mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use registry::HubRegistry;

use crate::config::HubConfig;
use async_trait::async_trait;
use chaingate_sdk::objects::ws::{WsClientMessage, WsCloseCode, WsEnvelope};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ClientId = u64;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("client connection closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed client message: {0}")]
    Malformed(String),

    #[error("hub for payment {0} is shut down")]
    HubClosed(Uuid),
}

/// Outbound half of a client connection.
#[async_trait]
pub trait ClientSink: Send {
    async fn send(&mut self, envelope: &WsEnvelope) -> Result<(), HubError>;

    /// Best effort; errors are ignored.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Inbound half of a client connection.
#[async_trait]
pub trait ClientStream: Send {
    /// `None` once the client has gone away.
    async fn recv(&mut self) -> Option<Result<WsClientMessage, HubError>>;
}

pub type BoxedSink = Box<dyn ClientSink>;

/// Outcome of one [`Hub::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub dropped: usize,
}

enum Command {
    Register {
        id: ClientId,
        sink: BoxedSink,
    },
    Unregister {
        id: ClientId,
    },
    SendTo {
        id: ClientId,
        envelope: WsEnvelope,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        envelope: WsEnvelope,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Close,
}

/// Handle to one payment's hub. Cloning shares the same worker.
#[derive(Clone)]
pub struct Hub {
    payment_id: Uuid,
    tx: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    clients: Arc<AtomicUsize>,
}

impl Hub {
    /// Start the worker for `payment_id`.
    pub fn spawn(payment_id: Uuid, config: &HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let clients = Arc::new(AtomicUsize::new(0));
        let worker = HubWorker {
            payment_id,
            rx,
            clients: Vec::new(),
            client_count: clients.clone(),
            send_timeout: config.send_timeout,
        };
        tokio::spawn(worker.run());
        Self {
            payment_id,
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            clients,
        }
    }

    pub fn payment_id(&self) -> Uuid {
        self.payment_id
    }

    /// Number of registered clients as last reported by the worker.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn register(&self, sink: BoxedSink) -> Result<ClientId, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.command(Command::Register { id, sink }).await?;
        Ok(id)
    }

    /// Remove and close a client. Unknown ids are ignored.
    pub async fn unregister(&self, id: ClientId) {
        // A closed hub has already dropped every client.
        let _ = self.command(Command::Unregister { id }).await;
    }

    /// Deliver to a single client. `Ok(false)` if the client is unknown or
    /// was dropped because the write failed.
    pub async fn send_to(&self, id: ClientId, envelope: WsEnvelope) -> Result<bool, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendTo {
            id,
            envelope,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::HubClosed(self.payment_id))
    }

    pub async fn broadcast(&self, envelope: WsEnvelope) -> Result<BroadcastReport, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Broadcast { envelope, reply }).await?;
        rx.await.map_err(|_| HubError::HubClosed(self.payment_id))
    }

    /// Close every client and stop the worker.
    pub async fn close(&self) {
        let _ = self.command(Command::Close).await;
    }

    async fn command(&self, command: Command) -> Result<(), HubError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| HubError::HubClosed(self.payment_id))
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct HubWorker {
    payment_id: Uuid,
    rx: mpsc::Receiver<Command>,
    clients: Vec<(ClientId, BoxedSink)>,
    client_count: Arc<AtomicUsize>,
    send_timeout: Duration,
}

impl HubWorker {
    async fn run(mut self) {
        debug!(payment_id = %self.payment_id, "Hub started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Register { id, sink } => {
                    self.clients.push((id, sink));
                    debug!(payment_id = %self.payment_id, client_id = id, "Client registered");
                }
                Command::Unregister { id } => {
                    if let Some(pos) = self.position(id) {
                        let (_, mut sink) = self.clients.remove(pos);
                        close_sink(
                            self.payment_id,
                            self.send_timeout,
                            &mut sink,
                            WsCloseCode::NORMAL,
                            "bye",
                        )
                        .await;
                        debug!(payment_id = %self.payment_id, client_id = id, "Client unregistered");
                    }
                }
                Command::SendTo {
                    id,
                    envelope,
                    reply,
                } => {
                    let delivered = match self.position(id) {
                        Some(pos) => self.deliver_or_drop(pos, &envelope).await,
                        None => false,
                    };
                    self.publish_count();
                    let _ = reply.send(delivered);
                }
                Command::Broadcast { envelope, reply } => {
                    let report = self.broadcast(&envelope).await;
                    self.publish_count();
                    let _ = reply.send(report);
                }
                Command::Close => break,
            }
            self.publish_count();
        }

        for (_, mut sink) in std::mem::take(&mut self.clients) {
            close_sink(
                self.payment_id,
                self.send_timeout,
                &mut sink,
                WsCloseCode::NORMAL,
                "payment closed",
            )
            .await;
        }
        self.publish_count();
        info!(payment_id = %self.payment_id, "Hub shut down");
    }

    fn position(&self, id: ClientId) -> Option<usize> {
        self.clients.iter().position(|(client, _)| *client == id)
    }

    fn publish_count(&self) {
        self.client_count.store(self.clients.len(), Ordering::Release);
    }

    async fn broadcast(&mut self, envelope: &WsEnvelope) -> BroadcastReport {
        let mut report = BroadcastReport {
            attempted: self.clients.len(),
            ..BroadcastReport::default()
        };
        let mut failed = Vec::new();
        for (id, sink) in self.clients.iter_mut() {
            match send_with_timeout(sink, envelope, self.send_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(payment_id = %self.payment_id, client_id = *id, error = %e, "Dropping client after failed write");
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            if let Some(pos) = self.position(id) {
                let (_, mut sink) = self.clients.remove(pos);
                close_sink(
                    self.payment_id,
                    self.send_timeout,
                    &mut sink,
                    WsCloseCode::INTERNAL_ERROR,
                    "write failed",
                )
                .await;
                report.dropped += 1;
            }
        }
        report
    }

    async fn deliver_or_drop(&mut self, pos: usize, envelope: &WsEnvelope) -> bool {
        let Some((id, sink)) = self.clients.get_mut(pos) else {
            return false;
        };
        match send_with_timeout(sink, envelope, self.send_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!(payment_id = %self.payment_id, client_id = *id, error = %e, "Dropping client after failed write");
                let (_, mut sink) = self.clients.remove(pos);
                close_sink(
                    self.payment_id,
                    self.send_timeout,
                    &mut sink,
                    WsCloseCode::INTERNAL_ERROR,
                    "write failed",
                )
                .await;
                false
            }
        }
    }

}

async fn close_sink(
    payment_id: Uuid,
    timeout: Duration,
    sink: &mut BoxedSink,
    code: u16,
    reason: &str,
) {
    if tokio::time::timeout(timeout, sink.close(code, reason))
        .await
        .is_err()
    {
        debug!(%payment_id, "Close frame timed out");
    }
}

async fn send_with_timeout(
    sink: &mut BoxedSink,
    envelope: &WsEnvelope,
    timeout: Duration,
) -> Result<(), HubError> {
    tokio::time::timeout(timeout, sink.send(envelope))
        .await
        .unwrap_or(Err(HubError::Timeout))
}
