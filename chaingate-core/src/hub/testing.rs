//! Client fakes shared by the hub and engine tests.

use super::{ClientSink, ClientStream, HubError};
use async_trait::async_trait;
use chaingate_sdk::objects::ws::{WsClientMessage, WsEnvelope};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Log {
    sent: Vec<WsEnvelope>,
    close_code: Option<u16>,
}

/// Read side of a [`RecordingSink`].
#[derive(Clone, Default)]
pub(crate) struct SinkLog(Arc<Mutex<Log>>);

impl SinkLog {
    pub(crate) fn sent(&self) -> Vec<WsEnvelope> {
        self.0.lock().unwrap().sent.clone()
    }

    pub(crate) fn close_code(&self) -> Option<u16> {
        self.0.lock().unwrap().close_code
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_code().is_some()
    }
}

pub(crate) struct RecordingSink(SinkLog);

impl RecordingSink {
    pub(crate) fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self(log.clone()), log)
    }
}

#[async_trait]
impl ClientSink for RecordingSink {
    async fn send(&mut self, envelope: &WsEnvelope) -> Result<(), HubError> {
        let mut log = self.0.0.lock().unwrap();
        if log.close_code.is_some() {
            return Err(HubError::Closed);
        }
        log.sent.push(envelope.clone());
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.0.0.lock().unwrap().close_code.get_or_insert(code);
    }
}

/// Every write fails.
pub(crate) struct FailingSink(SinkLog);

impl FailingSink {
    pub(crate) fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self(log.clone()), log)
    }
}

#[async_trait]
impl ClientSink for FailingSink {
    async fn send(&mut self, _envelope: &WsEnvelope) -> Result<(), HubError> {
        Err(HubError::Transport("connection reset".to_string()))
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.0.0.lock().unwrap().close_code.get_or_insert(code);
    }
}

/// Every write blocks forever.
pub(crate) struct HangingSink(SinkLog);

impl HangingSink {
    pub(crate) fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self(log.clone()), log)
    }
}

#[async_trait]
impl ClientSink for HangingSink {
    async fn send(&mut self, _envelope: &WsEnvelope) -> Result<(), HubError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.0.0.lock().unwrap().close_code.get_or_insert(code);
    }
}

/// Inbound messages fed from the test through a channel.
pub(crate) struct ChannelStream(mpsc::UnboundedReceiver<Result<WsClientMessage, HubError>>);

impl ChannelStream {
    pub(crate) fn new() -> (
        mpsc::UnboundedSender<Result<WsClientMessage, HubError>>,
        Self,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self(rx))
    }
}

#[async_trait]
impl ClientStream for ChannelStream {
    async fn recv(&mut self) -> Option<Result<WsClientMessage, HubError>> {
        self.0.recv().await
    }
}
