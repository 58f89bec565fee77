//! WebSocket message types for the checkout page stream.
//!
//! The `GET /ws?pid={payment_id}` endpoint upgrades to a WebSocket
//! connection and pushes [`WsEnvelope`] JSON frames.
//!
//! # Protocol
//!
//! 1. Right after the upgrade the server sends one `initial` frame:
//!    the currency list when the payment is still in
//!    `currency_selection`, the current payment snapshot otherwise.
//! 2. During currency selection the client answers with a single
//!    [`WsClientMessage::CurrencySelection`].
//! 3. Every accepted state change is pushed as an `update` frame.
//! 4. Errors are pushed as `error` frames; a close frame with a
//!    [`WsCloseCode`] may follow.
//!
//! Every frame has the shape:
//!
//! ```json
//! {"type":"update","messageType":"paid","body":{ ... }}
//! ```

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::currency::{CryptoCurrency, CurrencyDetail, Mode, PaymentState};

/// Whether a frame replays the current state or reports a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Initial,
    Update,
}

/// Everything the checkout page needs to render a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSnapshot {
    pub currency: Option<CryptoCurrency>,
    pub pay_address: Option<String>,
    /// Display form.
    pub pay_amount: String,
    /// Display form.
    pub actually_paid: String,
    /// Unix timestamp after which an unpaid payment expires.
    pub expire_time: Option<i64>,
    pub mode: Mode,
    pub success_page_url: Option<String>,
    pub failure_page_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsErrorBody {
    pub code: u16,
    pub reason: String,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsServerMessage {
    /// Currencies the buyer may choose from.
    CurrencySelection { currencies: Vec<CurrencyDetail> },
    /// A lifecycle state together with the payment it applies to.
    Lifecycle {
        state: PaymentState,
        payment: PaymentSnapshot,
    },
    Error { code: u16, reason: String },
}

impl WsServerMessage {
    /// The `messageType` this message is sent with.
    pub fn message_type(&self) -> &'static str {
        match self {
            WsServerMessage::CurrencySelection { .. } => "currency_selection",
            WsServerMessage::Lifecycle { state, .. } => state.as_str(),
            WsServerMessage::Error { .. } => "error",
        }
    }
}

/// A framed server message: `{ type, messageType, body }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct WsEnvelope {
    pub kind: FrameKind,
    pub message: WsServerMessage,
}

impl WsEnvelope {
    pub fn initial(message: WsServerMessage) -> Self {
        Self {
            kind: FrameKind::Initial,
            message,
        }
    }

    pub fn update(message: WsServerMessage) -> Self {
        Self {
            kind: FrameKind::Update,
            message,
        }
    }

    pub fn error(code: u16, reason: impl Into<String>) -> Self {
        Self::update(WsServerMessage::Error {
            code,
            reason: reason.into(),
        })
    }
}

impl Serialize for WsEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut frame = serializer.serialize_struct("WsEnvelope", 3)?;
        frame.serialize_field("type", &self.kind)?;
        frame.serialize_field("messageType", self.message.message_type())?;
        match &self.message {
            WsServerMessage::CurrencySelection { currencies } => {
                frame.serialize_field("body", currencies)?;
            }
            WsServerMessage::Lifecycle { payment, .. } => {
                frame.serialize_field("body", payment)?;
            }
            WsServerMessage::Error { code, reason } => {
                frame.serialize_field(
                    "body",
                    &WsErrorBody {
                        code: *code,
                        reason: reason.clone(),
                    },
                )?;
            }
        }
        frame.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: FrameKind,
    message_type: String,
    body: serde_json::Value,
}

impl TryFrom<RawEnvelope> for WsEnvelope {
    type Error = serde_json::Error;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let message = match raw.message_type.as_str() {
            "currency_selection" => WsServerMessage::CurrencySelection {
                currencies: serde_json::from_value(raw.body)?,
            },
            "error" => {
                let body: WsErrorBody = serde_json::from_value(raw.body)?;
                WsServerMessage::Error {
                    code: body.code,
                    reason: body.reason,
                }
            }
            other => WsServerMessage::Lifecycle {
                state: serde_json::from_value(serde_json::Value::String(other.to_owned()))?,
                payment: serde_json::from_value(raw.body)?,
            },
        };
        Ok(Self {
            kind: raw.kind,
            message,
        })
    }
}

/// Client-to-server message.
///
/// ```json
/// {"messageType":"currency_selection","body":{"currency":"eth"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", content = "body", rename_all = "snake_case")]
pub enum WsClientMessage {
    CurrencySelection { currency: CryptoCurrency },
}

/// Well-known WebSocket close codes used by the checkout stream.
///
/// Codes in the 4000–4999 range are reserved for application use by
/// [RFC 6455 §7.4.2](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.2).
pub struct WsCloseCode;

impl WsCloseCode {
    pub const NORMAL: u16 = 1000;

    pub const INTERNAL_ERROR: u16 = 1011;

    /// The client sent a frame that could not be understood.
    pub const BAD_MESSAGE: u16 = 4000;

    /// The requested payment does not exist.
    pub const PAYMENT_NOT_FOUND: u16 = 4004;

    /// The currency selection was refused.
    pub const SELECTION_REJECTED: u16 = 4022;
}
