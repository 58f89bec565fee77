//! One checkout page connection, from upgrade to close.

use crate::entities::PaymentStateName;
use crate::hub::{BoxedSink, ClientStream};
use crate::processors::payment_engine::{Attached, PaymentEngine, PaymentError};
use chaingate_sdk::objects::ws::{WsClientMessage, WsCloseCode, WsEnvelope};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Drive a checkout page connection for `payment_id`.
///
/// The page is registered with the payment's hub and receives the current
/// state. While the payment awaits a currency, the first valid selection
/// is applied; if none arrives before the selection deadline the payment
/// is expired. Afterwards the page only receives broadcasts until it
/// disconnects.
pub async fn serve_checkout<S: ClientStream>(
    engine: Arc<PaymentEngine>,
    payment_id: Uuid,
    sink: BoxedSink,
    mut stream: S,
) {
    let attached = match engine.attach(payment_id, sink).await {
        Ok(attached) => attached,
        Err(PaymentError::NotFound) => {
            debug!(payment_id = %payment_id, "Checkout page for unknown payment");
            return;
        }
        Err(e) => {
            warn!(payment_id = %payment_id, error = %e, "Failed to attach checkout page");
            return;
        }
    };

    let connected = match attached.selection_deadline {
        Some(deadline) if attached.state == PaymentStateName::CurrencySelection => {
            await_selection(&engine, payment_id, &attached, &mut stream, deadline).await
        }
        _ => true,
    };

    if connected {
        while let Some(message) = stream.recv().await {
            let reason = match message {
                Ok(WsClientMessage::CurrencySelection { .. }) => {
                    "currency already selected".to_string()
                }
                Err(e) => e.to_string(),
            };
            reply_error(&attached, WsCloseCode::BAD_MESSAGE, reason).await;
        }
    }

    attached.hub.unregister(attached.client_id).await;
    debug!(payment_id = %payment_id, client_id = attached.client_id, "Checkout page detached");
}

/// Returns whether the client is still connected.
async fn await_selection<S: ClientStream>(
    engine: &PaymentEngine,
    payment_id: Uuid,
    attached: &Attached,
    stream: &mut S,
    deadline: Instant,
) -> bool {
    loop {
        let message = match tokio::time::timeout_at(deadline, stream.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => return false,
            Err(_) => {
                match engine.expire_unselected(payment_id).await {
                    Ok(outcome) => {
                        info!(payment_id = %payment_id, outcome = ?outcome.kind(), "Currency selection timed out");
                    }
                    Err(e) => {
                        warn!(payment_id = %payment_id, error = %e, "Failed to expire unselected payment");
                    }
                }
                return true;
            }
        };

        match message {
            Ok(WsClientMessage::CurrencySelection { currency }) => {
                match engine.select_currency(payment_id, currency.into()).await {
                    // The Waiting update reached this page through the hub.
                    Ok(_) => return true,
                    Err(PaymentError::Validation(reason)) => {
                        reply_error(attached, WsCloseCode::SELECTION_REJECTED, reason).await;
                    }
                    Err(e) => {
                        warn!(payment_id = %payment_id, error = %e, "Currency selection failed");
                        reply_error(attached, WsCloseCode::SELECTION_REJECTED, e.to_string())
                            .await;
                    }
                }
                // Another page may have selected in the meantime.
                if !still_selecting(engine, payment_id).await {
                    return true;
                }
            }
            Err(e) => {
                reply_error(attached, WsCloseCode::BAD_MESSAGE, e.to_string()).await;
            }
        }
    }
}

async fn still_selecting(engine: &PaymentEngine, payment_id: Uuid) -> bool {
    match engine.current_state_of(payment_id).await {
        Ok(state) => state == PaymentStateName::CurrencySelection,
        Err(e) => {
            debug!(payment_id = %payment_id, error = %e, "Could not re-read payment state");
            true
        }
    }
}

async fn reply_error(attached: &Attached, code: u16, reason: String) {
    if let Err(e) = attached
        .hub
        .send_to(attached.client_id, WsEnvelope::error(code, reason))
        .await
    {
        debug!(error = %e, "Could not deliver error frame");
    }
}
