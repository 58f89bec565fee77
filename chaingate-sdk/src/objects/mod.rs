pub mod blockchain;
pub mod currency;
pub mod payment;
pub mod webhook;
pub mod ws;

pub use currency::{
    ApiKeyType, CryptoCurrency, CurrencyDetail, FiatCurrency, Mode, ParseEnumError, PaymentState,
};
pub use payment::{
    CreateInvoiceRequest, CreatePaymentRequest, PaymentHistoryEntry, PaymentLogEntry,
    PaymentResponse, StateUpdateRequest, StateUpdateResponse, UpdateOutcomeKind,
};
pub use webhook::{WebhookBody, WebhookData};
