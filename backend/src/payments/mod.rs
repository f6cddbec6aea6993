pub mod checkout;
pub mod gateway;
pub mod reconciler;
pub mod webhook;

pub use checkout::{Checkout, PublicBooking, PublicBookingRequest, TopUp};
pub use gateway::{HttpPaymentGateway, IntentRequest, IntentStatus, OpenedIntent, PaymentGateway};
pub use reconciler::{PaymentReconciler, Reconciled, WebhookOutcome};
pub use webhook::{GatewayEvent, SIGNATURE_HEADER, WebhookVerifier};
