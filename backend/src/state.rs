use std::sync::Arc;

use sqlx::SqlitePool;

use crate::booking::{BookingCoordinator, SlotFinder};
use crate::config::AppConfig;
use crate::notify::NotificationGateway;
use crate::payments::{Checkout, PaymentGateway, PaymentReconciler, WebhookVerifier};
use crate::store::Stores;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub slots: Arc<SlotFinder>,
    pub bookings: Arc<BookingCoordinator>,
    pub checkout: Arc<Checkout>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        stores: &Stores,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationGateway>,
        cfg: &AppConfig,
    ) -> Self {
        let verifier = WebhookVerifier::new(&cfg.webhook_secret, cfg.webhook_tolerance_secs);

        Self {
            db,
            slots: Arc::new(SlotFinder::new(stores, cfg.slot_step_minutes)),
            bookings: Arc::new(BookingCoordinator::new(
                stores,
                notifier.clone(),
                &cfg.default_currency,
            )),
            checkout: Arc::new(Checkout::new(stores, gateway.clone(), &cfg.default_currency)),
            reconciler: Arc::new(PaymentReconciler::new(stores, gateway, notifier, verifier)),
        }
    }
}
