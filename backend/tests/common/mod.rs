#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use uuid::Uuid;

use lessons::booking::{AvailabilityBook, BookingCoordinator, SlotFinder};
use lessons::config::AppConfig;
use lessons::db::Db;
use lessons::model::{
    Account, Instructor, Learner, LessonType, Package, TimeRange, WeeklyAvailability,
};
use lessons::notify::{BookingConfirmation, NotificationGateway, Receipt};
use lessons::payments::{
    Checkout, IntentRequest, IntentStatus, OpenedIntent, PaymentGateway, PaymentReconciler,
    WebhookVerifier,
};
use lessons::store::{LedgerRepository, SqliteStore, Stores};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Isolated in-memory database. A single connection keeps shared-cache
/// table locks out of concurrent tests; interleaving still happens at
/// every await point.
pub async fn setup_db() -> Db {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&url, 1).await.unwrap();
    db.migrate().await.unwrap();
    db
}

pub fn config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        db_max_connections: 1,
        bind_addr: ([127, 0, 0, 1], 0).into(),
        slot_step_minutes: 30,
        default_currency: "gbp".into(),
        gateway_url: "http://gateway.invalid".into(),
        gateway_secret_key: String::new(),
        gateway_timeout_secs: 1,
        webhook_secret: WEBHOOK_SECRET.into(),
        webhook_tolerance_secs: 300,
    }
}

/* =========================
Fakes
========================= */

#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, IntentStatus>>,
    pub created: AtomicUsize,
    pub retrieved: AtomicUsize,
    pub fail_create: AtomicBool,
}

impl FakeGateway {
    pub fn settle(&self, intent_id: &str, status: IntentStatus) {
        self.intents.lock().insert(intent_id.to_string(), status);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, req: &IntentRequest) -> anyhow::Result<OpenedIntent> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("gateway unavailable"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let intent_id = format!("pi_{}_{n}", req.payment_id.simple());
        self.intents
            .lock()
            .insert(intent_id.clone(), IntentStatus::Pending);
        Ok(OpenedIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> anyhow::Result<IntentStatus> {
        self.retrieved.fetch_add(1, Ordering::SeqCst);
        self.intents
            .lock()
            .get(intent_id)
            .copied()
            .ok_or_else(|| anyhow!("no such intent {intent_id}"))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub receipts: Mutex<Vec<(String, Receipt)>>,
    pub confirmations: Mutex<Vec<(String, BookingConfirmation)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl NotificationGateway for RecordingNotifier {
    async fn send_receipt(&self, to: &str, receipt: &Receipt) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp down"));
        }
        self.receipts.lock().push((to.to_string(), receipt.clone()));
        Ok(())
    }

    async fn send_booking_confirmation(
        &self,
        to: &str,
        booking: &BookingConfirmation,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp down"));
        }
        self.confirmations
            .lock()
            .push((to.to_string(), booking.clone()));
        Ok(())
    }
}

/// Ledger whose credits fail while `failing` is set.
pub struct FlakyLedger {
    inner: Arc<SqliteStore>,
    pub failing: AtomicBool,
    pub credit_attempts: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner: Arc::new(inner),
            failing: AtomicBool::new(true),
            credit_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerRepository for FlakyLedger {
    async fn credit(&self, a: &Account, amount: i64, now: i64) -> anyhow::Result<Option<i64>> {
        self.credit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("ledger unavailable"));
        }
        self.inner.credit(a, amount, now).await
    }

    async fn debit_if_sufficient(
        &self,
        a: &Account,
        amount: i64,
        now: i64,
    ) -> anyhow::Result<Option<i64>> {
        self.inner.debit_if_sufficient(a, amount, now).await
    }

    async fn charge(&self, a: &Account, amount: i64, now: i64) -> anyhow::Result<Option<i64>> {
        self.inner.charge(a, amount, now).await
    }

    async fn balance(&self, a: &Account) -> anyhow::Result<Option<i64>> {
        self.inner.balance(a).await
    }
}

/* =========================
Environment
========================= */

pub struct TestEnv {
    pub db: Db,
    pub store: SqliteStore,
    pub stores: Stores,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let db = setup_db().await;
        let store = SqliteStore::new(db.pool.clone());
        Self {
            stores: Stores::sqlite(store.clone()),
            store,
            db,
            gateway: Arc::new(FakeGateway::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn coordinator(&self) -> BookingCoordinator {
        BookingCoordinator::new(&self.stores, self.notifier.clone(), "gbp")
    }

    pub fn slot_finder(&self) -> SlotFinder {
        SlotFinder::new(&self.stores, 30)
    }

    pub fn availability(&self) -> AvailabilityBook {
        AvailabilityBook::new(&self.stores)
    }

    pub fn checkout(&self) -> Checkout {
        Checkout::new(&self.stores, self.gateway.clone(), "gbp")
    }

    pub fn reconciler(&self) -> PaymentReconciler {
        self.reconciler_with(&self.stores)
    }

    pub fn reconciler_with(&self, stores: &Stores) -> PaymentReconciler {
        PaymentReconciler::new(
            stores,
            self.gateway.clone(),
            self.notifier.clone(),
            WebhookVerifier::new(WEBHOOK_SECRET, 300),
        )
    }

    /// Instructor charging 45.00 for a 60 minute "standard" lesson,
    /// 36.00/h otherwise, available Monday 09:00-12:00 only.
    pub async fn instructor(&self) -> Instructor {
        let instructor = Instructor {
            id: Uuid::new_v4(),
            name: "Alex Driver".into(),
            email: "alex@example.test".into(),
            hourly_rate: 3_600,
            currency: "gbp".into(),
            lesson_types: vec![LessonType {
                name: "standard".into(),
                price: 4_500,
                duration_minutes: 60,
            }],
        };
        self.store.register_instructor(&instructor).await.unwrap();

        let book = self.availability();
        for day in lessons::model::WEEK {
            let mut w = WeeklyAvailability::default_for(instructor.id, day);
            if day == chrono::Weekday::Mon {
                w.ranges = vec![TimeRange::parse("09:00", "12:00").unwrap()];
                w.available = true;
            } else {
                w.ranges.clear();
                w.available = false;
            }
            book.replace_weekly_day(&w).await.unwrap();
        }
        instructor
    }

    pub async fn learner(&self, balance: i64) -> Learner {
        let learner = Learner {
            id: Uuid::new_v4(),
            name: "Jo Learner".into(),
            email: format!("jo+{}@example.test", Uuid::new_v4().simple()),
            balance,
            primary_instructor_id: None,
        };
        self.store.register_learner(&learner).await.unwrap();
        learner
    }

    pub async fn package(&self, instructor_id: Uuid, lessons: u32, price: i64) -> Package {
        let package = Package {
            id: Uuid::new_v4(),
            instructor_id,
            name: format!("{lessons} lesson bundle"),
            lesson_count: lessons,
            price,
            lesson_duration_minutes: 60,
            lesson_type: "standard".into(),
            active: true,
        };
        self.store.register_package(&package).await.unwrap();
        package
    }

    pub async fn balance(&self, learner_id: Uuid) -> i64 {
        self.store
            .balance(&Account::Learner(learner_id))
            .await
            .unwrap()
            .unwrap()
    }
}

/// 2030-01-07 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

pub fn monday_at(hh: u32, mm: u32) -> NaiveDateTime {
    monday().and_hms_opt(hh, mm, 0).unwrap()
}
