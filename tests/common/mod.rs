use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use checkout_api::{
    config::AppConfig,
    db,
    entities::{
        bank_account,
        coupon::{self, CouponType, DiscountType},
        product,
    },
    events::{spawn_event_processor, EventSender},
    AppState,
};

/// Harness backing each suite with a fresh in-memory SQLite database.
///
/// The pool is capped at one connection so concurrent transactions
/// serialize instead of hitting SQLite's whole-database write lock.
pub struct TestApp {
    pub state: Arc<AppState>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to bootstrap test schema");

        let (tx, rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(tx));
        let event_task = spawn_event_processor(rx);

        let state = Arc::new(AppState::new(Arc::new(pool), Arc::new(cfg), event_sender));

        Self {
            state,
            _event_task: event_task,
        }
    }

    #[allow(dead_code)]
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        discount_price: Option<Decimal>,
        stock: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            discount_price: Set(discount_price),
            stock_quantity: Set(stock),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product")
    }

    #[allow(dead_code)]
    pub async fn seed_bank_account(&self, bank_code: &str) -> bank_account::Model {
        bank_account::ActiveModel {
            id: Set(Uuid::new_v4()),
            bank_code: Set(bank_code.to_string()),
            account_number: Set("0011223344".to_string()),
            account_name: Set("CHECKOUT API LTD".to_string()),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed bank account")
    }

    #[allow(dead_code)]
    pub async fn insert_coupon(&self, model: coupon::ActiveModel) -> coupon::Model {
        model
            .insert(&*self.state.db)
            .await
            .expect("failed to seed coupon")
    }
}

/// A valid system coupon with every optional restriction disabled; tests
/// tighten individual fields before inserting.
#[allow(dead_code)]
pub fn coupon_fixture(code: &str, coupon_type: CouponType) -> coupon::ActiveModel {
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_uppercase()),
        coupon_type: Set(coupon_type),
        discount_type: Set(DiscountType::Fixed),
        discount_value: Set(dec!(10)),
        max_discount_amount: Set(None),
        min_order_amount: Set(None),
        remaining_balance: Set(match coupon_type {
            CouponType::Gradual => Some(dec!(100)),
            CouponType::OneTime => None,
        }),
        is_system_coupon: Set(true),
        user_id: Set(None),
        is_active: Set(true),
        start_date: Set(Utc::now() - Duration::days(1)),
        end_date: Set(Utc::now() + Duration::days(30)),
        max_usage_count: Set(None),
        usage_count: Set(0),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
}
