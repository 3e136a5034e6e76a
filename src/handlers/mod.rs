pub mod carts;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: crate::services::carts::CartService,
    pub coupons: crate::services::coupons::CouponService,
    pub payments: crate::services::payments::PaymentService,
    pub checkout: crate::services::checkout::CheckoutService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let carts = crate::services::carts::CartService::new(db.clone(), event_sender.clone());
        let coupons = crate::services::coupons::CouponService::new(db.clone(), event_sender.clone());
        let payments = crate::services::payments::PaymentService::new(db.clone(), config.clone());
        let checkout = crate::services::checkout::CheckoutService::new(
            db,
            event_sender,
            coupons.clone(),
            payments.clone(),
            config,
        );

        Self {
            carts,
            coupons,
            payments,
            checkout,
        }
    }
}
