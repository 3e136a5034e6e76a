use crate::{
    config::AppConfig,
    entities::{
        cart_item, order,
        order::OrderStatus,
        order_item,
        payment::{PaymentMethod, PaymentStatus},
        product, Cart, CartItem, Product,
    },
    errors::{OutOfStockItem, ServiceError},
    events::{Event, EventSender},
    services::{
        coupons::CouponService,
        payments::{PaymentIntent, PaymentService},
        RedeemerKey,
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Checkout request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub bank_code: Option<String>,
}

/// Result of a committed checkout: the order, its frozen lines and the
/// payment intent opened for it.
#[derive(Debug, Serialize)]
pub struct CheckoutSummary {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub sub_total: Decimal,
    pub discount_amount: Decimal,
    pub shipping_fee: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
    pub items: Vec<order_item::Model>,
    pub payment: PaymentIntent,
}

/// Checkout orchestrator: converts a cart into an order, payment and
/// coupon redemption in one transaction.
///
/// Stock and coupon counters are written with conditional updates; a
/// concurrent checkout that invalidates a read aborts this one with
/// `Conflict`, and the whole attempt is retried exactly once.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    coupons: CouponService,
    payments: PaymentService,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        coupons: CouponService,
        payments: PaymentService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            coupons,
            payments,
            config,
        }
    }

    /// Runs checkout for the cart, retrying the whole attempt once if it
    /// lost a race. Every other error propagates immediately.
    #[instrument(skip(self, request))]
    pub async fn checkout_from_cart(
        &self,
        cart_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutSummary, ServiceError> {
        with_one_retry(|| self.attempt(cart_id, &request)).await
    }

    /// One full checkout attempt in a single transaction. Dropping the
    /// transaction on any early return rolls everything back.
    async fn attempt(
        &self,
        cart_id: Uuid,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSummary, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        let redeemer = RedeemerKey::try_from_parts(cart.user_id, cart.session_id.clone())?;

        let lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .find_also_related(Product)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "cannot check out an empty cart".to_string(),
            ));
        }

        // Re-verify stock against live rows, reporting every offender at
        // once rather than failing on the first.
        let mut priced_lines = Vec::with_capacity(lines.len());
        let mut out_of_stock = Vec::new();
        for (item, product) in lines {
            let product = product
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            if item.quantity > product.stock_quantity {
                out_of_stock.push(OutOfStockItem {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested: item.quantity,
                    available: product.stock_quantity,
                });
            }
            priced_lines.push((item, product));
        }
        if !out_of_stock.is_empty() {
            return Err(ServiceError::OutOfStock(out_of_stock));
        }

        let sub_total: Decimal = priced_lines
            .iter()
            .map(|(item, product)| product.effective_price() * Decimal::from(item.quantity))
            .sum();

        // Coupon validation and discount happen against the subtotal,
        // before shipping and tax.
        let validated_coupon = match &request.coupon_code {
            Some(code) => {
                let coupon = self
                    .coupons
                    .validate(&txn, code, sub_total, &redeemer)
                    .await?;
                let discount = self.coupons.compute_discount(&coupon, sub_total);
                Some((coupon, discount))
            }
            None => None,
        };
        let discount_amount = validated_coupon
            .as_ref()
            .map_or(Decimal::ZERO, |(_, discount)| *discount);

        let shipping_fee = self.shipping_fee_for(sub_total);
        let tax = round2(sub_total * self.config.tax_rate_decimal());
        let total_amount = (sub_total - discount_amount + shipping_fee + tax).max(Decimal::ZERO);

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(cart.user_id),
            session_id: Set(cart.session_id.clone()),
            status: Set(OrderStatus::Pending),
            sub_total: Set(sub_total),
            discount_amount: Set(discount_amount),
            shipping_fee: Set(shipping_fee),
            tax: Set(tax),
            total_amount: Set(total_amount),
            coupon_id: Set(validated_coupon.as_ref().map(|(c, _)| c.id)),
            payment_method: Set(request.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // Two checkouts drawing the same number in the same second is a
        // race like any other; let the retry pick a fresh one.
        let order = order.insert(&txn).await.map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict(format!("order number {} already taken", order_number))
            } else {
                ServiceError::DatabaseError(err)
            }
        })?;

        let mut items = Vec::with_capacity(priced_lines.len());
        for (item, product) in &priced_lines {
            let unit_price = product.effective_price();
            let line = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(unit_price),
                total_price: Set(unit_price * Decimal::from(item.quantity)),
            };
            items.push(line.insert(&txn).await?);
        }

        // Conditional decrements: the stock check above was only a read,
        // the guard here is what actually reserves the units.
        for (item, product) in &priced_lines {
            let result = Product::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product.id))
                .filter(product::Column::StockQuantity.gte(item.quantity))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::Conflict(format!(
                    "stock for product {} changed during checkout",
                    product.id
                )));
            }
        }

        if let Some((coupon, discount)) = &validated_coupon {
            self.coupons
                .apply(&txn, coupon, *discount, &redeemer, order_id)
                .await?;
        }

        let payment = self
            .payments
            .create_payment(
                &txn,
                order_id,
                &order_number,
                total_amount,
                request.payment_method,
                request.bank_code.as_deref(),
            )
            .await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.publish_events(cart_id, &order, &validated_coupon, &payment)
            .await;

        info!(%order_id, %order_number, %total_amount, "checkout committed");
        Ok(CheckoutSummary {
            order_id,
            order_number,
            status: order.status,
            sub_total,
            discount_amount,
            shipping_fee,
            tax,
            total_amount,
            items,
            payment,
        })
    }

    fn shipping_fee_for(&self, sub_total: Decimal) -> Decimal {
        if let Some(threshold) = self.config.free_shipping_threshold_decimal() {
            if sub_total >= threshold {
                return Decimal::ZERO;
            }
        }
        self.config.shipping_fee_decimal()
    }

    async fn publish_events(
        &self,
        cart_id: Uuid,
        order: &order::Model,
        coupon: &Option<(crate::entities::CouponModel, Decimal)>,
        payment: &PaymentIntent,
    ) {
        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        if let Some((coupon, discount)) = coupon {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    order_id: order.id,
                    amount_discounted: *discount,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::PaymentCreated {
                payment_id: payment.payment.id,
                order_id: order.id,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                cart_id,
                order_id: order.id,
                total_amount: order.total_amount,
            })
            .await;
    }
}

/// Runs `operation`, repeating it exactly once if it failed with a
/// retryable error. Anything else propagates immediately.
async fn with_one_retry<T, F, Fut>(operation: F) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match operation().await {
        Err(err) if err.is_retryable() => {
            warn!(%err, "attempt lost a race, retrying once");
            operation().await
        }
        other => other,
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("ORD-{}-{:08X}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn order_numbers_are_prefixed_and_distinct_enough() {
        let a = generate_order_number();
        assert!(a.starts_with("ORD-"));
        assert_eq!(a.len(), 4 + 14 + 1 + 8);
        assert_ne!(a, generate_order_number());
    }

    #[tokio::test]
    async fn a_conflict_is_retried_exactly_once() {
        let calls = AtomicUsize::new(0);
        let result = with_one_retry(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ServiceError::Conflict("lost the race".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_persistent_conflict_stops_after_the_retry() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_one_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Conflict("still losing".into())) }
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_attempted_twice() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_one_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::OutOfStock(vec![])) }
        })
        .await;
        assert!(matches!(result, Err(ServiceError::OutOfStock(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tax_rounds_half_up() {
        assert_eq!(round2(dec!(10.005)), dec!(10.01));
        assert_eq!(round2(dec!(10.004)), dec!(10.00));
    }

    #[test]
    fn checkout_request_deserialization() {
        let json = r#"{
            "coupon_code": "WELCOME10",
            "payment_method": "bank_transfer",
            "bank_code": "970422"
        }"#;
        let req: CheckoutRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.coupon_code.as_deref(), Some("WELCOME10"));
        assert_eq!(req.payment_method, PaymentMethod::BankTransfer);

        let minimal: CheckoutRequest =
            serde_json::from_str(r#"{"payment_method": "cash"}"#).unwrap();
        assert!(minimal.coupon_code.is_none());
        assert!(minimal.bank_code.is_none());
    }
}
