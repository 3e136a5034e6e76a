use crate::{
    entities::{
        coupon::{self, CouponType, DiscountType},
        coupon_usage, Coupon, CouponModel, CouponUsage,
    },
    errors::{CouponError, ServiceError},
    events::EventSender,
    services::RedeemerKey,
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Discount computation as a tagged variant: one pure evaluation per
/// variant, no dispatch over coupon types.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscountRule {
    /// `order_amount × rate / 100`, optionally capped.
    Percentage {
        rate: Decimal,
        cap: Option<Decimal>,
    },
    /// A flat amount, never exceeding the order amount.
    Fixed { amount: Decimal },
}

impl DiscountRule {
    pub fn from_coupon(coupon: &CouponModel) -> Self {
        match coupon.discount_type {
            DiscountType::Percentage => DiscountRule::Percentage {
                rate: coupon.discount_value,
                cap: coupon.max_discount_amount,
            },
            DiscountType::Fixed => DiscountRule::Fixed {
                amount: coupon.discount_value,
            },
        }
    }

    /// Discount for `order_amount`, rounded to 2 decimal places
    /// (half-up) and clamped into `[0, order_amount]`.
    pub fn discount_for(&self, order_amount: Decimal) -> Decimal {
        let raw = match self {
            DiscountRule::Percentage { rate, cap } => {
                let discount = order_amount * *rate / Decimal::from(100);
                match cap {
                    Some(cap) => discount.min(*cap),
                    None => discount,
                }
            }
            DiscountRule::Fixed { amount } => *amount,
        };

        raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .min(order_amount)
            .max(Decimal::ZERO)
    }
}

/// Coupon engine: validates codes against an order amount and redeemer
/// identity, computes discounts and records redemptions.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    #[allow(dead_code)]
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Validates `code` for a given order amount and redeemer, on the
    /// supplied connection (a checkout transaction, usually).
    ///
    /// Checks run in a fixed order; the first failure wins:
    /// lookup → active window → ownership → minimum → usage limit →
    /// type-specific (OneTime: not yet redeemed, Gradual: balance left).
    #[instrument(skip(self, conn))]
    pub async fn validate<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        order_amount: Decimal,
        redeemer: &RedeemerKey,
    ) -> Result<CouponModel, ServiceError> {
        let coupon = Coupon::find()
            .filter(
                Expr::expr(Func::upper(Expr::col(coupon::Column::Code)))
                    .eq(code.trim().to_uppercase()),
            )
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;

        let now = Utc::now();
        if !coupon.is_active || now > coupon.end_date {
            return Err(CouponError::Expired.into());
        }
        if now < coupon.start_date {
            return Err(CouponError::NotYetActive.into());
        }

        match coupon.user_id {
            Some(owner) => {
                if redeemer.user_id() != Some(owner) {
                    return Err(CouponError::NotAuthorized.into());
                }
            }
            None => {
                // A non-system coupon without an owner is corrupt data,
                // not a redemption outcome.
                if !coupon.is_system_coupon {
                    return Err(ServiceError::ValidationError(format!(
                        "coupon {} has no owner and is not a system coupon",
                        coupon.id
                    )));
                }
            }
        }

        if let Some(minimum) = coupon.min_order_amount {
            if order_amount < minimum {
                return Err(CouponError::MinimumNotMet { minimum }.into());
            }
        }

        if let Some(limit) = coupon.max_usage_count {
            if coupon.usage_count >= limit {
                return Err(CouponError::UsageLimitReached.into());
            }
        }

        match coupon.coupon_type {
            CouponType::OneTime => {
                let used = CouponUsage::find()
                    .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                    .filter(coupon_usage::Column::OneTimeKey.eq(redeemer.as_key()))
                    .one(conn)
                    .await?;
                if used.is_some() {
                    return Err(CouponError::AlreadyUsed.into());
                }
            }
            CouponType::Gradual => {
                let balance = coupon.remaining_balance.unwrap_or(Decimal::ZERO);
                if balance <= Decimal::ZERO {
                    return Err(CouponError::BalanceExhausted.into());
                }
            }
        }

        Ok(coupon)
    }

    /// Discount this coupon yields for `order_amount`. For Gradual
    /// coupons the result is additionally capped at the remaining
    /// balance: the amount drawn down equals the discount applied.
    pub fn compute_discount(&self, coupon: &CouponModel, order_amount: Decimal) -> Decimal {
        let discount = DiscountRule::from_coupon(coupon).discount_for(order_amount);

        match coupon.coupon_type {
            CouponType::Gradual => {
                discount.min(coupon.remaining_balance.unwrap_or(Decimal::ZERO))
            }
            CouponType::OneTime => discount,
        }
    }

    /// Records a redemption inside the checkout transaction: appends the
    /// usage row, bumps the usage counter and, for Gradual coupons, draws
    /// the balance down by `discount`.
    ///
    /// Counter updates are conditional; a concurrent redemption that
    /// invalidated this transaction's read surfaces as `Conflict`.
    #[instrument(skip(self, txn, coupon))]
    pub async fn apply<C: ConnectionTrait>(
        &self,
        txn: &C,
        coupon: &CouponModel,
        discount: Decimal,
        redeemer: &RedeemerKey,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let one_time_key = match coupon.coupon_type {
            CouponType::OneTime => Some(redeemer.as_key()),
            CouponType::Gradual => None,
        };

        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            redeemer_key: Set(redeemer.as_key()),
            one_time_key: Set(one_time_key),
            order_id: Set(order_id),
            amount_discounted: Set(discount),
            used_at: Set(Utc::now()),
        };

        usage.insert(txn).await.map_err(|err| {
            if matches!(
                err.sql_err(),
                Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
            ) {
                // A concurrent transaction beat us to the one-time slot.
                ServiceError::Coupon(CouponError::AlreadyUsed)
            } else {
                ServiceError::DatabaseError(err)
            }
        })?;

        let mut update = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUsageCount.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::MaxUsageCount)),
                    ),
            );

        if coupon.coupon_type == CouponType::Gradual {
            update = update
                .col_expr(
                    coupon::Column::RemainingBalance,
                    Expr::col(coupon::Column::RemainingBalance).sub(discount),
                )
                .filter(coupon::Column::RemainingBalance.gte(discount));
        }

        let result = update.exec(txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "coupon {} was modified concurrently",
                coupon.id
            )));
        }

        debug!(coupon_id = %coupon.id, %order_id, %discount, "coupon applied");
        Ok(())
    }

    /// Validate + compute without redeeming; used by the preview endpoint.
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        code: &str,
        order_amount: Decimal,
        redeemer: &RedeemerKey,
    ) -> Result<(CouponModel, Decimal), ServiceError> {
        let coupon = self
            .validate(&*self.db, code, order_amount, redeemer)
            .await?;
        let discount = self.compute_discount(&coupon, order_amount);
        Ok((coupon, discount))
    }
}
