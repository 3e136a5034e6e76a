use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartModel, Product},
    errors::{OutOfStockItem, ServiceError},
    events::{Event, EventSender},
    services::RedeemerKey,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Quantity bounds for a single cart line.
pub const MIN_LINE_QUANTITY: i32 = 1;
pub const MAX_LINE_QUANTITY: i32 = 100;

/// Cart store: owns Cart/CartItem state per user or anonymous session.
///
/// Carts are created lazily on first use, mutated by add/update/remove and
/// cleared only after a successful checkout commit. Stock checks here are
/// soft; checkout re-verifies against live stock inside its transaction.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the owner's cart, creating it if none exists yet.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, owner: &RedeemerKey) -> Result<CartModel, ServiceError> {
        let existing = self.find_cart_by_owner(owner).await?;
        if let Some(cart) = existing {
            return Ok(cart);
        }

        let cart_id = Uuid::new_v4();
        let cart = cart::ActiveModel {
            id: Set(cart_id),
            user_id: Set(owner.user_id()),
            session_id: Set(owner.session_id().map(str::to_string)),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        let cart = cart.insert(&*self.db).await?;
        self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;

        info!(%cart_id, "created cart");
        Ok(cart)
    }

    async fn find_cart_by_owner(
        &self,
        owner: &RedeemerKey,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match owner {
            RedeemerKey::User(uid) => Cart::find().filter(cart::Column::UserId.eq(*uid)),
            RedeemerKey::Session(sid) => {
                Cart::find().filter(cart::Column::SessionId.eq(sid.clone()))
            }
        };
        Ok(query.one(&*self.db).await?)
    }

    /// Adds a product to the cart, merging into an existing line for the
    /// same product rather than duplicating it.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartWithTotals, ServiceError> {
        validate_quantity(input.quantity)?;

        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        let merged_quantity = existing.as_ref().map_or(0, |i| i.quantity) + input.quantity;
        if merged_quantity > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "quantity per product is limited to {}",
                MAX_LINE_QUANTITY
            )));
        }
        if merged_quantity > product.stock_quantity {
            return Err(ServiceError::OutOfStock(vec![OutOfStockItem {
                product_id: product.id,
                product_name: product.name.clone(),
                requested: merged_quantity,
                available: product.stock_quantity,
            }]));
        }

        if let Some(item) = existing {
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(merged_quantity);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(input.product_id),
                quantity: Set(input.quantity),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        touch_cart(&txn, cart).await?;
        let totals = compute_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
                quantity: input.quantity,
            })
            .await;

        info!(%cart_id, product_id = %input.product_id, quantity = input.quantity, "added cart item");
        Ok(totals)
    }

    /// Replaces the quantity of an existing line.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithTotals, ServiceError> {
        validate_quantity(quantity)?;

        let txn = self.db.begin().await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .filter(|i| i.cart_id == cart_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item {} not found in cart {}", item_id, cart_id))
            })?;

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        let totals = compute_totals(&txn, cart_id).await?;
        txn.commit().await?;

        Ok(totals)
    }

    /// Removes a line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<CartWithTotals, ServiceError> {
        let txn = self.db.begin().await?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .filter(|i| i.cart_id == cart_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item {} not found in cart {}", item_id, cart_id))
            })?;

        let product_id = item.product_id;
        item.delete(&txn).await?;

        let totals = compute_totals(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved { cart_id, product_id })
            .await;

        Ok(totals)
    }

    /// Deletes every line in the cart.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&*self.db)
            .await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;

        info!(%cart_id, "cleared cart");
        Ok(())
    }

    /// Cart contents priced from the *current* catalog. Only order lines
    /// are price-snapshotted; cart display always reflects live prices.
    #[instrument(skip(self))]
    pub async fn get_cart_with_totals(&self, cart_id: Uuid) -> Result<CartWithTotals, ServiceError> {
        Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        compute_totals(&*self.db, cart_id).await
    }
}

async fn touch_cart(conn: &impl ConnectionTrait, cart: CartModel) -> Result<(), ServiceError> {
    let mut cart: cart::ActiveModel = cart.into();
    cart.updated_at = Set(Utc::now());
    cart.update(conn).await?;
    Ok(())
}

/// Recomputes subtotal and item count from current catalog prices.
pub(crate) async fn compute_totals(
    conn: &impl ConnectionTrait,
    cart_id: Uuid,
) -> Result<CartWithTotals, ServiceError> {
    let items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .find_also_related(Product)
        .all(conn)
        .await?;

    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    let mut item_count = 0;

    for (item, product) in items {
        let product = product.ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", item.product_id))
        })?;
        let unit_price = product.effective_price();
        let line_total = unit_price * Decimal::from(item.quantity);
        subtotal += line_total;
        item_count += item.quantity;
        lines.push(CartLine {
            item_id: item.id,
            product_id: product.id,
            product_name: product.name,
            unit_price,
            quantity: item.quantity,
            line_total,
        });
    }

    Ok(CartWithTotals {
        cart_id,
        lines,
        subtotal,
        item_count,
    })
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be between {} and {}",
            MIN_LINE_QUANTITY, MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

/// Input for adding an item to a cart
#[derive(Debug, Deserialize)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// One displayed cart line, priced from the live catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Cart contents with recomputed totals.
#[derive(Debug, Serialize)]
pub struct CartWithTotals {
    pub cart_id: Uuid,
    pub lines: Vec<CartLine>,
    pub subtotal: Decimal,
    pub item_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(100).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(101).is_err());
    }

    #[test]
    fn add_to_cart_input_deserialization() {
        let json = r#"{
            "product_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 3
        }"#;

        let input: AddToCartInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(input.quantity, 3);
        assert_eq!(
            input.product_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
