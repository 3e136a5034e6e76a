use crate::config::AppConfig;
use crate::entities::{coupon_usage, BankAccount, Cart, CartItem, Coupon, CouponUsage, Order, OrderItem, Payment, Product};
use crate::errors::ServiceError;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Statement,
};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using pool settings from the app config.
pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(cfg.database_url.clone());

    opt.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .sqlx_logging(false);

    debug!(
        max_connections = cfg.db_max_connections,
        "connecting to database"
    );

    let pool = Database::connect(opt).await?;
    Ok(pool)
}

/// Creates the tables owned by this subsystem plus the uniqueness indexes
/// the coupon engine relies on. Idempotent; safe to run at every startup.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, schema.create_table_from_entity(Product)).await?;
    create_table(db, schema.create_table_from_entity(Cart)).await?;
    create_table(db, schema.create_table_from_entity(CartItem)).await?;
    create_table(db, schema.create_table_from_entity(Order)).await?;
    create_table(db, schema.create_table_from_entity(OrderItem)).await?;
    create_table(db, schema.create_table_from_entity(Coupon)).await?;
    create_table(db, schema.create_table_from_entity(CouponUsage)).await?;
    create_table(db, schema.create_table_from_entity(Payment)).await?;
    create_table(db, schema.create_table_from_entity(BankAccount)).await?;

    // One usage row per (coupon, order).
    create_index(
        db,
        Index::create()
            .name("uq_coupon_usages_coupon_order")
            .table(CouponUsage)
            .col(coupon_usage::Column::CouponId)
            .col(coupon_usage::Column::OrderId)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    // OneTime redemptions: `one_time_key` is NULL for Gradual usages, so
    // this blocks double-redemption without limiting Gradual reuse.
    create_index(
        db,
        Index::create()
            .name("uq_coupon_usages_one_time_key")
            .table(CouponUsage)
            .col(coupon_usage::Column::CouponId)
            .col(coupon_usage::Column::OneTimeKey)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    // Codes are unique case-insensitively; the column-level unique
    // constraint cannot see casing variants, so the index goes over
    // UPPER(code), matching how lookups are done.
    db.execute(Statement::from_string(
        backend,
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_coupons_code_upper ON coupons (UPPER(code))"
            .to_owned(),
    ))
    .await?;

    // One line per (cart, product); re-adds merge instead.
    create_index(
        db,
        Index::create()
            .name("idx_cart_items_cart_product")
            .table(CartItem)
            .col(crate::entities::cart_item::Column::CartId)
            .col(crate::entities::cart_item::Column::ProductId)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    info!("schema bootstrap complete");
    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    mut stmt: sea_orm::sea_query::TableCreateStatement,
) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    stmt: IndexCreateStatement,
) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}
