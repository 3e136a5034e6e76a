use crate::{
    config::AppConfig,
    entities::{
        bank_account,
        payment::{self, PaymentMethod, PaymentStatus},
        BankAccount, Payment, PaymentModel,
    },
    errors::ServiceError,
    services::vietqr::{self, VietQrRequest},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Payment intent generator: opens a pending payment alongside its order
/// and, for bank transfers, derives the VietQR payload, expiry and a
/// hosted image URL from the same inputs.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

/// Payment created at checkout, with the client-facing QR fields.
#[derive(Debug, Serialize)]
pub struct PaymentIntent {
    pub payment: PaymentModel,
    pub qr_image_url: Option<String>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Opens a pending payment for the order inside the checkout
    /// transaction. Cash payments never expire; bank transfers carry a
    /// deterministic VietQR payload and a configured expiry window.
    #[instrument(skip(self, txn))]
    pub async fn create_payment<C: ConnectionTrait>(
        &self,
        txn: &C,
        order_id: Uuid,
        order_number: &str,
        amount: Decimal,
        method: PaymentMethod,
        bank_code: Option<&str>,
    ) -> Result<PaymentIntent, ServiceError> {
        let now = Utc::now();
        let (qr_data, qr_image_url, expires_at) = match method {
            PaymentMethod::Cash => (None, None, None),
            PaymentMethod::BankTransfer => {
                let account = self.resolve_bank_account(txn, bank_code).await?;
                let description = format!("Thanh toan {}", order_number);
                let request = VietQrRequest {
                    bank_code: &account.bank_code,
                    account_number: &account.account_number,
                    account_name: &account.account_name,
                    amount,
                    description: &description,
                };
                let data = vietqr::generate_vietqr_data(&request);
                let image_url =
                    vietqr::generate_vietqr_image_url(&self.config.vietqr_image_base_url, &request)?;
                let expiry = now + Duration::minutes(self.config.bank_transfer_expiry_minutes);
                (Some(data), Some(image_url), Some(expiry))
            }
        };

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            transaction_id: Set(generate_transaction_id()),
            amount: Set(amount),
            method: Set(method),
            status: Set(PaymentStatus::Pending),
            qr_data: Set(qr_data),
            expires_at: Set(expires_at),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let payment = payment.insert(txn).await?;
        info!(payment_id = %payment.id, %order_id, ?method, "payment opened");

        Ok(PaymentIntent {
            payment,
            qr_image_url,
        })
    }

    /// Picks the beneficiary account: an explicit bank code from the
    /// request wins over the configured default.
    async fn resolve_bank_account<C: ConnectionTrait>(
        &self,
        conn: &C,
        bank_code: Option<&str>,
    ) -> Result<bank_account::Model, ServiceError> {
        let code = bank_code
            .map(str::to_string)
            .or_else(|| self.config.default_bank_code.clone())
            .ok_or_else(|| {
                ServiceError::PaymentError(
                    "no bank account configured for bank transfers".to_string(),
                )
            })?;

        BankAccount::find()
            .filter(bank_account::Column::BankCode.eq(code.clone()))
            .filter(bank_account::Column::IsActive.eq(true))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::PaymentError(format!("no active bank account for code {}", code))
            })
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentModel, ServiceError> {
        Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Renders the stored VietQR payload as a PNG. Cash payments have no
    /// payload and yield `NotFound`.
    #[instrument(skip(self))]
    pub async fn get_qr_image(&self, payment_id: Uuid) -> Result<Vec<u8>, ServiceError> {
        let payment = self.get_payment(payment_id).await?;
        let data = payment.qr_data.ok_or_else(|| {
            ServiceError::NotFound(format!("Payment {} has no QR payload", payment_id))
        })?;
        vietqr::generate_qr_code_image(&data, 8)
    }
}

fn generate_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4().simple().to_string().to_uppercase())
}
