pub mod callback;
pub mod ledger;
pub mod locks;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bills::{BillWithAmount, MAX_BILL_AMOUNT};
use crate::errors::{StoreError, StoreResult};
use crate::money::Money;
use crate::types::{BillId, PaymentId, PaymentStatus, UserId};

pub use callback::{
    callback_data_from_url, callback_url_with_payment_ids, payment_ids_from, PAYMENT_IDS_KEY,
};
pub use ledger::PaymentLedger;
pub use locks::PayerLocks;

/// raw callback parameters: every key may repeat
pub type CallbackData = BTreeMap<String, Vec<String>>;

/// money moved, or attempted, against one bill by one payer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub bill_id: BillId,
    pub payer_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub gateway: String,
    pub transaction_id: Option<String>,
    pub callback_data: Option<CallbackData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// pending and still inside its reservation window
    pub fn holds_reservation(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.is_active()
            && self.status == PaymentStatus::Pending
            && self.created_at.checked_add_signed(ttl).map_or(true, |until| until > now)
    }
}

/// payment creation request; rows always start out pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub bill_id: BillId,
    pub payer_id: UserId,
    pub amount: Money,
    pub gateway: String,
}

impl NewPayment {
    pub fn validate(&self) -> StoreResult<()> {
        if !self.amount.is_positive() {
            return Err(StoreError::InvalidRecord {
                message: format!("payment amount must be positive, got {}", self.amount),
            });
        }
        if self.amount > MAX_BILL_AMOUNT {
            return Err(StoreError::InvalidRecord {
                message: format!("payment amount {} exceeds the bill limit", self.amount),
            });
        }
        Ok(())
    }

    pub(crate) fn into_payment(self, id: PaymentId, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            bill_id: self.bill_id,
            payer_id: self.payer_id,
            amount: self.amount,
            status: PaymentStatus::Pending,
            gateway: self.gateway,
            transaction_id: None,
            callback_data: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            deleted_at: None,
        }
    }
}

/// what a gateway is asked to collect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payment_ids: Vec<PaymentId>,
    pub payer_id: UserId,
    pub bills: Vec<BillWithAmount>,
    pub amount: Money,
    pub callback_url: Url,
}

impl Transaction {
    /// builds a transaction whose amount is the sum of its bills
    pub fn for_payments(payer_id: UserId, payments: &[Payment], callback_url: Url) -> Self {
        let bills: Vec<BillWithAmount> = payments
            .iter()
            .map(|p| BillWithAmount {
                bill_id: p.bill_id,
                amount: p.amount,
            })
            .collect();
        Self {
            payment_ids: payments.iter().map(|p| p.id).collect(),
            payer_id,
            amount: bills.iter().map(|b| b.amount).sum(),
            bills,
            callback_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// instruction for the payer's client to continue at the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectGateway {
    pub method: HttpMethod,
    pub url: Url,
    pub body: serde_json::Map<String, serde_json::Value>,
    /// gateway-side transaction reference, when the gateway issues one
    pub reference: Option<String>,
}

/// payment persistence; every mutation of payment rows goes through here
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create_payment(&self, payment: NewPayment) -> StoreResult<Payment>;

    /// all rows are created or none are
    async fn batch_create_payments(&self, payments: Vec<NewPayment>) -> StoreResult<Vec<Payment>>;

    /// move pending rows among `ids` to `status` in one step
    ///
    /// Returns the ids that changed. Rows that are not pending are left
    /// alone, and a pending row past its reservation window cannot become
    /// `Paid`; if nothing changed the result is `NoRowsAffected`.
    async fn update_status(
        &self,
        ids: &[PaymentId],
        status: PaymentStatus,
        callback: Option<&CallbackData>,
    ) -> StoreResult<Vec<PaymentId>>;

    async fn set_transaction_reference(&self, ids: &[PaymentId], reference: &str) -> StoreResult<()>;

    /// cancel pending rows created before `cutoff`
    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PaymentId>>;

    async fn payment(&self, id: PaymentId) -> StoreResult<Payment>;

    async fn payments_for(&self, payer_id: UserId) -> StoreResult<Vec<Payment>>;
}
