pub mod service;
pub mod share;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};
use crate::money::Money;
use crate::types::{ApartmentId, BillId, BillType, UserId};

pub use service::{BillImage, BillService, MemoryObjectStorage, ObjectStorage};
pub use share::{share_of, split_amount, MemberShare, RemainderPolicy};

/// largest accepted bill amount, ten billion in major units
pub const MAX_BILL_AMOUNT: Money = Money::from_minor(1_000_000_000_000);

/// a utility bill owed by an apartment collectively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub name: String,
    pub bill_type: BillType,
    /// provider-issued number, unique per apartment
    pub bill_number: i64,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub apartment_id: ApartmentId,
    pub created_at: DateTime<Utc>,
    pub image_key: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Bill {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// bill creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBill {
    pub name: String,
    pub bill_type: BillType,
    pub bill_number: i64,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub apartment_id: ApartmentId,
    pub image_key: Option<String>,
}

impl NewBill {
    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |message: &str| -> StoreResult<()> {
            Err(StoreError::InvalidRecord {
                message: message.to_string(),
            })
        };

        if self.name.trim().is_empty() {
            return invalid("bill name is required");
        }
        if self.bill_number <= 0 {
            return invalid("bill number must be greater than zero");
        }
        if self.amount.is_negative() {
            return invalid("amount cannot be negative");
        }
        if self.amount > MAX_BILL_AMOUNT {
            return invalid("amount exceeds the bill limit");
        }
        if self.apartment_id.is_nil() {
            return invalid("apartment id is required");
        }
        Ok(())
    }

    pub(crate) fn into_bill(self, id: BillId, created_at: DateTime<Utc>) -> Bill {
        Bill {
            id,
            name: self.name,
            bill_type: self.bill_type,
            bill_number: self.bill_number,
            amount: self.amount,
            due_date: self.due_date,
            apartment_id: self.apartment_id,
            created_at,
            image_key: self.image_key,
            deleted_at: None,
        }
    }
}

/// conjunction of optional bill criteria
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillFilter {
    pub id: Option<BillId>,
    pub apartment_id: Option<ApartmentId>,
    pub bill_type: Option<BillType>,
    pub bill_number: Option<i64>,
}

impl BillFilter {
    pub fn by_id(id: BillId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn apartment(mut self, apartment_id: ApartmentId) -> Self {
        self.apartment_id = Some(apartment_id);
        self
    }

    pub fn bill_type(mut self, bill_type: BillType) -> Self {
        self.bill_type = Some(bill_type);
        self
    }

    pub fn bill_number(mut self, bill_number: i64) -> Self {
        self.bill_number = Some(bill_number);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.apartment_id.is_none()
            && self.bill_type.is_none()
            && self.bill_number.is_none()
    }

    pub fn matches(&self, bill: &Bill) -> bool {
        self.id.map_or(true, |id| bill.id == id)
            && self.apartment_id.map_or(true, |a| bill.apartment_id == a)
            && self.bill_type.map_or(true, |t| bill.bill_type == t)
            && self.bill_number.map_or(true, |n| bill.bill_number == n)
    }
}

/// a user's position on one bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBillShare {
    pub user_id: UserId,
    pub bill_id: BillId,
    pub bill_name: String,
    pub total_amount: Money,
    pub member_count: u32,
    pub share_per_user: Money,
    pub user_paid: Money,
    /// live pending payments holding part of the share
    pub user_pending: Money,
    pub balance_due: Money,
}

/// bill paired with the amount being settled against it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillWithAmount {
    pub bill_id: BillId,
    pub amount: Money,
}

/// bill persistence and per-user ledger queries
#[async_trait]
pub trait BillStore: Send + Sync {
    /// insert a bill; a duplicate (apartment, bill number) is `AlreadyExists`
    async fn create(&self, bill: NewBill) -> StoreResult<Bill>;

    /// first active bill matching every set field of `filter`
    async fn read(&self, filter: &BillFilter) -> StoreResult<Bill>;

    async fn soft_delete(&self, bill_id: BillId) -> StoreResult<()>;

    /// one row per bill the user is liable for, newest first
    async fn user_bill_shares(&self, user_id: UserId) -> StoreResult<Vec<UserBillShare>>;

    /// sum of positive balances across the user's bills
    async fn user_total_debt(&self, user_id: UserId) -> StoreResult<Money>;

    /// bills with a positive balance, newest first
    async fn user_bills_balance_due(&self, user_id: UserId) -> StoreResult<Vec<BillWithAmount>>;

    /// balance on one bill; `NotFound` when the user is not liable for it
    async fn user_bill_balance_due(&self, user_id: UserId, bill_id: BillId) -> StoreResult<Money>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_bill() -> NewBill {
        NewBill {
            name: "january power".to_string(),
            bill_type: BillType::Electricity,
            bill_number: 1001,
            amount: Money::from_minor(300),
            due_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            apartment_id: Uuid::new_v4(),
            image_key: None,
        }
    }

    #[test]
    fn test_new_bill_validation() {
        assert!(new_bill().validate().is_ok());

        let mut bill = new_bill();
        bill.amount = Money::from_minor(-1);
        assert!(matches!(bill.validate(), Err(StoreError::InvalidRecord { .. })));

        let mut bill = new_bill();
        bill.bill_number = 0;
        assert!(bill.validate().is_err());

        let mut bill = new_bill();
        bill.apartment_id = Uuid::nil();
        assert!(bill.validate().is_err());

        let mut bill = new_bill();
        bill.amount = Money::ZERO;
        assert!(bill.validate().is_ok());

        let mut bill = new_bill();
        bill.amount = MAX_BILL_AMOUNT;
        assert!(bill.validate().is_ok());
        bill.amount = MAX_BILL_AMOUNT + Money::ONE;
        assert!(matches!(bill.validate(), Err(StoreError::InvalidRecord { .. })));
        bill.amount = Money::from_minor(i64::MAX);
        assert!(bill.validate().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let bill = new_bill().into_bill(Uuid::new_v4(), Utc::now());

        assert!(BillFilter::default().is_empty());
        assert!(BillFilter::by_id(bill.id).matches(&bill));
        assert!(BillFilter::default()
            .apartment(bill.apartment_id)
            .bill_number(1001)
            .matches(&bill));
        assert!(!BillFilter::default()
            .apartment(bill.apartment_id)
            .bill_type(BillType::Gas)
            .matches(&bill));
    }
}
