use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bills::{share_of, Bill, BillFilter, BillStore, BillWithAmount, NewBill, RemainderPolicy, UserBillShare};
use crate::config::LedgerConfig;
use crate::errors::{StoreError, StoreResult};
use crate::membership::{sort_members, Membership, MembershipSource};
use crate::money::Money;
use crate::payments::{CallbackData, NewPayment, Payment, PaymentStore};
use crate::types::{ApartmentId, BillId, PaymentId, PaymentStatus, UserId};

#[derive(Debug, Default)]
struct Tables {
    bills: Vec<Bill>,
    payments: Vec<Payment>,
    memberships: Vec<Membership>,
}

impl Tables {
    fn active_bill(&self, bill_id: BillId) -> Option<&Bill> {
        self.bills.iter().find(|b| b.id == bill_id && b.is_active())
    }

    fn eligible_members(&self, bill: &Bill) -> Vec<Membership> {
        let mut members: Vec<Membership> = self
            .memberships
            .iter()
            .filter(|m| m.apartment_id == bill.apartment_id && m.is_liable_at(bill.created_at))
            .cloned()
            .collect();
        sort_members(&mut members);
        members
    }

    fn active_payments<'a>(
        &'a self,
        user_id: UserId,
        bill_id: BillId,
    ) -> impl Iterator<Item = &'a Payment> + 'a {
        self.payments
            .iter()
            .filter(move |p| p.is_active() && p.payer_id == user_id && p.bill_id == bill_id)
    }
}

/// bills, payments and memberships held in process memory
///
/// Every operation takes the single table lock, so batch inserts and
/// batch status updates are atomic with respect to each other.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    time: Arc<SafeTimeProvider>,
    pending_ttl: chrono::Duration,
    remainder_policy: RemainderPolicy,
    #[cfg(test)]
    batch_fault: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new(time: Arc<SafeTimeProvider>, config: &LedgerConfig) -> Self {
        Self::with_settings(time, config.settlement.pending_ttl(), config.share.remainder_policy)
    }

    pub fn with_settings(
        time: Arc<SafeTimeProvider>,
        pending_ttl: chrono::Duration,
        remainder_policy: RemainderPolicy,
    ) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            time,
            pending_ttl,
            remainder_policy,
            #[cfg(test)]
            batch_fault: Mutex::new(None),
        }
    }

    /// the user's position on `bill`, or `None` if they are not liable
    fn position(&self, tables: &Tables, user_id: UserId, bill: &Bill, now: DateTime<Utc>) -> Option<UserBillShare> {
        let members = tables.eligible_members(bill);
        let share = share_of(user_id, bill.amount, &members, self.remainder_policy)?;

        let mut user_paid = Money::ZERO;
        let mut user_pending = Money::ZERO;
        for payment in tables.active_payments(user_id, bill.id) {
            if payment.status == PaymentStatus::Paid {
                user_paid += payment.amount;
            } else if payment.holds_reservation(now, self.pending_ttl) {
                user_pending += payment.amount;
            }
        }

        Some(UserBillShare {
            user_id,
            bill_id: bill.id,
            bill_name: bill.name.clone(),
            total_amount: bill.amount,
            member_count: members.len() as u32,
            share_per_user: share,
            user_paid,
            user_pending,
            balance_due: share - user_paid - user_pending,
        })
    }

    /// positions on every active bill the user is liable for, newest first
    fn positions(&self, tables: &Tables, user_id: UserId) -> Vec<UserBillShare> {
        let now = self.time.now();
        let mut bills: Vec<&Bill> = tables
            .bills
            .iter()
            .filter(|b| b.is_active())
            .filter(|b| {
                tables
                    .memberships
                    .iter()
                    .any(|m| m.user_id == user_id && m.apartment_id == b.apartment_id)
            })
            .collect();
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        bills
            .into_iter()
            .filter_map(|bill| self.position(tables, user_id, bill, now))
            .collect()
    }

    fn stage_payment(&self, tables: &Tables, payment: NewPayment, now: DateTime<Utc>) -> StoreResult<Payment> {
        payment.validate()?;
        if tables.active_bill(payment.bill_id).is_none() {
            return Err(StoreError::NotFound { entity: "bill" });
        }
        Ok(payment.into_payment(Uuid::new_v4(), now))
    }

    #[cfg(test)]
    pub(crate) fn fail_batch_at(&self, index: Option<usize>) {
        *self.batch_fault.lock() = index;
    }

    #[cfg(test)]
    fn injected_fault(&self, index: usize) -> StoreResult<()> {
        if *self.batch_fault.lock() == Some(index) {
            return Err(StoreError::Unavailable {
                message: format!("injected failure at row {index}"),
            });
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_fault(&self, _index: usize) -> StoreResult<()> {
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn soft_delete_payment(&self, id: PaymentId) {
        let now = self.time.now();
        let mut tables = self.tables.lock();
        if let Some(p) = tables.payments.iter_mut().find(|p| p.id == id) {
            p.deleted_at = Some(now);
        }
    }
}

#[async_trait]
impl BillStore for MemoryStore {
    async fn create(&self, bill: NewBill) -> StoreResult<Bill> {
        bill.validate()?;
        let now = self.time.now();
        let mut tables = self.tables.lock();

        let duplicate = tables.bills.iter().any(|b| {
            b.is_active() && b.apartment_id == bill.apartment_id && b.bill_number == bill.bill_number
        });
        if duplicate {
            return Err(StoreError::AlreadyExists {
                message: format!("bill number {} already recorded for apartment", bill.bill_number),
            });
        }

        let bill = bill.into_bill(Uuid::new_v4(), now);
        tables.bills.push(bill.clone());
        Ok(bill)
    }

    async fn read(&self, filter: &BillFilter) -> StoreResult<Bill> {
        if filter.is_empty() {
            return Err(StoreError::EmptyFilter);
        }
        let tables = self.tables.lock();
        tables
            .bills
            .iter()
            .find(|b| b.is_active() && filter.matches(b))
            .cloned()
            .ok_or(StoreError::NotFound { entity: "bill" })
    }

    async fn soft_delete(&self, bill_id: BillId) -> StoreResult<()> {
        let now = self.time.now();
        let mut tables = self.tables.lock();
        let bill = tables
            .bills
            .iter_mut()
            .find(|b| b.id == bill_id && b.is_active())
            .ok_or(StoreError::NotFound { entity: "bill" })?;
        bill.deleted_at = Some(now);
        Ok(())
    }

    async fn user_bill_shares(&self, user_id: UserId) -> StoreResult<Vec<UserBillShare>> {
        let tables = self.tables.lock();
        Ok(self.positions(&tables, user_id))
    }

    async fn user_total_debt(&self, user_id: UserId) -> StoreResult<Money> {
        let tables = self.tables.lock();
        self.positions(&tables, user_id)
            .iter()
            .try_fold(Money::ZERO, |total, p| total.checked_add(p.balance_due.clamp_non_negative()))
            .ok_or_else(|| StoreError::InvalidRecord {
                message: "total debt overflows".to_string(),
            })
    }

    async fn user_bills_balance_due(&self, user_id: UserId) -> StoreResult<Vec<BillWithAmount>> {
        let tables = self.tables.lock();
        Ok(self
            .positions(&tables, user_id)
            .into_iter()
            .filter(|p| p.balance_due.is_positive())
            .map(|p| BillWithAmount {
                bill_id: p.bill_id,
                amount: p.balance_due,
            })
            .collect())
    }

    async fn user_bill_balance_due(&self, user_id: UserId, bill_id: BillId) -> StoreResult<Money> {
        let now = self.time.now();
        let tables = self.tables.lock();
        let bill = tables
            .active_bill(bill_id)
            .ok_or(StoreError::NotFound { entity: "bill" })?;
        self.position(&tables, user_id, bill, now)
            .map(|p| p.balance_due)
            .ok_or(StoreError::NotFound { entity: "bill" })
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn create_payment(&self, payment: NewPayment) -> StoreResult<Payment> {
        let now = self.time.now();
        let mut tables = self.tables.lock();
        let payment = self.stage_payment(&tables, payment, now)?;
        tables.payments.push(payment.clone());
        Ok(payment)
    }

    async fn batch_create_payments(&self, payments: Vec<NewPayment>) -> StoreResult<Vec<Payment>> {
        let now = self.time.now();
        let mut tables = self.tables.lock();

        let mut staged = Vec::with_capacity(payments.len());
        for (idx, payment) in payments.into_iter().enumerate() {
            self.injected_fault(idx)?;
            staged.push(self.stage_payment(&tables, payment, now)?);
        }

        tables.payments.extend(staged.iter().cloned());
        Ok(staged)
    }

    async fn update_status(
        &self,
        ids: &[PaymentId],
        status: PaymentStatus,
        callback: Option<&CallbackData>,
    ) -> StoreResult<Vec<PaymentId>> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidRecord {
                message: format!("payments cannot move to {status}"),
            });
        }

        let now = self.time.now();
        let mut tables = self.tables.lock();
        let mut updated = Vec::new();
        for payment in tables.payments.iter_mut() {
            if !payment.is_active() || !ids.contains(&payment.id) || !payment.status.can_transition_to(status) {
                continue;
            }
            // a lapsed reservation may already be re-reserved by a newer payment
            if status == PaymentStatus::Paid && !payment.holds_reservation(now, self.pending_ttl) {
                continue;
            }
            payment.status = status;
            payment.updated_at = now;
            if status == PaymentStatus::Paid {
                payment.paid_at = Some(now);
            }
            if let Some(data) = callback {
                payment.callback_data = Some(data.clone());
            }
            updated.push(payment.id);
        }

        if updated.is_empty() {
            return Err(StoreError::NoRowsAffected);
        }
        Ok(updated)
    }

    async fn set_transaction_reference(&self, ids: &[PaymentId], reference: &str) -> StoreResult<()> {
        let now = self.time.now();
        let mut tables = self.tables.lock();
        let mut touched = 0;
        for payment in tables.payments.iter_mut().filter(|p| p.is_active() && ids.contains(&p.id)) {
            payment.transaction_id = Some(reference.to_string());
            payment.updated_at = now;
            touched += 1;
        }
        if touched == 0 {
            return Err(StoreError::NoRowsAffected);
        }
        Ok(())
    }

    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<PaymentId>> {
        let now = self.time.now();
        let mut tables = self.tables.lock();
        let mut expired = Vec::new();
        for payment in tables.payments.iter_mut() {
            if payment.is_active() && payment.status == PaymentStatus::Pending && payment.created_at < cutoff {
                payment.status = PaymentStatus::Cancelled;
                payment.updated_at = now;
                expired.push(payment.id);
            }
        }
        Ok(expired)
    }

    async fn payment(&self, id: PaymentId) -> StoreResult<Payment> {
        let tables = self.tables.lock();
        tables
            .payments
            .iter()
            .find(|p| p.id == id && p.is_active())
            .cloned()
            .ok_or(StoreError::NotFound { entity: "payment" })
    }

    async fn payments_for(&self, payer_id: UserId) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.lock();
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.is_active() && p.payer_id == payer_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MembershipSource for MemoryStore {
    async fn add_member(
        &self,
        user_id: UserId,
        apartment_id: ApartmentId,
        joined_at: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let mut tables = self.tables.lock();
        if tables
            .memberships
            .iter()
            .any(|m| m.user_id == user_id && m.apartment_id == apartment_id)
        {
            return Err(StoreError::AlreadyExists {
                message: format!("user {user_id} is already a member"),
            });
        }
        let membership = Membership {
            user_id,
            apartment_id,
            joined_at,
        };
        tables.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn members_as_of(&self, apartment_id: ApartmentId, at: DateTime<Utc>) -> StoreResult<Vec<Membership>> {
        let tables = self.tables.lock();
        let mut members: Vec<Membership> = tables
            .memberships
            .iter()
            .filter(|m| m.apartment_id == apartment_id && m.is_liable_at(at))
            .cloned()
            .collect();
        sort_members(&mut members);
        Ok(members)
    }

    async fn apartments_of(&self, user_id: UserId) -> StoreResult<Vec<ApartmentId>> {
        let tables = self.tables.lock();
        let mut apartments: Vec<ApartmentId> = tables
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.apartment_id)
            .collect();
        apartments.dedup();
        Ok(apartments)
    }
}
