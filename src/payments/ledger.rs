//! Payment orchestration: settling bills through a gateway and resolving
//! the gateway's callback.
//!
//! Balance check and payment insert run under the payer's lock, and live
//! pending payments count against the balance, so two racing settlements
//! for the same payer cannot both reserve the same debt. The gateway call
//! happens after the lock is released and is bounded by the configured
//! timeout; a failed or timed-out call cancels the payments it was opened
//! for.

use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::bills::BillStore;
use crate::config::SettlementConfig;
use crate::errors::{CallbackError, GatewayError, LedgerError, Result, StoreError};
use crate::events::{Event, EventStore};
use crate::gateways::{Gateway, GatewayRegistry};
use crate::types::{BillId, PaymentId, PaymentStatus, UserId};

use super::{
    callback_url_with_payment_ids, payment_ids_from, CallbackData, NewPayment, PayerLocks, Payment,
    PaymentStore, RedirectGateway, Transaction,
};

pub struct PaymentLedger {
    bills: Arc<dyn BillStore>,
    payments: Arc<dyn PaymentStore>,
    gateways: GatewayRegistry,
    locks: PayerLocks,
    settlement: SettlementConfig,
    time: Arc<SafeTimeProvider>,
    events: Mutex<EventStore>,
}

impl PaymentLedger {
    pub fn new(
        bills: Arc<dyn BillStore>,
        payments: Arc<dyn PaymentStore>,
        gateways: GatewayRegistry,
        settlement: SettlementConfig,
        time: Arc<SafeTimeProvider>,
    ) -> Self {
        Self {
            bills,
            payments,
            gateways,
            locks: PayerLocks::new(),
            settlement,
            time,
            events: Mutex::new(EventStore::new()),
        }
    }

    /// settle the payer's full balance on one bill
    #[tracing::instrument(skip_all, fields(gateway = %gateway, payer_id = %payer_id, bill_id = %bill_id))]
    pub async fn pay_bill(
        &self,
        gateway: &str,
        payer_id: UserId,
        bill_id: BillId,
        callback_base: &str,
    ) -> Result<RedirectGateway> {
        let provider = self.gateways.get(gateway)?;
        let callback_base = parse_callback_base(callback_base)?;

        let payment = {
            let _guard = self.locks.acquire(payer_id).await;
            let balance = self.bills.user_bill_balance_due(payer_id, bill_id).await?;
            if !balance.is_positive() {
                debug!(balance = %balance, "nothing to settle");
                return Err(LedgerError::NoBalanceDue);
            }
            self.payments
                .create_payment(NewPayment {
                    bill_id,
                    payer_id,
                    amount: balance,
                    gateway: gateway.to_string(),
                })
                .await?
        };

        self.record_initiated(std::slice::from_ref(&payment));
        self.open_transaction(gateway, provider, payer_id, vec![payment], &callback_base)
            .await
    }

    /// settle every bill the payer owes on, in one gateway transaction
    #[tracing::instrument(skip_all, fields(gateway = %gateway, payer_id = %payer_id))]
    pub async fn pay_total_debt(
        &self,
        gateway: &str,
        payer_id: UserId,
        callback_base: &str,
    ) -> Result<RedirectGateway> {
        let provider = self.gateways.get(gateway)?;
        let callback_base = parse_callback_base(callback_base)?;

        let payments = {
            let _guard = self.locks.acquire(payer_id).await;
            let due = self.bills.user_bills_balance_due(payer_id).await?;
            let requests: Vec<NewPayment> = due
                .into_iter()
                .filter(|b| b.amount.is_positive())
                .map(|b| NewPayment {
                    bill_id: b.bill_id,
                    payer_id,
                    amount: b.amount,
                    gateway: gateway.to_string(),
                })
                .collect();
            if requests.is_empty() {
                debug!("no bills with a balance due");
                return Err(LedgerError::NoBalanceDue);
            }
            self.payments.batch_create_payments(requests).await?
        };

        self.record_initiated(&payments);
        self.open_transaction(gateway, provider, payer_id, payments, &callback_base)
            .await
    }

    /// verify a gateway callback and mark its payments paid
    ///
    /// Returns the ids that moved to `paid`. A callback whose payments are
    /// no longer pending is `StaleOrForgedPaymentIds`.
    #[tracing::instrument(skip_all, fields(gateway = %gateway))]
    pub async fn handle_callback(&self, gateway: &str, data: &CallbackData) -> Result<Vec<PaymentId>> {
        let provider = self.gateways.get(gateway)?;

        let timeout = self.settlement.gateway_timeout();
        let verified = match tokio::time::timeout(timeout, provider.verify_transaction(data)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout { after: timeout }),
        };
        if let Err(source) = verified {
            if source.is_verdict() {
                self.record_rejection(gateway, &source.to_string());
                return Err(CallbackError::Rejected(source).into());
            }
            warn!(error = %source, "callback verification failed");
            return Err(LedgerError::GatewayCommunication {
                gateway: gateway.to_string(),
                source,
            });
        }

        let ids = payment_ids_from(data).map_err(|err| {
            self.record_rejection(gateway, &err.to_string());
            err
        })?;

        match self.payments.update_status(&ids, PaymentStatus::Paid, Some(data)).await {
            Ok(settled) => {
                info!(count = settled.len(), "payments settled");
                self.emit(Event::PaymentsSettled {
                    payment_ids: settled.clone(),
                    gateway: gateway.to_string(),
                    timestamp: self.time.now(),
                });
                Ok(settled)
            }
            Err(StoreError::NoRowsAffected) => {
                warn!(ids = ?ids, "callback matched no pending payments");
                self.record_rejection(gateway, "no pending payments matched");
                Err(LedgerError::StaleOrForgedPaymentIds { ids })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// registered gateway names, sorted
    pub fn supported_gateways(&self) -> Vec<String> {
        self.gateways.names()
    }

    /// cancel pending payments older than the reservation window
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale_payments(&self) -> Result<Vec<PaymentId>> {
        let now = self.time.now();
        let cutoff = now - self.settlement.pending_ttl();
        let expired = self.payments.expire_pending(cutoff).await?;

        if !expired.is_empty() {
            info!(count = expired.len(), cutoff = %cutoff, "stale payments expired");
            self.emit(Event::StalePaymentsExpired {
                payment_ids: expired.clone(),
                cutoff,
                timestamp: now,
            });
        }
        Ok(expired)
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.events.lock().take_events()
    }

    async fn open_transaction(
        &self,
        gateway: &str,
        provider: Arc<dyn Gateway>,
        payer_id: UserId,
        payments: Vec<Payment>,
        callback_base: &Url,
    ) -> Result<RedirectGateway> {
        let ids: Vec<PaymentId> = payments.iter().map(|p| p.id).collect();

        let callback_url = match callback_url_with_payment_ids(callback_base.as_str(), &ids) {
            Ok(url) => url,
            Err(err) => {
                self.cancel(&ids, "callback url rejected").await;
                return Err(CallbackError::InvalidUrl(err).into());
            }
        };
        let tx = Transaction::for_payments(payer_id, &payments, callback_url);

        let timeout = self.settlement.gateway_timeout();
        let created = match tokio::time::timeout(timeout, provider.create_transaction(&tx)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout { after: timeout }),
        };
        let redirect = match created {
            Ok(redirect) => redirect,
            Err(source) => {
                warn!(error = %source, "gateway failed to create transaction");
                self.cancel(&ids, &format!("gateway failure: {source}")).await;
                return Err(LedgerError::GatewayCommunication {
                    gateway: gateway.to_string(),
                    source,
                });
            }
        };

        if let Some(reference) = &redirect.reference {
            if let Err(err) = self.payments.set_transaction_reference(&ids, reference).await {
                warn!(reference = %reference, error = %err, "failed to store transaction reference");
                self.emit(Event::TransactionReferenceUnrecorded {
                    payment_ids: ids.clone(),
                    reference: reference.clone(),
                    reason: err.to_string(),
                    timestamp: self.time.now(),
                });
            }
        }

        info!(amount = %tx.amount, payments = ids.len(), "transaction created");
        self.emit(Event::TransactionCreated {
            payer_id,
            payment_ids: ids,
            amount: tx.amount,
            gateway: gateway.to_string(),
            reference: redirect.reference.clone(),
            timestamp: self.time.now(),
        });
        Ok(redirect)
    }

    /// release the reservation held by payments that will never be settled
    async fn cancel(&self, ids: &[PaymentId], reason: &str) {
        match self.payments.update_status(ids, PaymentStatus::Cancelled, None).await {
            Ok(cancelled) => self.emit(Event::PaymentsCancelled {
                payment_ids: cancelled,
                reason: reason.to_string(),
                timestamp: self.time.now(),
            }),
            Err(err) => warn!(ids = ?ids, error = %err, "failed to cancel payments"),
        }
    }

    fn record_initiated(&self, payments: &[Payment]) {
        let timestamp = self.time.now();
        let mut events = self.events.lock();
        for p in payments {
            events.emit(Event::PaymentInitiated {
                payment_id: p.id,
                payer_id: p.payer_id,
                bill_id: p.bill_id,
                amount: p.amount,
                gateway: p.gateway.clone(),
                timestamp,
            });
        }
    }

    fn record_rejection(&self, gateway: &str, reason: &str) {
        self.emit(Event::CallbackRejected {
            gateway: gateway.to_string(),
            reason: reason.to_string(),
            timestamp: self.time.now(),
        });
    }

    fn emit(&self, event: Event) {
        self.events.lock().emit(event);
    }
}

fn parse_callback_base(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|err| CallbackError::InvalidUrl(err).into())
}
