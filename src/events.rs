use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{BillId, PaymentId, UserId};

/// all events emitted by the payment ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // settlement start
    PaymentInitiated {
        payment_id: PaymentId,
        payer_id: UserId,
        bill_id: BillId,
        amount: Money,
        gateway: String,
        timestamp: DateTime<Utc>,
    },
    TransactionCreated {
        payer_id: UserId,
        payment_ids: Vec<PaymentId>,
        amount: Money,
        gateway: String,
        reference: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// the redirect went out but its reference was not stored
    TransactionReferenceUnrecorded {
        payment_ids: Vec<PaymentId>,
        reference: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // callback resolution
    PaymentsSettled {
        payment_ids: Vec<PaymentId>,
        gateway: String,
        timestamp: DateTime<Utc>,
    },
    CallbackRejected {
        gateway: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // reservations released without payment
    PaymentsCancelled {
        payment_ids: Vec<PaymentId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StalePaymentsExpired {
        payment_ids: Vec<PaymentId>,
        cutoff: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
