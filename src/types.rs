use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// unique identifier for a user
pub type UserId = Uuid;

/// unique identifier for an apartment
pub type ApartmentId = Uuid;

/// unique identifier for a bill
pub type BillId = Uuid;

/// unique identifier for a payment
pub type PaymentId = Uuid;

/// utility bill types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillType {
    Electricity,
    Water,
    Gas,
}

impl BillType {
    pub const ALL: [BillType; 3] = [BillType::Electricity, BillType::Water, BillType::Gas];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillType::Electricity => "electricity",
            BillType::Water => "water",
            BillType::Gas => "gas",
        }
    }
}

impl fmt::Display for BillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized bill type: {0}")]
pub struct UnknownBillType(pub String);

impl FromStr for BillType {
    type Err = UnknownBillType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BillType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownBillType(s.to_string()))
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// created, waiting for the gateway callback
    Pending,
    /// confirmed by the gateway
    Paid,
    /// rejected by the gateway
    Failed,
    /// abandoned: gateway error, timeout or expiry
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// terminal states never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// one-way transitions out of pending
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(self, PaymentStatus::Pending) && next.is_terminal()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
