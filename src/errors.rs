use std::time::Duration;

use thiserror::Error;

use crate::types::PaymentId;

/// failures reported by a bill or payment store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound {
        entity: &'static str,
    },

    #[error("already exists: {message}")]
    AlreadyExists {
        message: String,
    },

    #[error("filter must set at least one field")]
    EmptyFilter,

    #[error("invalid record: {message}")]
    InvalidRecord {
        message: String,
    },

    #[error("no rows affected")]
    NoRowsAffected,

    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// failures reported by a payment gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("missing token")]
    MissingToken,

    #[error("payment not complete: {message}")]
    PaymentNotComplete {
        message: String,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway did not answer within {after:?}")]
    Timeout {
        after: Duration,
    },

    #[error("malformed gateway payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl GatewayError {
    /// the provider answered and the answer was negative
    pub fn is_verdict(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingToken
                | GatewayError::PaymentNotComplete { .. }
                | GatewayError::InvalidUrl(_)
        )
    }
}

/// reasons a gateway callback is rejected
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("gateway rejected the callback: {0}")]
    Rejected(#[source] GatewayError),

    #[error("invalid callback url: {0}")]
    InvalidUrl(#[source] url::ParseError),

    #[error("callback carries no payment ids")]
    MissingPaymentIds,

    #[error("malformed payment id {value:?}")]
    MalformedPaymentId {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid {
        message: String,
    },

    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// error kinds surfaced to the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownGateway,
    NoBalanceDue,
    BillNotFound,
    InvalidBill,
    AlreadyExists,
    InvalidCallback,
    StaleOrForgedPaymentIds,
    StorageFailure,
    GatewayCommunicationFailure,
    Configuration,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("unknown gateway: {gateway}")]
    UnknownGateway {
        gateway: String,
    },

    #[error("no balance due")]
    NoBalanceDue,

    #[error("bill not found")]
    BillNotFound,

    #[error("invalid bill: {message}")]
    InvalidBill {
        message: String,
    },

    #[error("invalid bill type")]
    InvalidBillType(#[from] crate::types::UnknownBillType),

    #[error("bill already exists: {message}")]
    AlreadyExists {
        message: String,
    },

    #[error("invalid callback: {0}")]
    InvalidCallback(#[from] CallbackError),

    #[error("stale or forged payment ids: {ids:?}")]
    StaleOrForgedPaymentIds {
        ids: Vec<PaymentId>,
    },

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("gateway {gateway} communication failure: {source}")]
    GatewayCommunication {
        gateway: String,
        #[source]
        source: GatewayError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UnknownGateway { .. } => ErrorKind::UnknownGateway,
            LedgerError::NoBalanceDue => ErrorKind::NoBalanceDue,
            LedgerError::BillNotFound => ErrorKind::BillNotFound,
            LedgerError::InvalidBill { .. } | LedgerError::InvalidBillType(_) => {
                ErrorKind::InvalidBill
            }
            LedgerError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            LedgerError::InvalidCallback(_) => ErrorKind::InvalidCallback,
            LedgerError::StaleOrForgedPaymentIds { .. } => ErrorKind::StaleOrForgedPaymentIds,
            LedgerError::Storage(_) => ErrorKind::StorageFailure,
            LedgerError::GatewayCommunication { .. } => ErrorKind::GatewayCommunicationFailure,
            LedgerError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// status code hint for an http front end
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::UnknownGateway
            | ErrorKind::NoBalanceDue
            | ErrorKind::InvalidBill
            | ErrorKind::InvalidCallback
            | ErrorKind::StaleOrForgedPaymentIds => 400,
            ErrorKind::BillNotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::GatewayCommunicationFailure => 502,
            ErrorKind::StorageFailure | ErrorKind::Configuration => 500,
        }
    }

    /// walk the cause chain, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
        let mut next: Option<&(dyn std::error::Error + 'static)> = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.source();
            Some(current)
        })
    }

    /// find a cause of type `E` anywhere in the chain
    pub fn find_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.chain().find_map(|e| e.downcast_ref::<E>())
    }

    pub(crate) fn invalid_bill(message: impl Into<String>) -> Self {
        LedgerError::InvalidBill {
            message: message.into(),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "bill" } => LedgerError::BillNotFound,
            StoreError::AlreadyExists { message } => LedgerError::AlreadyExists { message },
            StoreError::InvalidRecord { message } => LedgerError::InvalidBill { message },
            other => LedgerError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status() {
        let err = LedgerError::UnknownGateway {
            gateway: "nope".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UnknownGateway);
        assert_eq!(err.http_status(), 400);

        let err: LedgerError = StoreError::NotFound { entity: "bill" }.into();
        assert_eq!(err.kind(), ErrorKind::BillNotFound);
        assert_eq!(err.http_status(), 404);

        let err: LedgerError = StoreError::Unavailable {
            message: "disk".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_cause_chain() {
        let err = LedgerError::from(CallbackError::Rejected(GatewayError::PaymentNotComplete {
            message: "payment not complete".to_string(),
        }));

        assert_eq!(err.kind(), ErrorKind::InvalidCallback);
        assert_eq!(err.chain().count(), 3);
        assert!(matches!(
            err.find_cause::<GatewayError>(),
            Some(GatewayError::PaymentNotComplete { .. })
        ));
        assert!(err.find_cause::<StoreError>().is_none());
    }

    #[test]
    fn test_gateway_verdicts() {
        assert!(GatewayError::MissingToken.is_verdict());
        assert!(!GatewayError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_verdict());
    }
}
