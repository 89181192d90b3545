pub mod bills;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod membership;
pub mod money;
pub mod payments;
pub mod storage;
pub mod types;

// re-export key types
pub use bills::{
    Bill, BillFilter, BillImage, BillService, BillStore, BillWithAmount, MemberShare,
    MemoryObjectStorage, NewBill, ObjectStorage, RemainderPolicy, UserBillShare,
};
pub use config::{GatewaysConfig, LedgerConfig, MockGatewayConfig, SettlementConfig, ShareConfig};
pub use errors::{
    CallbackError, ConfigError, ErrorKind, GatewayError, LedgerError, Result, StoreError,
};
pub use events::{Event, EventStore};
pub use gateways::{Gateway, GatewayRegistry, MockGateway, SimulatedProvider, MOCK_GATEWAY};
pub use membership::{Membership, MembershipSource};
pub use money::Money;
pub use payments::{
    CallbackData, HttpMethod, NewPayment, Payment, PaymentLedger, PaymentStore, RedirectGateway,
    Transaction, PAYMENT_IDS_KEY,
};
pub use storage::MemoryStore;
pub use types::{ApartmentId, BillId, BillType, PaymentId, PaymentStatus, UserId};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use url::Url;
pub use uuid::Uuid;
