pub mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GatewaysConfig;
use crate::errors::{GatewayError, LedgerError, Result};
use crate::payments::{CallbackData, RedirectGateway, Transaction};

pub use mock::{
    HttpMockProvider, MockGateway, MockProvider, PayRequest, SimulatedProvider, VerifyResponse,
    MOCK_GATEWAY, MOCK_TOKEN,
};

/// an external payment provider
#[async_trait]
pub trait Gateway: Send + Sync {
    /// turn a transaction into a redirect for the payer
    ///
    /// Must carry the transaction's callback URL, query included, so the
    /// provider can send the payer back. Never touches bill or payment state.
    async fn create_transaction(&self, tx: &Transaction) -> std::result::Result<RedirectGateway, GatewayError>;

    /// re-check an inbound callback with the provider
    ///
    /// Safe to repeat for the same data. `PaymentNotComplete` and
    /// `MissingToken` are verdicts; transport errors are not.
    async fn verify_transaction(&self, data: &CallbackData) -> std::result::Result<(), GatewayError>;
}

/// fixed name → gateway mapping built at startup
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<dyn Gateway>>,
}

impl fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("gateways", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GatewayRegistry {
    pub fn builder() -> GatewayRegistryBuilder {
        GatewayRegistryBuilder::default()
    }

    /// registry for the gateways enabled in configuration
    pub fn from_config(config: &GatewaysConfig) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(mock) = &config.mock {
            let provider = HttpMockProvider::new(mock.base_url.clone(), mock.verify_timeout())
                .map_err(|source| LedgerError::GatewayCommunication {
                    gateway: MOCK_GATEWAY.to_string(),
                    source,
                })?;
            builder = builder.register(MOCK_GATEWAY, MockGateway::new(mock.base_url.clone(), provider));
        }
        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Gateway>> {
        self.gateways
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownGateway {
                gateway: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gateways.contains_key(name)
    }

    /// registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}

#[derive(Default)]
pub struct GatewayRegistryBuilder {
    gateways: BTreeMap<String, Arc<dyn Gateway>>,
}

impl GatewayRegistryBuilder {
    pub fn register<G: Gateway + 'static>(mut self, name: impl Into<String>, gateway: G) -> Self {
        self.gateways.insert(name.into(), Arc::new(gateway));
        self
    }

    pub fn build(self) -> GatewayRegistry {
        GatewayRegistry {
            gateways: self.gateways,
        }
    }
}
