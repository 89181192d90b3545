use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bills::RemainderPolicy;
use crate::errors::ConfigError;

/// environment prefix, e.g. `LEDGER_SETTLEMENT__PENDING_TTL_SECS=600`
pub const ENV_PREFIX: &str = "LEDGER_";

/// upper bound for every timeout, five minutes
pub const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// upper bound for the pending reservation window, seven days
pub const MAX_PENDING_TTL_SECS: i64 = 7 * 24 * 60 * 60;

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_pending_ttl_secs() -> i64 {
    30 * 60
}

fn default_verify_timeout_ms() -> u64 {
    5_000
}

/// ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
}

/// settlement timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// upper bound for a gateway create-transaction call
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    /// how long a pending payment holds its reservation
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_ms: default_gateway_timeout_ms(),
            pending_ttl_secs: default_pending_ttl_secs(),
        }
    }
}

impl SettlementConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms.min(MAX_TIMEOUT_MS))
    }

    /// clamped to `1..=MAX_PENDING_TTL_SECS` for unvalidated values
    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_ttl_secs.clamp(1, MAX_PENDING_TTL_SECS))
    }
}

/// bill split configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default)]
    pub remainder_policy: RemainderPolicy,
}

/// gateways registered at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaysConfig {
    pub mock: Option<MockGatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockGatewayConfig {
    pub base_url: Url,
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
}

impl MockGatewayConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms.min(MAX_TIMEOUT_MS))
    }
}

impl LedgerConfig {
    /// development preset: mock gateway served from `base_url`
    pub fn development(base_url: Url) -> Self {
        Self {
            settlement: SettlementConfig::default(),
            share: ShareConfig::default(),
            gateways: GatewaysConfig {
                mock: Some(MockGatewayConfig {
                    base_url,
                    verify_timeout_ms: default_verify_timeout_ms(),
                }),
            },
        }
    }

    /// yaml document overlaid with `LEDGER_` environment variables
    pub fn figment(yaml: &str) -> Figment {
        Figment::new()
            .merge(Yaml::string(yaml))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(yaml: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = Self::figment(yaml).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("settlement.gateway_timeout_ms", self.settlement.gateway_timeout_ms)?;
        if !(1..=MAX_PENDING_TTL_SECS).contains(&self.settlement.pending_ttl_secs) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "settlement.pending_ttl_secs must be between 1 and {MAX_PENDING_TTL_SECS}, got {}",
                    self.settlement.pending_ttl_secs
                ),
            });
        }
        if let Some(mock) = &self.gateways.mock {
            check_timeout("gateways.mock.verify_timeout_ms", mock.verify_timeout_ms)?;
            if mock.base_url.cannot_be_a_base() {
                return Err(ConfigError::Invalid {
                    message: format!("gateways.mock.base_url {} is not a base url", mock.base_url),
                });
            }
        }
        Ok(())
    }
}

fn check_timeout(key: &str, millis: u64) -> Result<(), ConfigError> {
    if !(1..=MAX_TIMEOUT_MS).contains(&millis) {
        return Err(ConfigError::Invalid {
            message: format!("{key} must be between 1 and {MAX_TIMEOUT_MS}, got {millis}"),
        });
    }
    Ok(())
}
