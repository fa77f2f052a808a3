use std::{
    net::SocketAddr,
    time::Duration,
};

use alloy_primitives::Address;
use serde::{
    Deserialize,
    Serialize,
};
use url::Url;

use crate::{
    error::{
        GatewayError,
        Result,
    },
    slot::SlotClock,
};

/// Addresses of the shutter contracts on the target chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub sequencer: Address,
    pub keyper_set_manager: Address,
    pub key_broadcast: Address,
}

/// Runtime configuration for the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP server listens on (e.g. `127.0.0.1:8546`).
    pub bind_addr: SocketAddr,
    /// JSON-RPC path exposed by the gateway.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    /// Execution node every non-intercepted call is forwarded to. Also used
    /// for chain reads and contract calls.
    pub backend_http: Url,
    /// Hex private key of the account paying for sequencer submissions.
    #[serde(default, skip_serializing)]
    pub signing_key: String,
    #[serde(default)]
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub slots: SlotClock,
    /// Minimum interval between two submissions for the same sender/nonce.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Slots added to the current slot when picking the eon to encrypt for.
    #[serde(default = "default_eon_look_ahead")]
    pub eon_look_ahead: u64,
    /// Largest gas limit an encrypted transaction may declare.
    #[serde(default = "default_encrypted_gas_limit")]
    pub encrypted_gas_limit: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Deadline for a single submission, confirmation included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Keep resending candidates the gateway could not afford to submit.
    /// When disabled they are dropped on the next sweep.
    #[serde(default = "default_retry_unfunded")]
    pub retry_unfunded: bool,
}

fn default_rpc_path() -> String {
    "/".into()
}

const fn default_debounce_secs() -> u64 {
    5
}

const fn default_eon_look_ahead() -> u64 {
    8
}

const fn default_encrypted_gas_limit() -> u64 {
    10_000_000
}

const fn default_sweep_interval_secs() -> u64 {
    5
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_retry_unfunded() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8546)),
            rpc_path: default_rpc_path(),
            backend_http: Url::parse("http://127.0.0.1:8545").expect("static URL"),
            signing_key: String::new(),
            contracts: ContractAddresses::default(),
            slots: SlotClock::default(),
            debounce_secs: default_debounce_secs(),
            eon_look_ahead: default_eon_look_ahead(),
            encrypted_gas_limit: default_encrypted_gas_limit(),
            sweep_interval_secs: default_sweep_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_unfunded: default_retry_unfunded(),
        }
    }
}

impl GatewayConfig {
    /// Validates a configuration loaded from CLI flags or disk.
    pub fn validate(self) -> Result<Self> {
        if self.rpc_path.is_empty() || !self.rpc_path.starts_with('/') {
            return Err(GatewayError::InvalidConfig(
                "rpc_path must start with '/'".to_string(),
            ));
        }
        if self.slots.seconds_per_slot == 0 {
            return Err(GatewayError::InvalidConfig(
                "seconds_per_slot must be non-zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "request_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default().validate().unwrap();
        assert_eq!(config.debounce(), Duration::from_secs(5));
        assert_eq!(config.slots.seconds_per_slot, 5);
        assert!(config.retry_unfunded);
    }

    #[test]
    fn rejects_relative_rpc_path() {
        let config = GatewayConfig {
            rpc_path: "rpc".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GatewayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_slot_length() {
        let mut config = GatewayConfig::default();
        config.slots.seconds_per_slot = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "bind_addr": "0.0.0.0:8546",
            "backend_http": "http://node:8545",
            "signing_key": "0x01",
        }))
        .unwrap();
        assert_eq!(config.rpc_path, "/");
        assert_eq!(config.encrypted_gas_limit, 10_000_000);
        assert_eq!(config.eon_look_ahead, 8);
        assert_eq!(config.signing_key, "0x01");

        let serialized = serde_json::to_value(&config).unwrap();
        assert!(serialized.get("signing_key").is_none());
    }
}
