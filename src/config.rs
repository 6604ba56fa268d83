use std::net::Ipv4Addr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Dev,
    Prod,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Dev
    }
}

/// Process-wide configuration, loaded once at startup from the environment
/// (optionally via a `.env` file) and validated before any component is
/// constructed. Validation failures are always `ConfigError::Fatal`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chain_id: u64,
    pub http_rpc_url: String,
    pub ws_rpc_url: Option<String>,
    pub initiator_private_key: String,
    pub match_executor_address: String,
    pub flashbots_signer_key: Option<String>,
    pub redis_url: String,
    pub database_url: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub enable_forking: bool,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("forking is enabled but http RPC url `{0}` is not loopback")]
    ForkingRequiresLoopback(String),
}

impl AppConfig {
    /// Loads configuration from the environment, falling back to a local
    /// `.env` file if present. Mirrors the reference backend's
    /// `dotenvy::dotenv().ok()` followed by a typed load.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?;

        let cfg: AppConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_forking && !is_loopback_url(&self.http_rpc_url) {
            return Err(ConfigError::ForkingRequiresLoopback(
                self.http_rpc_url.clone(),
            ));
        }
        Ok(())
    }

    /// Whether the broadcaster should prefer the private-relay path over
    /// direct submission (see the open question resolved in DESIGN.md).
    pub fn use_private_relay(&self) -> bool {
        self.flashbots_signer_key.is_some() && self.mode == RunMode::Prod
    }
}

fn is_loopback_url(url: &str) -> bool {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', ':']).next())
        .map(|host| host == "localhost" || host.parse::<Ipv4Addr>().map(|ip| ip.is_loopback()).unwrap_or(false))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_url("http://127.0.0.1:8545"));
        assert!(is_loopback_url("http://localhost:8545"));
        assert!(!is_loopback_url("https://mainnet.infura.io/v3/abc"));
    }

    #[test]
    fn private_relay_requires_prod_and_key() {
        let mut cfg = AppConfig {
            chain_id: 1,
            http_rpc_url: "https://mainnet.infura.io/v3/abc".into(),
            ws_rpc_url: None,
            initiator_private_key: "0x00".into(),
            match_executor_address: "0x00".into(),
            flashbots_signer_key: None,
            redis_url: "redis://127.0.0.1".into(),
            database_url: "postgres://localhost/relayer".into(),
            mode: RunMode::Prod,
            enable_forking: false,
            debug: false,
        };
        assert!(!cfg.use_private_relay());
        cfg.flashbots_signer_key = Some("0x01".into());
        assert!(cfg.use_private_relay());
        cfg.mode = RunMode::Dev;
        assert!(!cfg.use_private_relay());
    }
}
