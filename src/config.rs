//! Configuration management for the HeartSync coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    pub ledger: LedgerConfig,
    pub listener: ListenerConfig,
    pub escrow: EscrowConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Buffer size of the command, event and completion channels
    pub channel_buffer: usize,
    /// Log in with the configured wallet on startup
    pub auto_login: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub profile_manager_address: String,
    pub matchmaker_address: String,
    pub escrow_chat_address: String,
    /// Blocks on top of the inclusion block before a mutation counts as confirmed
    pub confirmation_blocks: u64,
    pub receipt_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub poll_interval_ms: u64,
    /// Block the matchmaker was deployed at; rewinds replay from here
    pub replay_from_block: u64,
    pub max_block_range: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscrowConfig {
    /// Deposit attached to `deposit(matchId)`, in wei, as a decimal string
    pub deposit_wei: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite file path, or `:memory:`
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Name of the environment variable holding the wallet private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("HEARTSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.ledger.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }

        for (name, address) in [
            ("profile_manager_address", &self.ledger.profile_manager_address),
            ("matchmaker_address", &self.ledger.matchmaker_address),
            ("escrow_chat_address", &self.ledger.escrow_chat_address),
        ] {
            address
                .parse::<Address>()
                .with_context(|| format!("Invalid {}: {:?}", name, address))?;
        }

        self.escrow.deposit_amount()?;

        if self.listener.max_block_range == 0 {
            anyhow::bail!("listener.max_block_range must be at least 1");
        }
        if self.coordinator.channel_buffer == 0 {
            anyhow::bail!("coordinator.channel_buffer must be at least 1");
        }

        Ok(())
    }
}

impl EscrowConfig {
    /// Deposit amount as wei
    pub fn deposit_amount(&self) -> Result<U256> {
        crate::store::codec::parse_digits(&self.deposit_wei)
            .map_err(|e| anyhow::anyhow!("Invalid escrow.deposit_wei: {}", e))
    }
}

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [coordinator]
        channel_buffer = 64
        auto_login = true

        [ledger]
        chain_id = 11155111
        rpc_urls = ["https://rpc.sepolia.example/${HEARTSYNC_TEST_KEY}"]
        profile_manager_address = "0x82a258D30E1E50182Ec9A938b1A81253F213E6E5"
        matchmaker_address = "0xAb50fF3A58506Fd064768d213841CD08c62594da"
        escrow_chat_address = "0x02bD6eCF3E593EBFBf1a121103944884976A5d5a"
        confirmation_blocks = 2
        receipt_poll_interval_ms = 1500

        [listener]
        poll_interval_ms = 2000
        replay_from_block = 5000000
        max_block_range = 1000

        [escrow]
        deposit_wei = "10000000000000000"

        [store]
        path = ":memory:"
        max_connections = 1

        [session]
        private_key_env = "HEARTSYNC_PRIVATE_KEY"

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_sample_settings_parse() {
        env::set_var("HEARTSYNC_TEST_KEY", "abc123");
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.ledger.rpc_urls[0], "https://rpc.sepolia.example/abc123");
        assert_eq!(
            settings.escrow.deposit_amount().unwrap(),
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_rejects_bad_contract_address() {
        let broken = SAMPLE.replace(
            "0x02bD6eCF3E593EBFBf1a121103944884976A5d5a",
            "not-an-address",
        );
        assert!(Settings::from_toml(&broken).is_err());
    }

    #[test]
    fn test_rejects_non_decimal_deposit() {
        let broken = SAMPLE.replace("\"10000000000000000\"", "\"0.01\"");
        assert!(Settings::from_toml(&broken).is_err());
    }
}
