//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the signing key, the Telegram token) are referenced by env-var
//! name in the config and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::executor::ExecutorConfig;
use crate::ledger::evm::EvmSettings;
use crate::strategy::admission::AdmissionConfig;
use crate::strategy::kelly::{SizingConfig, SizingMode};
use crate::types::{BotError, BotResult};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    pub params: ParamsConfig,
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Broadcast real transactions. Off means dry run.
    #[serde(default)]
    pub live: bool,
    /// Claim winnings of settled rounds.
    #[serde(default = "default_true")]
    pub claim: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_hourly")]
    pub balance_refresh_secs: u64,
    #[serde(default = "default_hourly")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// How many epochs behind the current one settlement runs.
    #[serde(default = "default_settlement_lag")]
    pub settlement_lag: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub prediction_contract: String,
    pub oracle_contract: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub private_key_env: String,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedsConfig {
    #[serde(default)]
    pub exchange_base_url: Option<String>,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            exchange_base_url: None,
            symbol: default_symbol(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Strategy parameters. Amounts in native coin.
#[derive(Debug, Deserialize, Clone)]
pub struct ParamsConfig {
    pub win_probability: Decimal,
    pub bet_threshold: Decimal,
    pub min_bet_odds: Decimal,
    pub min_bet_size: Decimal,
    pub max_bet_size: Decimal,
    pub default_bet_size: Decimal,
    #[serde(default)]
    pub min_pool_size: Decimal,
    pub min_balance: Decimal,
    #[serde(default = "default_kelly_cap")]
    pub kelly_cap: Decimal,
    #[serde(default)]
    pub sizing: SizingMode,
    /// Held back from the cached balance for gas.
    #[serde(default)]
    pub gas_reserve: Decimal,
    /// When > 0, replaces the chain balance in sizing.
    #[serde(default)]
    pub balance_override: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Gas price in gwei.
    pub gas_price: Decimal,
    pub gas: u64,
    #[serde(default = "default_claim_gas")]
    pub claim_gas: u64,
    pub blocks_away: u64,
    pub execution_block: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://roundwager.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8088,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    500
}
fn default_error_backoff_ms() -> u64 {
    2_000
}
fn default_hourly() -> u64 {
    3_600
}
fn default_receipt_timeout_secs() -> u64 {
    60
}
fn default_settlement_lag() -> u64 {
    2
}
fn default_chain_id() -> u64 {
    56
}
fn default_call_timeout_secs() -> u64 {
    10
}
fn default_symbol() -> String {
    "BNBUSDT".to_string()
}
fn default_kelly_cap() -> Decimal {
    dec!(0.3)
}
fn default_claim_gas() -> u64 {
    200_000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the strategy cannot run with.
    pub fn validate(&self) -> BotResult<()> {
        let p = &self.params;
        let fail = |msg: String| Err(BotError::Configuration(msg));

        if p.win_probability <= Decimal::ZERO || p.win_probability >= Decimal::ONE {
            return fail(format!(
                "win_probability must be in (0, 1), got {}",
                p.win_probability
            ));
        }
        if p.bet_threshold < Decimal::ZERO {
            return fail(format!("bet_threshold must be >= 0, got {}", p.bet_threshold));
        }
        if p.kelly_cap <= Decimal::ZERO || p.kelly_cap > Decimal::ONE {
            return fail(format!("kelly_cap must be in (0, 1], got {}", p.kelly_cap));
        }
        if p.min_bet_size <= Decimal::ZERO {
            return fail(format!("min_bet_size must be > 0, got {}", p.min_bet_size));
        }
        if p.min_bet_size > p.max_bet_size {
            return fail(format!(
                "min_bet_size {} exceeds max_bet_size {}",
                p.min_bet_size, p.max_bet_size
            ));
        }
        if p.min_bet_odds < Decimal::ONE {
            return fail(format!("min_bet_odds must be >= 1, got {}", p.min_bet_odds));
        }
        if p.gas_reserve < Decimal::ZERO || p.balance_override < Decimal::ZERO {
            return fail("gas_reserve and balance_override must be >= 0".to_string());
        }

        let e = &self.execution;
        if e.execution_block > e.blocks_away {
            return fail(format!(
                "execution_block {} must not exceed blocks_away {}",
                e.execution_block, e.blocks_away
            ));
        }
        if e.gas == 0 || e.claim_gas == 0 {
            return fail("gas limits must be > 0".to_string());
        }
        if e.gas_price <= Decimal::ZERO {
            return fail(format!("gas_price must be > 0, got {}", e.gas_price));
        }

        if self.agent.tick_interval_ms == 0 {
            return fail("tick_interval_ms must be > 0".to_string());
        }
        if self.agent.settlement_lag == 0 {
            return fail("settlement_lag must be >= 1".to_string());
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The signing key, read from the env var named in `[ledger]`.
    pub fn private_key(&self) -> BotResult<SecretString> {
        std::env::var(&self.ledger.private_key_env)
            .map(SecretString::new)
            .map_err(|_| {
                BotError::Configuration(format!(
                    "environment variable {} not set",
                    self.ledger.private_key_env
                ))
            })
    }

    pub fn sizing_config(&self) -> SizingConfig {
        let p = &self.params;
        SizingConfig {
            win_probability: p.win_probability,
            bet_threshold: p.bet_threshold,
            kelly_cap: p.kelly_cap,
            min_bet_size: p.min_bet_size,
            max_bet_size: p.max_bet_size,
            default_bet_size: p.default_bet_size,
            mode: p.sizing,
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            blocks_away: self.execution.blocks_away,
            execution_block: self.execution.execution_block,
            min_balance: self.params.min_balance,
            min_pool_size: self.params.min_pool_size,
            min_bet_odds: self.params.min_bet_odds,
        }
    }

    pub fn executor_config(&self, account: String) -> ExecutorConfig {
        ExecutorConfig {
            account,
            gas: self.execution.gas,
            claim_gas: self.execution.claim_gas,
            gas_price_gwei: self.execution.gas_price,
            dry_run: !self.agent.live,
            ..ExecutorConfig::default()
        }
    }

    pub fn evm_settings(&self) -> EvmSettings {
        EvmSettings {
            rpc_url: self.ledger.rpc_url.clone(),
            contract_address: self.ledger.prediction_contract.clone(),
            chain_id: self.ledger.chain_id,
            call_timeout: Duration::from_secs(self.ledger.call_timeout_secs),
        }
    }
}
