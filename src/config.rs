//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::settings::SettingsSnapshot;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
}

/// Initial system settings; runtime changes go through the settings store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub maintenance_mode: bool,
    /// Minimum withdrawal/transfer amount in minor units
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal: u64,
    /// Maximum withdrawal/transfer amount in minor units
    #[serde(default = "default_max_withdrawal")]
    pub max_withdrawal: u64,
    /// Fee on profit and capital withdrawals (100 = 1%)
    #[serde(default = "default_withdrawal_fee_bps")]
    pub withdrawal_fee_bps: u32,
    /// Fee on wallet and user transfers (50 = 0.5%)
    #[serde(default = "default_transfer_fee_bps")]
    pub transfer_fee_bps: u32,
    /// Daily percent used when a shop is created without one (100 = 1.00%)
    #[serde(default = "default_profit_bps")]
    pub default_profit_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSON state file used by the CLI
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// How long to wait for a per-resource lock before reporting a conflict
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_min_withdrawal() -> u64 {
    1_000
}

fn default_max_withdrawal() -> u64 {
    10_000_000
}

fn default_withdrawal_fee_bps() -> u32 {
    100
}

fn default_transfer_fee_bps() -> u32 {
    50
}

fn default_profit_bps() -> u32 {
    100
}

fn default_state_path() -> String {
    "wallet-state.json".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            maintenance_mode: false,
            min_withdrawal: default_min_withdrawal(),
            max_withdrawal: default_max_withdrawal(),
            withdrawal_fee_bps: default_withdrawal_fee_bps(),
            transfer_fee_bps: default_transfer_fee_bps(),
            default_profit_bps: default_profit_bps(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl SettingsConfig {
    /// First version of the runtime settings
    pub fn initial_snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            version: 1,
            maintenance_mode: self.maintenance_mode,
            min_withdrawal: self.min_withdrawal,
            max_withdrawal: self.max_withdrawal,
            withdrawal_fee_bps: self.withdrawal_fee_bps,
            transfer_fee_bps: self.transfer_fee_bps,
            default_profit_bps: self.default_profit_bps,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("engine.state_path", default_state_path())?
            .set_default("engine.lock_timeout_ms", default_lock_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WALLET_)
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.settings
            .initial_snapshot()
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if self.engine.lock_timeout_ms == 0 {
            anyhow::bail!("lock_timeout_ms must be positive");
        }

        if self.engine.state_path.trim().is_empty() {
            anyhow::bail!("state_path cannot be empty");
        }

        if self.settings.maintenance_mode {
            tracing::warn!("Starting with maintenance mode enabled - withdrawals and transfers are blocked");
        }

        Ok(())
    }

    /// Render the effective configuration for display
    pub fn display(&self) -> String {
        format!(
            r#"Configuration:
  Settings:
    maintenance_mode: {}
    min_withdrawal: {}
    max_withdrawal: {}
    withdrawal_fee: {}bps
    transfer_fee: {}bps
    default_profit: {}bps/day
  Engine:
    state_path: {}
    lock_timeout: {}ms
  Payout:
    retry_attempts: {}
    retry_base_delay: {}ms
"#,
            self.settings.maintenance_mode,
            self.settings.min_withdrawal,
            self.settings.max_withdrawal,
            self.settings.withdrawal_fee_bps,
            self.settings.transfer_fee_bps,
            self.settings.default_profit_bps,
            self.engine.state_path,
            self.engine.lock_timeout_ms,
            self.payout.retry_attempts,
            self.payout.retry_base_delay_ms,
        )
    }
}
