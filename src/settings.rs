//! Versioned system settings
//!
//! Gated operations read a fresh [`SettingsSnapshot`] when they start and record
//! its version on whatever they create, so a change applies to the next call and
//! never retroactively.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::BPS_DENOMINATOR;
use crate::error::{Error, Result};

/// One immutable version of the platform settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub maintenance_mode: bool,
    pub min_withdrawal: u64,
    pub max_withdrawal: u64,
    pub withdrawal_fee_bps: u32,
    pub transfer_fee_bps: u32,
    pub default_profit_bps: u32,
}

impl SettingsSnapshot {
    pub fn validate(&self) -> Result<()> {
        if self.min_withdrawal > self.max_withdrawal {
            return Err(Error::Config(format!(
                "min_withdrawal {} exceeds max_withdrawal {}",
                self.min_withdrawal, self.max_withdrawal
            )));
        }
        if self.withdrawal_fee_bps >= BPS_DENOMINATOR || self.transfer_fee_bps >= BPS_DENOMINATOR {
            return Err(Error::Config("fee rates must be below 100%".to_string()));
        }
        if self.default_profit_bps == 0 || self.default_profit_bps > BPS_DENOMINATOR {
            return Err(Error::Config(
                "default_profit_bps must be between 1 and 10000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read side of the settings collaborator
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn snapshot(&self) -> Result<SettingsSnapshot>;
}

/// Process-local settings store
#[derive(Debug)]
pub struct InMemorySettings {
    current: RwLock<SettingsSnapshot>,
}

impl InMemorySettings {
    pub fn new(initial: SettingsSnapshot) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Apply a change and publish it as the next version
    pub async fn update<F>(&self, change: F) -> Result<SettingsSnapshot>
    where
        F: FnOnce(&mut SettingsSnapshot),
    {
        let mut current = self.current.write().await;
        let mut next = current.clone();
        change(&mut next);
        next.version = current.version + 1;
        next.validate()?;
        *current = next.clone();

        info!("Settings updated to version {}", next.version);
        Ok(next)
    }

    pub async fn set_maintenance_mode(&self, enabled: bool) -> Result<SettingsSnapshot> {
        self.update(|s| s.maintenance_mode = enabled).await
    }
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::new(crate::config::SettingsConfig::default().initial_snapshot())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn snapshot(&self) -> Result<SettingsSnapshot> {
        Ok(self.current.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemorySettings::default();
        let before = store.snapshot().await.unwrap();

        let after = store.set_maintenance_mode(true).await.unwrap();
        assert_eq!(after.version, before.version + 1);
        assert!(after.maintenance_mode);
        assert!(!before.maintenance_mode);
    }

    #[tokio::test]
    async fn test_invalid_update_is_discarded() {
        let store = InMemorySettings::default();
        let result = store.update(|s| s.min_withdrawal = s.max_withdrawal + 1).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(store.snapshot().await.unwrap().version, 1);
    }
}
