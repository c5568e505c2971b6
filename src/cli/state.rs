//! JSON state file shared by CLI invocations

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::engine::{Collaborators, Engine, EngineSnapshot};
use crate::external::{InMemoryKyc, KycStatus, LocalGateway};
use crate::ledger::UserId;
use crate::settings::{InMemorySettings, SettingsSnapshot, SettingsStore};

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    settings: SettingsSnapshot,
    #[serde(default)]
    kyc: BTreeMap<UserId, KycStatus>,
    engine: EngineSnapshot,
}

/// Engine plus the in-memory collaborators the CLI owns
pub struct Session {
    pub engine: Engine,
    pub settings: Arc<InMemorySettings>,
    pub kyc: Arc<InMemoryKyc>,
    path: PathBuf,
}

impl Session {
    /// Load the state file, or start empty from the configured settings
    pub async fn open(config: &Config, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (settings, kyc, snapshot) = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read state file {}", path.display()))?;
            let state: StateFile = serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse state file {}", path.display()))?;
            (state.settings, state.kyc, Some(state.engine))
        } else {
            info!("No state at {}, starting fresh", path.display());
            (config.settings.initial_snapshot(), BTreeMap::new(), None)
        };

        let settings = Arc::new(InMemorySettings::new(settings));
        let kyc = Arc::new(InMemoryKyc::from_map(kyc));
        let collaborators = Collaborators {
            settings: settings.clone(),
            kyc: kyc.clone(),
            gateway: Arc::new(LocalGateway::new()),
            clock: Arc::new(SystemClock),
        };

        let engine = match snapshot {
            Some(snapshot) => Engine::restore(config, collaborators, snapshot)?,
            None => Engine::new(config, collaborators),
        };

        Ok(Self {
            engine,
            settings,
            kyc,
            path,
        })
    }

    pub async fn save(&self) -> Result<()> {
        let state = StateFile {
            settings: self.settings.snapshot().await?,
            kyc: self.kyc.export(),
            engine: self.engine.snapshot().await?,
        };
        let data = serde_json::to_string_pretty(&state)?;
        tokio::fs::write(&self.path, data)
            .await
            .with_context(|| format!("Failed to write state file {}", self.path.display()))?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::KycProvider;
    use crate::ledger::WalletKind;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet-state.json");
        let config = Config::default();

        let session = Session::open(&config, &path).await.unwrap();
        session.kyc.set_status("alice", KycStatus::Approved);
        session.settings.set_maintenance_mode(true).await.unwrap();
        session
            .engine
            .admin_credit("alice", WalletKind::Main, 700)
            .await
            .unwrap();
        session.save().await.unwrap();

        let reopened = Session::open(&config, &path).await.unwrap();
        let settings = reopened.settings.snapshot().await.unwrap();
        assert!(settings.maintenance_mode);
        assert_eq!(settings.version, 2);
        assert_eq!(
            reopened.kyc.kyc_status("alice").await.unwrap(),
            KycStatus::Approved
        );
        assert_eq!(
            reopened.engine.get_wallet_balances("alice").await.unwrap().main,
            700
        );
    }
}
