//! Ledger snapshot persistence
//!
//! Lets separate CLI invocations continue the same simulated ledger by
//! keeping the whole [`LedgerState`] in one JSON file.

use crate::ledger::sim::LedgerState;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// JSON snapshot of a simulated ledger
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default snapshot location under the user's data directory
    pub fn default_path() -> Result<PathBuf> {
        Self::path_in(dirs::data_dir())
    }

    fn path_in(data_dir: Option<PathBuf>) -> Result<PathBuf> {
        data_dir
            .map(|dir| dir.join("nft-escrow").join("ledger.json"))
            .ok_or_else(|| {
                Error::MissingConfig("no data directory; set node.ledger_path or --ledger".into())
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_error(&self, message: impl ToString) -> Error {
        Error::Snapshot {
            file: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Load the snapshot. `None` when no snapshot has been written yet.
    pub async fn load(&self) -> Result<Option<LedgerState>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).await?;
        let state = serde_json::from_str(&content).map_err(|e| self.snapshot_error(e))?;
        tracing::debug!("Loaded ledger snapshot from {:?}", self.path);
        Ok(Some(state))
    }

    /// Write the snapshot, replacing any previous one
    pub async fn save(&self, state: &LedgerState) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| self.snapshot_error(e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Saved ledger snapshot at round {} to {:?}", state.round, self.path);
        Ok(())
    }
}
