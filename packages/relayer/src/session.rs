//! Persisted relay cursor

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SESSION_FILE: &str = ".event_relayer_session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySession {
    /// Highest source block whose events were fully processed
    pub last_processed_source_height: u64,
    pub network: String,
}

impl RelaySession {
    /// Session that will process `start_block` next
    ///
    /// The cursor has no "nothing processed" value, so starting from block 0
    /// marks genesis as processed and relaying begins at block 1. Genesis
    /// carries no transactions and so no bridge events.
    pub fn starting_at(start_block: u64, network: &str) -> Self {
        Self {
            last_processed_source_height: start_block.saturating_sub(1),
            network: network.to_string(),
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<RelaySession>>;
    async fn save(&self, session: &RelaySession) -> Result<()>;
}

/// JSON file written atomically through a temporary sibling
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<RelaySession>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .wrap_err_with(|| format!("Failed to read session {}", self.path.display()))
            }
        };
        let session = serde_json::from_slice(&contents)
            .wrap_err_with(|| format!("Session file {} is not valid", self.path.display()))?;
        Ok(Some(session))
    }

    async fn save(&self, session: &RelaySession) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(session)?)
            .await
            .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .wrap_err_with(|| format!("Failed to replace session {}", self.path.display()))?;
        Ok(())
    }
}
