//! Block receipts cache keyed by block hash
//!
//! Entries are an optimization only: a missing or unreadable entry is a
//! cache miss, and callers re-verify cached receipts against the header.

use alloy_primitives::B256;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::receipts::Receipt;

#[async_trait]
pub trait ReceiptCache: Send + Sync {
    async fn get(&self, block_hash: B256) -> Option<Vec<Receipt>>;
    async fn put(&self, block_hash: B256, receipts: &[Receipt]) -> Result<()>;
    async fn evict(&self, block_hash: B256);
}

/// One JSON file per block in a directory
pub struct FileReceiptCache {
    dir: PathBuf,
}

impl FileReceiptCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, block_hash: B256) -> PathBuf {
        self.dir.join(format!("block_receipts_{:?}.json", block_hash))
    }
}

#[async_trait]
impl ReceiptCache for FileReceiptCache {
    async fn get(&self, block_hash: B256) -> Option<Vec<Receipt>> {
        let path = self.path_for(block_hash);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(_) => return None,
        };
        match serde_json::from_slice(&contents) {
            Ok(receipts) => {
                debug!(block_hash = %block_hash, "Receipts cache hit");
                Some(receipts)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable receipts cache entry");
                None
            }
        }
    }

    async fn put(&self, block_hash: B256, receipts: &[Receipt]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .wrap_err_with(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let path = self.path_for(block_hash);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec(receipts)?;
        tokio::fs::write(&tmp, contents)
            .await
            .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .wrap_err_with(|| format!("Failed to move cache entry to {}", path.display()))?;
        Ok(())
    }

    async fn evict(&self, block_hash: B256) {
        let path = self.path_for(block_hash);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to evict receipts cache entry");
            }
        }
    }
}
