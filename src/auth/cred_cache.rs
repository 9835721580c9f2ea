//! File-backed credential cache
//!
//! Verified API credentials are persisted to a local JSON file keyed by
//! (signer address, signature type, funder address, L1 address choice)
//! so later runs can skip the fallback ladder entirely. Only credentials
//! that passed the live verification probe are ever written. The file is
//! owned by a single process; there is no cross-process locking.

use super::identity::SignatureType;
use super::ApiKeyCreds;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cache key parameters for one credential set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub signer_address: String,
    pub signature_type: SignatureType,
    pub funder_address: Option<String>,
    pub use_effective_for_l1: bool,
}

impl CacheKey {
    fn as_string(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.signer_address.to_lowercase(),
            self.signature_type.as_u8(),
            self.funder_address
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_else(|| "-".to_string()),
            if self.use_effective_for_l1 { "eff" } else { "sig" },
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    creds: ApiKeyCreds,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CachedEntry>,
}

/// Credential cache backed by a single JSON file
#[derive(Debug, Clone)]
pub struct CredCache {
    path: PathBuf,
}

impl CredCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the cached credentials for a key, or None.
    /// A missing or corrupt file reads as empty rather than failing.
    pub fn load(&self, key: &CacheKey) -> Option<ApiKeyCreds> {
        let file = self.read_file();
        let found = file.entries.get(&key.as_string()).map(|e| e.creds.clone());
        if found.is_some() {
            debug!("[CredCache] Cache hit for {}", key.signer_address);
        }
        found
    }

    /// Persist verified credentials for a key
    pub fn save(&self, key: &CacheKey, creds: &ApiKeyCreds) -> Result<()> {
        let mut file = self.read_file();
        file.entries.insert(
            key.as_string(),
            CachedEntry {
                creds: creds.clone(),
                saved_at: Utc::now(),
            },
        );
        self.write_file(&file)
    }

    /// Remove a single entry (cached credentials failed verification)
    pub fn clear_entry(&self, key: &CacheKey) -> Result<()> {
        let mut file = self.read_file();
        if file.entries.remove(&key.as_string()).is_some() {
            debug!("[CredCache] Cleared entry for {}", key.signer_address);
            self.write_file(&file)?;
        }
        Ok(())
    }

    /// Remove the whole cache file
    pub fn clear_all(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }

    fn read_file(&self) -> CacheFile {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(file) => file,
                Err(e) => {
                    warn!(
                        "[CredCache] Corrupt cache file {} ({}), treating as empty",
                        self.path.display(),
                        e
                    );
                    CacheFile::default()
                }
            },
            Err(_) => CacheFile::default(),
        }
    }

    fn write_file(&self, file: &CacheFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
