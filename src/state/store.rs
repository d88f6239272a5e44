// State store - atomic persistence of global and per-conversation tool state

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::StateError;
use super::STATE_FILE_NAME;

/// The two persistence buckets.
///
/// `global` maps provider name to that provider's shared state value;
/// `conversations` maps conversation id to a per-provider state map.
/// Container handles and shell processes are never stored here; they are
/// runtime-only and re-established from scratch after a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateBuckets {
    #[serde(default)]
    pub global: BTreeMap<String, Value>,
    #[serde(default)]
    pub conversations: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Durable store for tool state.
///
/// Writes go to a sibling temp file, are fsynced, and renamed over the
/// canonical path, so a crash leaves either the old file intact or the new
/// file fully written.
pub struct StateStore {
    path: PathBuf,
    // Held across serialize+write; save may be called from any task.
    lock: Mutex<()>,
}

impl StateStore {
    /// Create a store rooted at the runtime directory.
    pub fn new(runtime_root: &Path) -> Self {
        Self::at_path(runtime_root.join(STATE_FILE_NAME))
    }

    /// Create a store with an explicit file path.
    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted buckets.
    ///
    /// A missing or corrupt file is reported and treated as empty; the
    /// operator's remedy for corruption is `reset`.
    pub fn load(&self) -> StateBuckets {
        let _guard = self.lock.lock().unwrap();

        if !self.path.exists() {
            info!(path = %self.path.display(), "state file not found, starting with empty state");
            return StateBuckets::default();
        }

        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state file, starting empty");
                return StateBuckets::default();
            }
        };

        match rmp_serde::from_slice::<StateBuckets>(&bytes) {
            Ok(buckets) => {
                debug!(
                    providers = buckets.global.len(),
                    conversations = buckets.conversations.len(),
                    "state loaded"
                );
                buckets
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file corrupt, starting empty");
                StateBuckets::default()
            }
        }
    }

    /// Persist the buckets atomically.
    ///
    /// Failure is non-fatal to the caller: the in-memory buckets remain
    /// authoritative and the next mutation retries the save.
    pub fn save(&self, buckets: &StateBuckets) -> Result<(), StateError> {
        let _guard = self.lock.lock().unwrap();

        let bytes = rmp_serde::to_vec_named(buckets)
            .map_err(|e| StateError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("bin.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(bytes = bytes.len(), path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Delete the state file and return empty buckets.
    pub fn reset(&self) -> StateBuckets {
        let _guard = self.lock.lock().unwrap();

        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove state file");
            } else {
                info!(path = %self.path.display(), "state file removed");
            }
        }

        StateBuckets::default()
    }
}
