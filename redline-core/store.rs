//! Key-value persistence collaborator.
//!
//! History and credential survive restarts through an injected [`KvStore`]
//! rather than ambient globals. Implementations provide atomic single-key
//! writes; no cross-key transaction exists because the keys in use are
//! independent of one another.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store io: {0}")]
  Io(#[from] std::io::Error),
  #[error("store encoding: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Minimal persistence surface the session needs: string values under
/// string keys, written whole or not at all.
pub trait KvStore {
  fn get(&self, key: &str) -> Result<Option<String>>;
  fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store for tests and embedders that do not want a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.entries.lock().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.entries.lock().insert(key.into(), value.into());
    Ok(())
  }
}
