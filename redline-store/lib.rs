//! File-backed key-value store.
//!
//! One file per key inside a dedicated directory. Writes go through a
//! temporary file in the same directory followed by a rename, so a key is
//! always observed either whole or absent, never half-written. History and
//! credential live under independent keys; no cross-key coordination
//! exists or is needed.

use std::{
  fs,
  io::Write,
  path::PathBuf,
};

use redline_core::store::{
  KvStore,
  Result,
  StoreError,
};
use tempfile::NamedTempFile;

/// Durable [`KvStore`] rooted at a directory. Keys are used verbatim as
/// file names; callers use plain identifiers.
#[derive(Debug, Clone)]
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  /// Opens a store rooted at `dir`, creating the directory if needed.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir })
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(key)
  }
}

impl KvStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(value) => Ok(Some(value)),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(StoreError::Io(err)),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(&self.dir)?;
    tmp.write_all(value.as_bytes())?;
    tmp
      .persist(self.path_for(key))
      .map_err(|err| StoreError::Io(err.error))?;
    log::debug!("wrote {} bytes under key {key}", value.len());
    Ok(())
  }
}
