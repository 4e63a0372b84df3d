//! Append-only history of accepted document snapshots.
//!
//! The last snapshot is always the diff baseline. History is persisted as a
//! JSON array of strings under [`VERSIONS_KEY`] and reloaded at session
//! start; damaged data degrades to an empty history instead of failing the
//! session.

use std::sync::Arc;

use ropey::Rope;

use crate::store::{
  KvStore,
  Result,
};

/// Store key holding the serialized history.
pub const VERSIONS_KEY: &str = "versions";

/// One accepted state of the document. Immutable once created; its 1-based
/// position in the store is its identity.
#[derive(Debug, Clone)]
pub struct Snapshot {
  text: Rope,
}

impl Snapshot {
  fn new(text: Rope) -> Self {
    Self { text }
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }
}

#[derive(Debug)]
pub struct VersionStore<S> {
  store:     Arc<S>,
  snapshots: Vec<Snapshot>,
}

impl<S: KvStore> VersionStore<S> {
  /// Reads the persisted history. Missing or unparsable data yields an
  /// empty history.
  pub fn load(store: Arc<S>) -> Self {
    let snapshots = match store.get(VERSIONS_KEY) {
      Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(texts) => texts
          .into_iter()
          .map(|text| Snapshot::new(Rope::from(text.as_str())))
          .collect(),
        Err(err) => {
          log::warn!("discarding unparsable version history: {err}");
          Vec::new()
        },
      },
      Ok(None) => Vec::new(),
      Err(err) => {
        log::warn!("failed to read version history: {err}");
        Vec::new()
      },
    };

    Self { store, snapshots }
  }

  /// The most recently accepted snapshot, if any.
  pub fn latest(&self) -> Option<&Snapshot> {
    self.snapshots.last()
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Snapshot> {
    self.snapshots.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
    self.snapshots.iter()
  }

  /// Appends `text` as the newest snapshot.
  ///
  /// The updated sequence is persisted before the in-memory history is
  /// touched: a write failure leaves the history unchanged. Consecutive
  /// duplicates are kept, not deduplicated.
  pub fn append(&mut self, text: Rope) -> Result<()> {
    let mut texts: Vec<String> = self
      .snapshots
      .iter()
      .map(|snapshot| snapshot.text.to_string())
      .collect();
    texts.push(text.to_string());

    let raw = serde_json::to_string(&texts)?;
    self.store.set(VERSIONS_KEY, &raw)?;
    self.snapshots.push(Snapshot::new(text));
    Ok(())
  }
}
