//! Top-level editing session.
//!
//! [`EditorSession`] composes the live document, the accepted-snapshot
//! history, the diff between the two, the active selection, and the pending
//! rewrite behind one state holder. It owns no UI: the presentation surface
//! drives it and renders what it exposes.
//!
//! # Control flow
//!
//! The surface calls [`edit`] on every keystroke, [`accept`] on the explicit
//! accept action, [`select_span`] on selection events, and
//! [`request_rewrite`] when the user submits an instruction. The completion
//! call is the only suspending operation: it runs on a spawned task while
//! the session stays fully editable, and the surface drains the outcome
//! from its event loop via [`poll_rewrite`]. Every failure is returned as a
//! value; none of them corrupts the document or the history, and the
//! session stays usable afterwards.
//!
//! [`edit`]: EditorSession::edit
//! [`accept`]: EditorSession::accept
//! [`select_span`]: EditorSession::select_span
//! [`request_rewrite`]: EditorSession::request_rewrite
//! [`poll_rewrite`]: EditorSession::poll_rewrite

use std::sync::Arc;

use ropey::Rope;

use crate::{
  diff::{
    self,
    DiffScript,
  },
  rewrite::{
    self,
    Completer,
    Credential,
    RewriteCoordinator,
    RewriteError,
    RewriteOptions,
    RewriteOutcome,
  },
  selection::{
    SelectionSpan,
    SelectionTracker,
  },
  store::{
    KvStore,
    StoreError,
  },
  versions::VersionStore,
};

/// Store key holding the credential token.
pub const CREDENTIAL_KEY: &str = "credential";

pub struct EditorSession<S, C> {
  store:      Arc<S>,
  doc:        Rope,
  versions:   VersionStore<S>,
  selection:  SelectionTracker,
  rewrite:    RewriteCoordinator<C>,
  credential: Option<Credential>,
  diff:       DiffScript,
}

impl<S: KvStore, C: Completer> EditorSession<S, C> {
  /// Opens a session over the given collaborators.
  ///
  /// The live document resumes from the latest accepted snapshot. A missing
  /// or damaged store starts a blank session; opening never fails.
  pub fn open(store: Arc<S>, completer: Arc<C>, options: RewriteOptions) -> Self {
    let versions = VersionStore::load(Arc::clone(&store));
    let doc = versions
      .latest()
      .map(|snapshot| snapshot.text().clone())
      .unwrap_or_default();
    let credential = match store.get(CREDENTIAL_KEY) {
      Ok(Some(token)) if !token.is_empty() => Some(Credential::new(token)),
      Ok(_) => None,
      Err(err) => {
        log::warn!("failed to read credential: {err}");
        None
      },
    };

    let mut session = Self {
      store,
      doc,
      versions,
      selection: SelectionTracker::new(),
      rewrite: RewriteCoordinator::new(completer, options),
      credential,
      diff: DiffScript::new(),
    };
    session.refresh_diff();
    session
  }

  pub fn text(&self) -> &Rope {
    &self.doc
  }

  /// The active diff against the latest accepted snapshot. Empty while no
  /// snapshot exists.
  pub fn diff(&self) -> &DiffScript {
    &self.diff
  }

  pub fn versions(&self) -> &VersionStore<S> {
    &self.versions
  }

  pub fn selection(&self) -> Option<&SelectionSpan> {
    self.selection.current()
  }

  pub fn credential(&self) -> Option<&Credential> {
    self.credential.as_ref()
  }

  pub fn rewrite_pending(&self) -> bool {
    self.rewrite.is_pending()
  }

  /// Replaces the live document with `text`.
  ///
  /// The active selection is dropped (its offsets no longer describe this
  /// text) and the diff against the baseline is recomputed.
  pub fn edit(&mut self, text: impl Into<Rope>) {
    self.doc = text.into();
    self.selection.clear();
    self.refresh_diff();
  }

  /// Accepts the live document as the new baseline snapshot.
  pub fn accept(&mut self) -> Result<(), StoreError> {
    self.versions.append(self.doc.clone())?;
    self.refresh_diff();
    Ok(())
  }

  pub fn select_span(&mut self, span: SelectionSpan) {
    self.selection.capture(span);
  }

  pub fn clear_selection(&mut self) {
    self.selection.clear();
  }

  /// Persists `token` and adopts it for the rest of the session. An empty
  /// token clears the credential.
  pub fn set_credential(&mut self, token: &str) -> Result<(), StoreError> {
    self.store.set(CREDENTIAL_KEY, token)?;
    self.credential = (!token.is_empty()).then(|| Credential::new(token));
    Ok(())
  }

  /// Submits a rewrite of the active selection.
  ///
  /// Fails with [`RewriteError::SelectionNotFound`] when nothing is
  /// selected. The selection is preserved on every failure path so the
  /// user can retry.
  pub fn request_rewrite(&mut self, instruction: &str) -> rewrite::Result<()> {
    let Some(selection) = self.selection.current() else {
      return Err(RewriteError::SelectionNotFound);
    };
    self
      .rewrite
      .submit(&self.doc, selection, instruction, self.credential.as_ref())
  }

  /// Drains a finished rewrite and applies it.
  ///
  /// Returns `None` while nothing has finished. The replacement is
  /// validated against the document as it is *now*: a stale reply whose
  /// selection text is gone fails with
  /// [`RewriteError::SelectionNotFound`] and changes nothing. A successful
  /// replacement is persisted as a snapshot first and only then swapped
  /// into the live document, so a store failure also changes nothing.
  /// Application is an implicit accept: it appends a snapshot, clears the
  /// selection, and recomputes the diff.
  pub fn poll_rewrite(&mut self) -> Option<rewrite::Result<()>> {
    let outcome = self.rewrite.poll()?;
    Some(self.apply_outcome(outcome))
  }

  fn apply_outcome(&mut self, outcome: RewriteOutcome) -> rewrite::Result<()> {
    let replacement = outcome.result?;
    let Some(new_doc) = rewrite::replace_first(&self.doc, outcome.selection.text(), &replacement)
    else {
      log::debug!("rewrite reply arrived for text that is no longer present");
      return Err(RewriteError::SelectionNotFound);
    };

    self.versions.append(new_doc.clone())?;
    self.doc = new_doc;
    self.selection.clear();
    self.refresh_diff();
    Ok(())
  }

  fn refresh_diff(&mut self) {
    self.diff = match self.versions.latest() {
      Some(snapshot) => diff::diff(snapshot.text(), &self.doc),
      None => DiffScript::new(),
    };
  }
}
