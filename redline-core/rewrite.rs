//! Selection-scoped rewrites through an external completion collaborator.
//!
//! A rewrite replaces the currently selected span with text produced by a
//! completion model. The coordinator validates the request up front, builds
//! a prompt instructing the model to answer with the literal replacement
//! text only, and runs the call on a spawned task so the session stays
//! interactive while it is in flight. Finished outcomes are drained with
//! [`RewriteCoordinator::poll`]; applying them to the document is the
//! session's job, which re-validates against the document as it is *then*.
//!
//! Only one rewrite may be in flight at a time; a second submission is
//! rejected with [`RewriteError::RewriteInProgress`]. Failed submissions
//! never touch the document and are never retried automatically.

use std::{
  borrow::Cow,
  fmt,
  sync::Arc,
  time::Duration,
};

use async_trait::async_trait;
use ropey::Rope;
use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
  Tendril,
  selection::SelectionSpan,
  store::StoreError,
};

pub type Result<T> = std::result::Result<T, RewriteError>;

#[derive(Debug, Error)]
pub enum RewriteError {
  #[error("no credential is configured")]
  MissingCredential,
  #[error("the selected text no longer occurs in the document")]
  SelectionNotFound,
  #[error("a rewrite is already in flight")]
  RewriteInProgress,
  #[error("completion request failed: {0}")]
  Upstream(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Opaque token authorizing calls to the completion collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Tendril);

impl Credential {
  pub fn new(token: impl Into<Tendril>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for Credential {
  // The token must not leak into logs or panic messages.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Credential(<redacted>)")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
  System,
  User,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
  pub role:    PromptRole,
  pub content: String,
}

/// One completion call: prompt in, candidate replacement texts out.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
  pub model:      String,
  pub messages:   Vec<PromptMessage>,
  pub credential: Credential,
}

/// The external completion collaborator.
///
/// Implementations perform the actual model call. A successful result is a
/// non-empty ordered list of candidate completion texts; transport,
/// authorization, and malformed-response problems are errors. An empty
/// candidate list is treated as malformed by the coordinator.
#[async_trait]
pub trait Completer: Send + Sync + 'static {
  async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
  /// Model identifier forwarded to the completion collaborator.
  pub model:      String,
  /// Upper bound on a single completion call, in milliseconds.
  pub timeout_ms: u64,
}

impl Default for RewriteOptions {
  fn default() -> Self {
    Self {
      model:      "gpt-4o-mini".into(),
      timeout_ms: 30_000,
    }
  }
}

impl RewriteOptions {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// A finished completion call, drained via [`RewriteCoordinator::poll`].
#[derive(Debug)]
pub struct RewriteOutcome {
  /// The selection the request was submitted for.
  pub selection: SelectionSpan,
  /// Trimmed replacement text, or why there is none.
  pub result:    Result<Tendril>,
}

struct PendingRewrite {
  selection: SelectionSpan,
  rx:        oneshot::Receiver<Result<Tendril>>,
}

pub struct RewriteCoordinator<C> {
  completer: Arc<C>,
  options:   RewriteOptions,
  pending:   Option<PendingRewrite>,
}

impl<C: Completer> RewriteCoordinator<C> {
  pub fn new(completer: Arc<C>, options: RewriteOptions) -> Self {
    Self {
      completer,
      options,
      pending: None,
    }
  }

  pub fn is_pending(&self) -> bool {
    self.pending.is_some()
  }

  /// Validates and dispatches a rewrite of `selection` within `doc`.
  ///
  /// Must be called from within a tokio runtime; the completion call runs
  /// on a spawned task and its outcome is drained with [`poll`].
  ///
  /// Fails fast, without constructing a request or touching the
  /// collaborator, when a rewrite is already in flight, when no usable
  /// credential is configured, or when the selection's text is empty or
  /// absent from `doc`.
  ///
  /// [`poll`]: RewriteCoordinator::poll
  pub fn submit(
    &mut self,
    doc: &Rope,
    selection: &SelectionSpan,
    instruction: &str,
    credential: Option<&Credential>,
  ) -> Result<()> {
    if self.pending.is_some() {
      return Err(RewriteError::RewriteInProgress);
    }
    let credential = match credential {
      Some(credential) if !credential.is_empty() => credential.clone(),
      _ => return Err(RewriteError::MissingCredential),
    };
    if selection.is_empty() || find_first(doc, selection.text()).is_none() {
      return Err(RewriteError::SelectionNotFound);
    }

    let request = build_request(doc, selection, instruction, &self.options.model, credential);
    let timeout = self.options.timeout();
    let completer = Arc::clone(&self.completer);
    let (tx, rx) = oneshot::channel();

    log::debug!(
      "dispatching rewrite of {} selected chars to {}",
      selection.len(),
      self.options.model
    );
    tokio::spawn(async move {
      let result = run_completion(completer, request, timeout).await;
      let _ = tx.send(result);
    });

    self.pending = Some(PendingRewrite {
      selection: selection.clone(),
      rx,
    });
    Ok(())
  }

  /// Drains the outcome of the in-flight rewrite, if it has finished.
  pub fn poll(&mut self) -> Option<RewriteOutcome> {
    let finished = match self.pending.as_mut()?.rx.try_recv() {
      Ok(result) => result,
      Err(oneshot::error::TryRecvError::Empty) => return None,
      Err(oneshot::error::TryRecvError::Closed) => {
        Err(RewriteError::Upstream("completion task dropped its reply".into()))
      },
    };

    self.pending.take().map(|pending| RewriteOutcome {
      selection: pending.selection,
      result:    finished,
    })
  }

  /// Drops the in-flight rewrite, if any. A reply arriving later is
  /// discarded.
  pub fn cancel(&mut self) {
    self.pending = None;
  }
}

async fn run_completion<C: Completer>(
  completer: Arc<C>,
  request: CompletionRequest,
  timeout: Duration,
) -> Result<Tendril> {
  let choices = match tokio::time::timeout(timeout, completer.complete(request)).await {
    Ok(Ok(choices)) => choices,
    Ok(Err(err)) => {
      log::error!("completion collaborator failed: {err}");
      return Err(RewriteError::Upstream(err.to_string()));
    },
    Err(_) => {
      return Err(RewriteError::Upstream(format!(
        "no response within {}ms",
        timeout.as_millis()
      )));
    },
  };

  match choices.into_iter().next() {
    Some(first) => Ok(first.trim().into()),
    None => Err(RewriteError::Upstream("completion returned no choices".into())),
  }
}

const REPLACEMENT_DIRECTIVE: &str = "You rewrite one selected span inside a document. Reply with \
                                     only the literal replacement text for the selected span: no \
                                     quotes, no markup, no commentary.";

fn build_request(
  doc: &Rope,
  selection: &SelectionSpan,
  instruction: &str,
  model: &str,
  credential: Credential,
) -> CompletionRequest {
  let content = format!(
    "Document:\n{doc}\n\nSelected span:\n{span}\n\nInstruction:\n{instruction}",
    span = selection.text(),
  );

  CompletionRequest {
    model: model.into(),
    messages: vec![
      PromptMessage {
        role:    PromptRole::System,
        content: REPLACEMENT_DIRECTIVE.into(),
      },
      PromptMessage {
        role:    PromptRole::User,
        content,
      },
    ],
    credential,
  }
}

/// Char offset of the first occurrence of `needle` in `doc`.
pub fn find_first(doc: &Rope, needle: &str) -> Option<usize> {
  if needle.is_empty() {
    return None;
  }
  let text = Cow::<str>::from(doc.slice(..));
  let byte = text.find(needle)?;
  Some(text[..byte].chars().count())
}

/// Replaces the first occurrence of `needle` in `doc` with `replacement`.
///
/// Only the first occurrence is targeted: when the selected text repeats
/// elsewhere in the document, an earlier instance can be rewritten instead
/// of the highlighted one. Known limitation of matching on the span's text
/// rather than its offsets.
pub fn replace_first(doc: &Rope, needle: &str, replacement: &str) -> Option<Rope> {
  let start = find_first(doc, needle)?;
  let end = start + needle.chars().count();

  let mut out = doc.clone();
  out.remove(start..end);
  out.insert(start, replacement);
  Some(out)
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{
    AtomicUsize,
    Ordering,
  };

  use super::*;
  use crate::selection::Anchor;

  struct StaticCompleter {
    calls:   AtomicUsize,
    choices: std::result::Result<Vec<String>, String>,
  }

  impl StaticCompleter {
    fn replying(choices: &[&str]) -> Self {
      Self {
        calls:   AtomicUsize::new(0),
        choices: Ok(choices.iter().map(|s| s.to_string()).collect()),
      }
    }

    fn failing(message: &str) -> Self {
      Self {
        calls:   AtomicUsize::new(0),
        choices: Err(message.to_string()),
      }
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Completer for StaticCompleter {
    async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<Vec<String>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      match &self.choices {
        Ok(choices) => Ok(choices.clone()),
        Err(message) => Err(anyhow::anyhow!("{message}")),
      }
    }
  }

  struct StalledCompleter;

  #[async_trait]
  impl Completer for StalledCompleter {
    async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<Vec<String>> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(vec![])
    }
  }

  fn span(text: &str, start: usize) -> SelectionSpan {
    SelectionSpan::new(text, start, start + text.chars().count(), Anchor::default()).unwrap()
  }

  fn credential() -> Credential {
    Credential::new("token")
  }

  async fn drain<C: Completer>(coordinator: &mut RewriteCoordinator<C>) -> RewriteOutcome {
    loop {
      if let Some(outcome) = coordinator.poll() {
        return outcome;
      }
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test]
  async fn missing_credential_fails_without_a_call() {
    let completer = Arc::new(StaticCompleter::replying(&["dog"]));
    let mut coordinator = RewriteCoordinator::new(Arc::clone(&completer), RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    let err = coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", None)
      .unwrap_err();
    assert!(matches!(err, RewriteError::MissingCredential));

    let empty = Credential::new("");
    let err = coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", Some(&empty))
      .unwrap_err();
    assert!(matches!(err, RewriteError::MissingCredential));

    assert_eq!(completer.calls(), 0);
    assert!(!coordinator.is_pending());
  }

  #[tokio::test]
  async fn absent_selection_fails_without_a_call() {
    let completer = Arc::new(StaticCompleter::replying(&["dog"]));
    let mut coordinator = RewriteCoordinator::new(Arc::clone(&completer), RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    let err = coordinator
      .submit(&doc, &span("bird", 4), "whatever", Some(&credential()))
      .unwrap_err();
    assert!(matches!(err, RewriteError::SelectionNotFound));
    assert_eq!(completer.calls(), 0);
  }

  #[tokio::test]
  async fn successful_completion_is_trimmed() {
    let completer = Arc::new(StaticCompleter::replying(&["  dog \n", "ignored"]));
    let mut coordinator = RewriteCoordinator::new(completer, RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", Some(&credential()))
      .unwrap();
    assert!(coordinator.is_pending());

    let outcome = drain(&mut coordinator).await;
    assert_eq!(outcome.result.unwrap().as_str(), "dog");
    assert_eq!(outcome.selection.text(), "cat");
    assert!(!coordinator.is_pending());
  }

  #[tokio::test]
  async fn second_submission_while_pending_is_rejected() {
    let completer = Arc::new(StaticCompleter::replying(&["dog"]));
    let mut coordinator = RewriteCoordinator::new(completer, RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    let selection = span("cat", 4);
    coordinator
      .submit(&doc, &selection, "first", Some(&credential()))
      .unwrap();
    let err = coordinator
      .submit(&doc, &selection, "second", Some(&credential()))
      .unwrap_err();
    assert!(matches!(err, RewriteError::RewriteInProgress));

    // The first request still completes normally.
    let outcome = drain(&mut coordinator).await;
    assert!(outcome.result.is_ok());
  }

  #[tokio::test]
  async fn upstream_failure_is_surfaced() {
    let completer = Arc::new(StaticCompleter::failing("boom"));
    let mut coordinator = RewriteCoordinator::new(completer, RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", Some(&credential()))
      .unwrap();

    let outcome = drain(&mut coordinator).await;
    match outcome.result {
      Err(RewriteError::Upstream(message)) => assert!(message.contains("boom")),
      other => panic!("expected upstream error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn empty_choice_list_is_an_upstream_failure() {
    let completer = Arc::new(StaticCompleter::replying(&[]));
    let mut coordinator = RewriteCoordinator::new(completer, RewriteOptions::default());

    let doc = Rope::from("The cat sat.");
    coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", Some(&credential()))
      .unwrap();

    let outcome = drain(&mut coordinator).await;
    assert!(matches!(outcome.result, Err(RewriteError::Upstream(_))));
  }

  #[tokio::test]
  async fn stalled_collaborator_times_out() {
    let options = RewriteOptions {
      timeout_ms: 10,
      ..Default::default()
    };
    let mut coordinator = RewriteCoordinator::new(Arc::new(StalledCompleter), options);

    let doc = Rope::from("The cat sat.");
    coordinator
      .submit(&doc, &span("cat", 4), "make it a dog", Some(&credential()))
      .unwrap();

    let outcome = drain(&mut coordinator).await;
    match outcome.result {
      Err(RewriteError::Upstream(message)) => assert!(message.contains("no response")),
      other => panic!("expected timeout, got {other:?}"),
    }
  }

  #[test]
  fn replace_first_targets_the_first_occurrence() {
    let doc = Rope::from("the cat saw the cat");
    let out = replace_first(&doc, "the cat", "a dog").unwrap();
    assert_eq!(out.to_string(), "a dog saw the cat");
  }

  #[test]
  fn replace_first_with_absent_needle_is_none() {
    let doc = Rope::from("The cat sat.");
    assert!(replace_first(&doc, "bird", "dog").is_none());
  }

  #[test]
  fn replace_first_handles_multibyte_text() {
    let doc = Rope::from("γειά σου κόσμε");
    let out = replace_first(&doc, "κόσμε", "world").unwrap();
    assert_eq!(out.to_string(), "γειά σου world");
  }

  #[test]
  fn find_first_returns_char_offsets() {
    let doc = Rope::from("日本語 text");
    assert_eq!(find_first(&doc, "text"), Some(4));
    assert_eq!(find_first(&doc, ""), None);
  }
}
