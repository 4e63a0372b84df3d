//! Character-level diff between the accepted baseline and the live draft.
//!
//! [`diff`] produces an ordered edit script of [`DiffPart`]s. Concatenating
//! the `Unchanged` and `Removed` parts reproduces the baseline text;
//! concatenating `Unchanged` and `Added` reproduces the current text. The
//! script is a plain value for the presentation layer to style per kind; it
//! never carries markup.

use imara_diff::{
  Algorithm,
  Diff,
  InternedInput,
};
use ropey::Rope;

use crate::Tendril;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
  Unchanged,
  Added,
  Removed,
}

/// One span of the edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPart {
  pub text: Tendril,
  pub kind: DiffKind,
}

impl DiffPart {
  fn new(kind: DiffKind, text: Tendril) -> Self {
    Self { text, kind }
  }
}

pub type DiffScript = Vec<DiffPart>;

/// Compares `before` and `after` character by character.
///
/// Total over all input pairs: empty inputs are fine and identical inputs
/// yield a single `Unchanged` part. Within a changed region the `Removed`
/// part precedes the `Added` part.
pub fn diff(before: &Rope, after: &Rope) -> DiffScript {
  let mut input = InternedInput::default();
  input.update_before(before.chars());
  input.update_after(after.chars());

  // The histogram heuristic does not work as well for characters because
  // the same characters often reoccur; use Myers instead.
  let mut token_diff = Diff::default();
  token_diff.compute_with(
    Algorithm::Myers,
    &input.before,
    &input.after,
    input.interner.num_tokens(),
  );

  let before_text = |start: u32, end: u32| -> Tendril {
    input.before[start as usize..end as usize]
      .iter()
      .map(|&token| input.interner[token])
      .collect()
  };
  let after_text = |start: u32, end: u32| -> Tendril {
    input.after[start as usize..end as usize]
      .iter()
      .map(|&token| input.interner[token])
      .collect()
  };

  let mut parts = DiffScript::new();
  let mut pos = 0;
  for hunk in token_diff.hunks() {
    if hunk.before.start > pos {
      parts.push(DiffPart::new(
        DiffKind::Unchanged,
        before_text(pos, hunk.before.start),
      ));
    }
    if !hunk.before.is_empty() {
      parts.push(DiffPart::new(
        DiffKind::Removed,
        before_text(hunk.before.start, hunk.before.end),
      ));
    }
    if !hunk.after.is_empty() {
      parts.push(DiffPart::new(
        DiffKind::Added,
        after_text(hunk.after.start, hunk.after.end),
      ));
    }
    pos = hunk.before.end;
  }
  if (pos as usize) < input.before.len() {
    parts.push(DiffPart::new(
      DiffKind::Unchanged,
      before_text(pos, input.before.len() as u32),
    ));
  }

  parts
}

/// [`diff`] over plain string slices.
pub fn diff_str(before: &str, after: &str) -> DiffScript {
  diff(&Rope::from(before), &Rope::from(after))
}
