//! The single active text selection and its lifecycle.
//!
//! A [`SelectionSpan`] is an immutable value captured at the moment the user
//! highlights text: the exact substring, its character offsets, and the
//! on-screen anchor the rewrite affordance is placed next to. Capturing a
//! value decouples the engine from whatever transient selection handle the
//! presentation surface works with.
//!
//! Only one selection is tracked at a time. Capturing a new non-empty span
//! replaces the prior one; capturing an empty span is the "selection
//! collapsed" transition and clears instead.

use thiserror::Error;

use crate::Tendril;

pub type Result<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
  #[error("selection range is inverted: start {start} is after end {end}")]
  InvertedRange { start: usize, end: usize },
  #[error("selection text is {text_len} chars but the range {start}..{end} was given")]
  LengthMismatch {
    text_len: usize,
    start:    usize,
    end:      usize,
  },
}

/// On-screen point the rewrite affordance anchors to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
  pub row: usize,
  pub col: usize,
}

impl Anchor {
  pub fn new(row: usize, col: usize) -> Self {
    Self { row, col }
  }
}

/// A contiguous highlighted substring of the live document.
///
/// Offsets are character offsets into the document at capture time. The
/// span is ephemeral: the session drops it when the document is edited,
/// when it is explicitly cleared, and after a rewrite is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSpan {
  text:   Tendril,
  start:  usize,
  end:    usize,
  anchor: Anchor,
}

impl SelectionSpan {
  pub fn new(text: impl Into<Tendril>, start: usize, end: usize, anchor: Anchor) -> Result<Self> {
    let text = text.into();
    if start > end {
      return Err(SelectionError::InvertedRange { start, end });
    }
    let text_len = text.chars().count();
    if text_len != end - start {
      return Err(SelectionError::LengthMismatch { text_len, start, end });
    }
    Ok(Self {
      text,
      start,
      end,
      anchor,
    })
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn start(&self) -> usize {
    self.start
  }

  pub fn end(&self) -> usize {
    self.end
  }

  pub fn anchor(&self) -> Anchor {
    self.anchor
  }

  /// Length of the span in characters.
  pub fn len(&self) -> usize {
    self.end - self.start
  }

  pub fn is_empty(&self) -> bool {
    self.start == self.end
  }
}

/// Tracks the single currently active [`SelectionSpan`], or none.
#[derive(Debug, Default)]
pub struct SelectionTracker {
  active: Option<SelectionSpan>,
}

impl SelectionTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Activates `span`, replacing any prior selection. An empty span clears
  /// the tracker instead.
  pub fn capture(&mut self, span: SelectionSpan) {
    if span.is_empty() {
      self.active = None;
    } else {
      self.active = Some(span);
    }
  }

  pub fn current(&self) -> Option<&SelectionSpan> {
    self.active.as_ref()
  }

  pub fn clear(&mut self) {
    self.active = None;
  }

  pub fn is_active(&self) -> bool {
    self.active.is_some()
  }
}
