// skein/src/callback/mod.rs

//! Pending asynchronous completions.
//!
//! A hook that starts asynchronous work returns `Flow::wait(callback)`. The chain attaches
//! the run to the callback and returns; whichever thread later calls `succeed`, `fail` or
//! `complete` runs the callback's sub-paths and resumes the run. A `Combinator` fans several
//! callbacks in to one completion signal.

pub mod combinator;
pub mod handle;

pub use combinator::Combinator;
pub use handle::{Callback, CallbackBuilder};

use crate::chain::execution::Attachment;
use crate::core::cancel::{Abort, Interrupt};
use crate::error::SkeinResult;
use std::sync::Arc;

/// What the chain driver does after attaching a run to pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
  /// The work already completed and its sub-paths ran on this thread; keep looping.
  Continue,
  /// Another thread owns the run now.
  Suspended,
}

/// The chain's side of a `Callback` or `Combinator`.
pub(crate) trait Suspend<I, D>: Send + Sync {
  fn attach(self: Arc<Self>, attachment: Attachment<I, D>) -> SkeinResult<Attach>;

  fn is_synchronous(&self) -> bool;

  fn into_abort(self: Arc<Self>) -> Arc<dyn Abort>;
}

/// A combinator's view of one child callback, with the result type erased.
pub(crate) trait CombinedChild<I, D>: Send + Sync {
  /// Returns `true` if the child had already been triggered and completed inline.
  fn attach_child(&self, attachment: Attachment<I, D>) -> SkeinResult<bool>;

  fn abort_child(self: Arc<Self>, cause: Interrupt);

  fn is_done(&self) -> bool;
}
