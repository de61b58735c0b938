// skein/src/core/control.rs

//! Defines the hook kinds and the signal a hook returns to the chain driver.

use crate::callback::Suspend;
use std::fmt;
use std::sync::Arc;

/// Which hook a task handler wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
  Execute,
  OnSuccess,
  OnFail,
  OnComplete,
  /// Synthetic last handler of every workflow.
  Final,
}

impl HookKind {
  pub fn as_str(self) -> &'static str {
    match self {
      HookKind::Execute => "execute",
      HookKind::OnSuccess => "on_success",
      HookKind::OnFail => "on_fail",
      HookKind::OnComplete => "on_complete",
      HookKind::Final => "final",
    }
  }

  /// Errors raised by `execute`-type work replace a succeeding code with `INTERNAL_ERROR`.
  pub(crate) fn forces_error_code(self) -> bool {
    matches!(self, HookKind::Execute)
  }
}

impl fmt::Display for HookKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A pending asynchronous completion handed back to the chain: a `Callback` or a `Combinator`.
pub struct Pending<I, D>(pub(crate) Arc<dyn Suspend<I, D>>);

impl<I, D> Pending<I, D> {
  /// True if the pending work already completed on the thread that issued it.
  pub fn is_synchronous(&self) -> bool {
    self.0.is_synchronous()
  }
}

impl<I, D> Clone for Pending<I, D> {
  fn clone(&self) -> Self {
    Pending(Arc::clone(&self.0))
  }
}

impl<I, D> fmt::Debug for Pending<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pending")
      .field("synchronous", &self.0.is_synchronous())
      .finish()
  }
}

/// Signal from a hook telling the chain how to proceed.
pub enum Flow<I, D> {
  /// The hook finished synchronously; the chain continues in place.
  Next,
  /// The hook started asynchronous work; the chain suspends until it completes.
  Await(Pending<I, D>),
}

impl<I, D> Flow<I, D> {
  pub fn wait(pending: impl Into<Pending<I, D>>) -> Self {
    Flow::Await(pending.into())
  }

  pub fn is_next(&self) -> bool {
    matches!(self, Flow::Next)
  }
}

impl<I, D> fmt::Debug for Flow<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Flow::Next => f.write_str("Next"),
      Flow::Await(p) => f.debug_tuple("Await").field(p).finish(),
    }
  }
}

/// What every stage hook returns. Business failures are recorded on the `ResultState`;
/// an `Err` is treated like a thrown exception and folded at the task-handler boundary.
pub type HookResult<I, D> = anyhow::Result<Flow<I, D>>;
