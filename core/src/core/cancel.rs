// skein/src/core/cancel.rs

//! Cooperative cancellation for a run. The chain checks the token at every step boundary
//! and arms it with whatever the run is currently suspended on, so cancelling also fails a
//! stuck asynchronous leg instead of waiting for it forever.
//!
//! The armed work is held weakly: a callback the external system dropped without completing
//! releases its run instead of being kept alive by the token.

use crate::error::SkeinError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{event, Level};

/// Why pending work is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
  Cancelled,
  DeadlineExceeded,
}

impl Interrupt {
  pub(crate) fn into_error(self) -> SkeinError {
    match self {
      Interrupt::Cancelled => SkeinError::Cancelled,
      Interrupt::DeadlineExceeded => SkeinError::DeadlineExceeded,
    }
  }
}

/// Something a run can be suspended on.
pub(crate) trait Abort: Send + Sync {
  fn abort(self: Arc<Self>, cause: Interrupt);
}

pub(crate) type ArmedSlot = Mutex<Option<Weak<dyn Abort>>>;

/// Takes the armed work out of `slot`, if it is still alive.
pub(crate) fn disarm(slot: &ArmedSlot) -> Option<Arc<dyn Abort>> {
  slot.lock().take().and_then(|pending| pending.upgrade())
}

#[derive(Clone, Default)]
pub struct CancelToken {
  token: CancellationToken,
  armed: Arc<ArmedSlot>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Cancels the run. A pending callback is failed with `SkeinError::Cancelled`.
  pub fn cancel(&self) {
    let armed = {
      let mut armed = self.armed.lock();
      if self.token.is_cancelled() {
        return;
      }
      self.token.cancel();
      armed.take().and_then(|pending| pending.upgrade())
    };
    event!(Level::INFO, pending = armed.is_some(), "Cancel token fired.");
    if let Some(pending) = armed {
      pending.abort(Interrupt::Cancelled);
    }
  }

  /// Resolves once the token is cancelled.
  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.token.cancelled()
  }

  /// Remembers what the run is about to suspend on. Aborts it at once if the token
  /// already fired.
  pub(crate) fn arm(&self, pending: &Arc<dyn Abort>) {
    {
      let mut armed = self.armed.lock();
      if !self.token.is_cancelled() {
        *armed = Some(Arc::downgrade(pending));
        return;
      }
    }
    Arc::clone(pending).abort(Interrupt::Cancelled);
  }
}

/// Wraps an existing token, so a run can be cancelled together with other tokio work.
/// Cancelling through the tokio token directly is still observed at the next step boundary.
impl From<CancellationToken> for CancelToken {
  fn from(token: CancellationToken) -> Self {
    Self {
      token,
      armed: Arc::default(),
    }
  }
}

impl fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancelToken")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct Counting {
    cancelled: AtomicUsize,
    expired: AtomicUsize,
  }

  impl Abort for Counting {
    fn abort(self: Arc<Self>, cause: Interrupt) {
      match cause {
        Interrupt::Cancelled => self.cancelled.fetch_add(1, Ordering::SeqCst),
        Interrupt::DeadlineExceeded => self.expired.fetch_add(1, Ordering::SeqCst),
      };
    }
  }

  #[test]
  fn cancel_aborts_armed_pending_once() {
    let token = CancelToken::new();
    let pending = Arc::new(Counting::default());
    let armed: Arc<dyn Abort> = pending.clone();
    token.arm(&armed);
    token.cancel();
    token.cancel();
    assert!(token.is_cancelled());
    assert_eq!(pending.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(pending.expired.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn arming_after_cancel_aborts_immediately() {
    let token = CancelToken::new();
    token.cancel();
    let pending = Arc::new(Counting::default());
    let armed: Arc<dyn Abort> = pending.clone();
    token.arm(&armed);
    assert_eq!(pending.cancelled.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn token_does_not_keep_armed_work_alive() {
    let token = CancelToken::new();
    let armed: Arc<dyn Abort> = Arc::new(Counting::default());
    let watch = Arc::downgrade(&armed);
    token.arm(&armed);
    drop(armed);
    assert!(watch.upgrade().is_none());
    token.cancel();
    assert!(token.is_cancelled());
  }

  #[test]
  fn wraps_a_tokio_cancellation_token() {
    let shared = CancellationToken::new();
    let token = CancelToken::from(shared.clone());
    shared.cancel();
    assert!(token.is_cancelled());
  }
}
