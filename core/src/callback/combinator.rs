// skein/src/callback/combinator.rs

//! Fan-in over a fixed set of child callbacks.
//!
//! In wait-all mode (the default) the run resumes once every child completed; in fast-return
//! mode it resumes as soon as the first child completes and later completions only run
//! their own sub-paths. Either way one claim flag makes the resumption happen exactly once.
//!
//! Until it is attached the combinator owns its children. Attaching hands every child an
//! attachment that keeps the combinator alive, and from then on the combinator only watches
//! its children weakly: children nobody can complete any more release the run with them.

use super::handle::Callback;
use super::{Attach, CombinedChild, Suspend};
use crate::chain::execution::Attachment;
use crate::core::cancel::{Abort, Interrupt};
use crate::core::control::Pending;
use crate::error::{SkeinError, SkeinResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{event, Level};

pub(crate) struct CombinatorInner<I, D> {
  fast_return: bool,
  sealed: AtomicBool,
  children: Mutex<Vec<Arc<dyn CombinedChild<I, D>>>>,
  watched: Mutex<Vec<Weak<dyn CombinedChild<I, D>>>>,
  expected: AtomicUsize,
  done: AtomicUsize,
  sync_done: AtomicUsize,
  claimed: AtomicBool,
  attachment: Mutex<Option<Attachment<I, D>>>,
}

pub struct Combinator<I, D> {
  inner: Arc<CombinatorInner<I, D>>,
}

impl<I, D> Combinator<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  /// Wait-all combinator.
  pub fn new() -> Self {
    Self::with_mode(false)
  }

  /// First-completion-wins combinator.
  pub fn fast_return() -> Self {
    Self::with_mode(true)
  }

  fn with_mode(fast_return: bool) -> Self {
    Self {
      inner: Arc::new(CombinatorInner {
        fast_return,
        sealed: AtomicBool::new(false),
        children: Mutex::new(Vec::new()),
        watched: Mutex::new(Vec::new()),
        expected: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
        sync_done: AtomicUsize::new(0),
        claimed: AtomicBool::new(false),
        attachment: Mutex::new(None),
      }),
    }
  }

  /// Adds `child`. Children must be added before the combinator is returned from a hook, and
  /// a callback belongs to at most one combinator.
  pub fn combine<R: Send + 'static>(&self, child: &Callback<I, D, R>) -> SkeinResult<&Self> {
    let mut children = self.inner.children.lock();
    if self.inner.sealed.load(Ordering::Acquire) {
      return Err(SkeinError::CombinatorSealed);
    }
    child.inner.join(&self.inner)?;
    children.push(child.inner.clone() as Arc<dyn CombinedChild<I, D>>);
    Ok(self)
  }

  pub fn is_fast_return(&self) -> bool {
    self.inner.fast_return
  }

  /// Number of children. Stable once the combinator is attached.
  pub fn len(&self) -> usize {
    if self.inner.sealed.load(Ordering::Acquire) {
      self.inner.expected.load(Ordering::Acquire)
    } else {
      self.inner.children.lock().len()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// True once attached with every child completed on the thread that built it.
  pub fn is_synchronous(&self) -> bool {
    self.inner.all_inline()
  }

  /// True once the run has been released to continue.
  pub fn is_done(&self) -> bool {
    self.inner.claimed.load(Ordering::Acquire)
  }

  pub fn completed_children(&self) -> usize {
    self.inner.done.load(Ordering::Acquire)
  }
}

impl<I, D> Default for Combinator<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<I, D> Clone for Combinator<I, D> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<I, D> fmt::Debug for Combinator<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Combinator")
      .field("fast_return", &self.inner.fast_return)
      .field("sealed", &self.inner.sealed.load(Ordering::Relaxed))
      .field("done", &self.inner.done.load(Ordering::Relaxed))
      .field("claimed", &self.inner.claimed.load(Ordering::Relaxed))
      .finish()
  }
}

impl<I, D> From<Combinator<I, D>> for Pending<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn from(combinator: Combinator<I, D>) -> Self {
    Pending(combinator.inner)
  }
}

impl<I, D> CombinatorInner<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn all_inline(&self) -> bool {
    self.sealed.load(Ordering::Acquire)
      && self.sync_done.load(Ordering::Acquire) == self.expected.load(Ordering::Acquire)
  }

  /// Counts one finished child. Returns `true` for the single caller that gets to release
  /// the run.
  fn count_done(&self, inline: bool) -> bool {
    if inline {
      self.sync_done.fetch_add(1, Ordering::AcqRel);
    }
    let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
    let expected = self.expected.load(Ordering::Acquire);
    if done >= expected {
      self.watched.lock().clear();
    }
    let ready = self.fast_return || done >= expected;
    ready
      && self
        .claimed
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
  }

  /// Called by a child that completed on a resuming thread.
  pub(crate) fn child_finished(&self) {
    if !self.count_done(false) {
      event!(
        Level::TRACE,
        done = self.done.load(Ordering::Acquire),
        expected = self.expected.load(Ordering::Acquire),
        "Combinator child finished; run not released."
      );
      return;
    }
    let attachment = self.attachment.lock().take();
    match attachment {
      Some(attachment) => {
        event!(Level::DEBUG, stage = %attachment.label, fast_return = self.fast_return, "Combinator released the run.");
        attachment.run.resume();
      }
      None => event!(Level::ERROR, "Combinator claimed without an attached run."),
    }
  }
}

impl<I, D> Suspend<I, D> for CombinatorInner<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn attach(self: Arc<Self>, attachment: Attachment<I, D>) -> SkeinResult<Attach> {
    let children = {
      let mut children = self.children.lock();
      if self.sealed.swap(true, Ordering::AcqRel) {
        return Err(SkeinError::AlreadyAttached);
      }
      std::mem::take(&mut *children)
    };
    self.expected.store(children.len(), Ordering::Release);
    *self.watched.lock() = children.iter().map(Arc::downgrade).collect();

    if children.is_empty() {
      self.claimed.store(true, Ordering::Release);
      return Ok(Attach::Continue);
    }
    *self.attachment.lock() = Some(attachment.clone());

    let mut released_here = false;
    for child in children {
      let handoff = Attachment {
        parent: Some(Arc::clone(&self)),
        ..attachment.clone()
      };
      let inline = match child.attach_child(handoff) {
        Ok(inline) => inline,
        Err(err) => {
          event!(Level::ERROR, stage = %attachment.label, error = %err, "Failed to attach combinator child.");
          attachment
            .run
            .output
            .lock()
            .record_error(attachment.origin.forces_error_code(), &format!("{}: {}", attachment.label, err));
          true
        }
      };
      if inline && self.count_done(true) {
        released_here = true;
      }
    }

    if released_here {
      self.attachment.lock().take();
      Ok(Attach::Continue)
    } else {
      Ok(Attach::Suspended)
    }
  }

  fn is_synchronous(&self) -> bool {
    self.all_inline()
  }

  fn into_abort(self: Arc<Self>) -> Arc<dyn Abort> {
    self
  }
}

impl<I, D> Abort for CombinatorInner<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn abort(self: Arc<Self>, cause: Interrupt) {
    let mut children = self.children.lock().clone();
    children.extend(self.watched.lock().iter().filter_map(Weak::upgrade));
    event!(
      Level::DEBUG,
      ?cause,
      pending = children.iter().filter(|c| !c.is_done()).count(),
      "Aborting combinator children."
    );
    for child in children {
      child.abort_child(cause);
    }
  }
}
