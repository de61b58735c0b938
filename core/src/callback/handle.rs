// skein/src/callback/handle.rs

//! `Callback<I, D, R>`: the handle an external system uses to resume a suspended run.
//!
//! Lifecycle, driven by one atomic state: `Pending -> Triggered -> Completing -> Done`.
//! Only the first of `succeed`, `fail` or `complete` wins; later calls are ignored. The
//! winner hands the run over through a `HandoffGate`:
//! - triggered on the thread that built the callback before the chain attached, it parks
//!   and the attaching thread runs the sub-paths inline, so no thread switch happens;
//! - triggered anywhere else, it waits (bounded) for the attach, optionally after moving
//!   once onto the configured `Executor`, then runs the sub-paths and resumes the run.

use super::combinator::CombinatorInner;
use super::{Attach, CombinedChild, Suspend};
use crate::chain::execution::Attachment;
use crate::chain::handler::{fold_failure, guard_hook};
use crate::config::DEFAULT_HANDOFF_TIMEOUT;
use crate::core::cancel::{Abort, Interrupt};
use crate::core::control::{HookKind, Pending};
use crate::core::executor::{Executor, Job, Rejected};
use crate::core::gate::HandoffGate;
use crate::core::result::{Fault, ResultState};
use crate::error::{SkeinError, SkeinResult};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{event, Level};

const PENDING: u8 = 0;
const TRIGGERED: u8 = 1;
const COMPLETING: u8 = 2;
const DONE: u8 = 3;

type SuccessPath<I, D, R> = Box<dyn FnOnce(&I, &mut ResultState<D>, R) -> anyhow::Result<()> + Send>;
type FailPath<I, D> = Box<dyn FnOnce(&I, &mut ResultState<D>, &anyhow::Error) -> anyhow::Result<()> + Send>;
type CompletePath<I, D> = Box<dyn FnOnce(&I, &mut ResultState<D>) -> anyhow::Result<()> + Send>;
type ResendHook<I, D, R> = Arc<dyn Fn(&Callback<I, D, R>, &anyhow::Error, u32) -> bool + Send + Sync>;

struct Paths<I, D, R> {
  on_success: Option<SuccessPath<I, D, R>>,
  on_fail: Option<FailPath<I, D>>,
  on_complete: Option<CompletePath<I, D>>,
}

impl<I, D, R> Default for Paths<I, D, R> {
  fn default() -> Self {
    Self {
      on_success: None,
      on_fail: None,
      on_complete: None,
    }
  }
}

enum Completion<R> {
  Success(R),
  Failure(anyhow::Error),
  Complete,
}

impl<R> Completion<R> {
  fn kind(&self) -> &'static str {
    match self {
      Completion::Success(_) => "success",
      Completion::Failure(_) => "failure",
      Completion::Complete => "complete",
    }
  }
}

pub(crate) struct CallbackInner<I, D, R> {
  state: AtomicU8,
  attached: AtomicBool,
  switched: AtomicBool,
  synchronous: AtomicBool,
  attempts: AtomicU32,
  parent: ThreadId,
  gate: HandoffGate<Attachment<I, D>>,
  completion: Mutex<Option<Completion<R>>>,
  paths: Mutex<Paths<I, D, R>>,
  executor: Option<Arc<dyn Executor>>,
  timeout: Duration,
  resend: Option<ResendHook<I, D, R>>,
  combinator: OnceCell<Weak<CombinatorInner<I, D>>>,
}

/// Builder for a `Callback`. Build it inside the hook that returns it: the building thread
/// is the one allowed to complete the callback without a handoff wait.
pub struct CallbackBuilder<I, D, R = ()> {
  paths: Paths<I, D, R>,
  executor: Option<Arc<dyn Executor>>,
  timeout: Duration,
  resend: Option<ResendHook<I, D, R>>,
}

impl<I, D, R> CallbackBuilder<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  pub fn new() -> Self {
    Self {
      paths: Paths::default(),
      executor: None,
      timeout: DEFAULT_HANDOFF_TIMEOUT,
      resend: None,
    }
  }

  /// Runs under the result lock when the callback succeeds.
  pub fn on_success(
    mut self,
    path: impl FnOnce(&I, &mut ResultState<D>, R) -> anyhow::Result<()> + Send + 'static,
  ) -> Self {
    self.paths.on_success = Some(Box::new(path));
    self
  }

  /// Runs under the result lock when the callback fails. Without it, the failure is folded
  /// into the result like a hook error; a failed sub-workflow contributes its own code.
  pub fn on_fail(
    mut self,
    path: impl FnOnce(&I, &mut ResultState<D>, &anyhow::Error) -> anyhow::Result<()> + Send + 'static,
  ) -> Self {
    self.paths.on_fail = Some(Box::new(path));
    self
  }

  /// Runs after the success or fail path, and on `complete()`. At most once.
  pub fn on_complete(
    mut self,
    path: impl FnOnce(&I, &mut ResultState<D>) -> anyhow::Result<()> + Send + 'static,
  ) -> Self {
    self.paths.on_complete = Some(Box::new(path));
    self
  }

  /// Moves the completion onto `executor` once, unless it completes synchronously.
  pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Bound for a resuming thread waiting on the chain to attach.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Consulted on `fail` with the attempt number. Returning `true` means the hook re-issued
  /// the operation and the callback stays pending.
  pub fn resend(
    mut self,
    hook: impl Fn(&Callback<I, D, R>, &anyhow::Error, u32) -> bool + Send + Sync + 'static,
  ) -> Self {
    self.resend = Some(Arc::new(hook));
    self
  }

  pub fn build(self) -> Callback<I, D, R> {
    Callback {
      inner: Arc::new(CallbackInner {
        state: AtomicU8::new(PENDING),
        attached: AtomicBool::new(false),
        switched: AtomicBool::new(false),
        synchronous: AtomicBool::new(false),
        attempts: AtomicU32::new(0),
        parent: thread::current().id(),
        gate: HandoffGate::new(),
        completion: Mutex::new(None),
        paths: Mutex::new(self.paths),
        executor: self.executor,
        timeout: self.timeout,
        resend: self.resend,
        combinator: OnceCell::new(),
      }),
    }
  }
}

impl<I, D, R> Default for CallbackBuilder<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<I, D, R> fmt::Debug for CallbackBuilder<I, D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CallbackBuilder")
      .field("on_success", &self.paths.on_success.is_some())
      .field("on_fail", &self.paths.on_fail.is_some())
      .field("on_complete", &self.paths.on_complete.is_some())
      .field("executor", &self.executor.is_some())
      .field("timeout", &self.timeout)
      .field("resend", &self.resend.is_some())
      .finish()
  }
}

/// Cloneable handle to a pending asynchronous completion. Hand a clone to the external
/// system and return the callback from the hook with `Flow::wait(callback)`.
pub struct Callback<I, D, R = ()> {
  pub(crate) inner: Arc<CallbackInner<I, D, R>>,
}

impl<I, D, R> Callback<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  pub fn builder() -> CallbackBuilder<I, D, R> {
    CallbackBuilder::new()
  }

  /// A callback without sub-paths: completion only resumes the run.
  pub fn new() -> Self {
    CallbackBuilder::new().build()
  }

  /// Completes the operation successfully with `value`.
  pub fn succeed(&self, value: R) -> SkeinResult<()> {
    self.inner.trigger(Completion::Success(value))
  }

  /// Completes the operation with `error`, unless a resend hook re-issues it.
  pub fn fail(&self, error: impl Into<anyhow::Error>) -> SkeinResult<()> {
    let error = error.into();
    if let Some(resend) = &self.inner.resend {
      if self.inner.state.load(Ordering::Acquire) == PENDING {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if resend(self, &error, attempt) {
          event!(Level::DEBUG, attempt, error = %error, "Callback failure handed to the resend hook.");
          return Ok(());
        }
      }
    }
    self.inner.trigger(Completion::Failure(error))
  }

  /// Signals completion without a success/fail distinction. Ignored if the callback
  /// already completed.
  pub fn complete(&self) -> SkeinResult<()> {
    self.inner.trigger(Completion::Complete)
  }

  pub fn is_triggered(&self) -> bool {
    self.inner.state.load(Ordering::Acquire) != PENDING
  }

  /// True once the sub-paths have run.
  pub fn is_done(&self) -> bool {
    self.inner.state.load(Ordering::Acquire) == DONE
  }

  /// True if the callback completed on its building thread before the chain attached.
  pub fn is_synchronous(&self) -> bool {
    self.inner.synchronous.load(Ordering::Acquire)
  }

  /// Failures handed to the resend hook so far.
  pub fn attempts(&self) -> u32 {
    self.inner.attempts.load(Ordering::Acquire)
  }
}

impl<I, D, R> Default for Callback<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<I, D, R> Clone for Callback<I, D, R> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<I, D, R> fmt::Debug for Callback<I, D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Callback")
      .field("state", &self.inner.state.load(Ordering::Relaxed))
      .field("synchronous", &self.inner.synchronous.load(Ordering::Relaxed))
      .field("combined", &self.inner.combinator.get().is_some())
      .field("timeout", &self.inner.timeout)
      .finish()
  }
}

impl<I, D, R> From<Callback<I, D, R>> for Pending<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn from(callback: Callback<I, D, R>) -> Self {
    Pending(callback.inner)
  }
}

impl<I, D, R> CallbackInner<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn on_parent_thread(&self) -> bool {
    thread::current().id() == self.parent
  }

  fn trigger(self: &Arc<Self>, completion: Completion<R>) -> SkeinResult<()> {
    if self
      .state
      .compare_exchange(PENDING, TRIGGERED, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      event!(Level::DEBUG, kind = completion.kind(), "Callback already triggered; ignoring.");
      return Ok(());
    }
    event!(Level::TRACE, kind = completion.kind(), "Callback triggered.");
    *self.completion.lock() = Some(completion);

    if self.on_parent_thread() && self.gate.try_park() {
      self.synchronous.store(true, Ordering::Release);
      return Ok(());
    }
    self.dispatch()
  }

  fn dispatch(self: &Arc<Self>) -> SkeinResult<()> {
    if let Some(executor) = &self.executor {
      if self
        .switched
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        let inner = Arc::clone(self);
        let job: Job = Box::new(move || {
          if let Err(err) = inner.doit() {
            event!(Level::ERROR, error = %err, "Callback completion failed on executor.");
          }
        });
        match executor.execute(job) {
          Ok(()) => return Ok(()),
          Err(Rejected(job)) => {
            event!(Level::WARN, "Executor rejected callback completion; completing inline.");
            drop(job);
          }
        }
      }
    }
    self.doit()
  }

  fn doit(self: &Arc<Self>) -> SkeinResult<()> {
    let attachment = if self.on_parent_thread() {
      if self.gate.try_park() {
        self.synchronous.store(true, Ordering::Release);
        return Ok(());
      }
      self
        .gate
        .try_take()
        .ok_or_else(|| SkeinError::Internal("callback handoff slot already consumed".to_string()))?
    } else {
      match self.gate.take(self.timeout) {
        Some(attachment) => attachment,
        None => {
          event!(Level::ERROR, waited = ?self.timeout, "Callback handoff timed out waiting for the chain to attach.");
          return Err(SkeinError::HandoffTimeout { waited: self.timeout });
        }
      }
    };

    self.run_paths(&attachment);
    match &attachment.parent {
      Some(parent) => parent.child_finished(),
      None => attachment.run.resume(),
    }
    Ok(())
  }

  /// Completes on the attaching thread: the trigger parked, or the resuming thread gave up.
  fn finish_inline(&self, attachment: &Attachment<I, D>) {
    if self.gate.is_closed() {
      event!(Level::WARN, stage = %attachment.label, "Completing callback inline after a handoff timeout.");
      attachment.run.output.lock().record_fault(
        Fault::HandoffTimeout,
        &format!("{}: callback handoff timed out after {:?}", attachment.label, self.timeout),
      );
    }
    self.run_paths(attachment);
  }

  fn run_paths(&self, attachment: &Attachment<I, D>) {
    if self
      .state
      .compare_exchange(TRIGGERED, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      event!(Level::WARN, "Callback sub-paths already ran.");
      return;
    }
    let completion = self.completion.lock().take();
    let paths = std::mem::take(&mut *self.paths.lock());
    let input: &I = &attachment.run.input;
    let origin = attachment.origin;
    let label: &str = &attachment.label;

    {
      let mut state = attachment.run.output.lock();
      match completion {
        Some(Completion::Success(value)) => {
          if let Some(path) = paths.on_success {
            let result = guard_hook(|| path(input, &mut *state, value));
            fold_path_error(&mut state, origin, label, "on_success", result);
          }
        }
        Some(Completion::Failure(error)) => {
          event!(Level::DEBUG, stage = %label, error = %error, "Callback failed.");
          match paths.on_fail {
            Some(path) => {
              let result = guard_hook(|| path(input, &mut *state, &error));
              fold_path_error(&mut state, origin, label, "on_fail", result);
              if matches!(
                error.downcast_ref::<SkeinError>(),
                Some(SkeinError::Cancelled | SkeinError::DeadlineExceeded)
              ) {
                fold_failure(&mut state, origin, label, &error);
              }
            }
            None => fold_failure(&mut state, origin, label, &error),
          }
        }
        Some(Completion::Complete) | None => {}
      }
      if let Some(path) = paths.on_complete {
        let result = guard_hook(|| path(input, &mut *state));
        fold_path_error(&mut state, origin, label, "on_complete", result);
      }
    }
    self.state.store(DONE, Ordering::Release);
  }

  /// Marks the callback as a combinator child. The child only remembers its combinator
  /// weakly; the strong reference travels in the attachment the combinator hands it.
  pub(crate) fn join(&self, parent: &Arc<CombinatorInner<I, D>>) -> SkeinResult<()> {
    if self.attached.load(Ordering::Acquire) {
      return Err(SkeinError::AlreadyAttached);
    }
    self
      .combinator
      .set(Arc::downgrade(parent))
      .map_err(|_| SkeinError::AlreadyCombined)
  }
}

fn fold_path_error<D>(state: &mut ResultState<D>, origin: HookKind, label: &str, path: &str, result: Result<(), String>) {
  if let Err(message) = result {
    event!(Level::ERROR, stage = %label, %path, error = %message, "Callback sub-path failed.");
    state.record_error(
      origin.forces_error_code(),
      &format!("{} callback {} failed: {}", label, path, message),
    );
  }
}

impl<I, D, R> Suspend<I, D> for CallbackInner<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn attach(self: Arc<Self>, attachment: Attachment<I, D>) -> SkeinResult<Attach> {
    if self.combinator.get().is_some() {
      return Err(SkeinError::AlreadyCombined);
    }
    if self.attached.swap(true, Ordering::AcqRel) {
      return Err(SkeinError::AlreadyAttached);
    }
    match self.gate.offer(attachment) {
      Ok(()) => Ok(Attach::Suspended),
      Err(attachment) => {
        self.finish_inline(&attachment);
        Ok(Attach::Continue)
      }
    }
  }

  fn is_synchronous(&self) -> bool {
    self.synchronous.load(Ordering::Acquire)
  }

  fn into_abort(self: Arc<Self>) -> Arc<dyn Abort> {
    self
  }
}

impl<I, D, R> CombinedChild<I, D> for CallbackInner<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn attach_child(&self, attachment: Attachment<I, D>) -> SkeinResult<bool> {
    if self.attached.swap(true, Ordering::AcqRel) {
      return Err(SkeinError::AlreadyAttached);
    }
    match self.gate.offer(attachment) {
      Ok(()) => Ok(false),
      Err(attachment) => {
        self.finish_inline(&attachment);
        Ok(true)
      }
    }
  }

  fn abort_child(self: Arc<Self>, cause: Interrupt) {
    self.abort(cause);
  }

  fn is_done(&self) -> bool {
    self.state.load(Ordering::Acquire) == DONE
  }
}

impl<I, D, R> Abort for CallbackInner<I, D, R>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
  R: Send + 'static,
{
  fn abort(self: Arc<Self>, cause: Interrupt) {
    if let Err(err) = self.trigger(Completion::Failure(cause.into_error().into())) {
      event!(Level::WARN, ?cause, error = %err, "Aborting callback failed.");
    }
  }
}
