// skein/src/core/result.rs

//! The per-invocation result container threaded through every hook of a workflow.
//!
//! `ResultContainer<D>` is a cheap, cloneable handle (shared ownership plus interior
//! mutability through `parking_lot::Mutex`). Hooks never see the handle itself: the
//! chain locks it and passes `&mut ResultState<D>`, which carries the business outcome
//! (code and message), the business payload `D`, and the cursors the chain driver uses.
//!
//! IMPORTANT: the lock is held for the duration of a hook call. A hook must not try to
//! lock the same container again, and must not block waiting for another thread that
//! needs the container.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reserved result codes. Anything else is a business code chosen by the application.
pub mod codes {
  /// The only code that means success.
  pub const SUCCESS: i32 = 0;
  /// A hook raised an error or panicked while the run was still succeeding.
  pub const INTERNAL_ERROR: i32 = -1;
  /// A callback's resuming thread gave up waiting for the chain to attach.
  pub const HANDOFF_TIMEOUT: i32 = -2;
  /// The run's cancel token fired.
  pub const CANCELLED: i32 = -3;
  /// The run's deadline passed before it reached its terminal step.
  pub const DEADLINE_EXCEEDED: i32 = -4;
}

pub(crate) const DEFAULT_SEPARATOR: &str = "; ";

/// Framework-level failure kinds, each mapped to one reserved code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
  Internal,
  HandoffTimeout,
  Cancelled,
  DeadlineExceeded,
}

impl Fault {
  pub fn code(self) -> i32 {
    match self {
      Fault::Internal => codes::INTERNAL_ERROR,
      Fault::HandoffTimeout => codes::HANDOFF_TIMEOUT,
      Fault::Cancelled => codes::CANCELLED,
      Fault::DeadlineExceeded => codes::DEADLINE_EXCEEDED,
    }
  }

  pub fn from_code(code: i32) -> Option<Fault> {
    match code {
      codes::INTERNAL_ERROR => Some(Fault::Internal),
      codes::HANDOFF_TIMEOUT => Some(Fault::HandoffTimeout),
      codes::CANCELLED => Some(Fault::Cancelled),
      codes::DEADLINE_EXCEEDED => Some(Fault::DeadlineExceeded),
      _ => None,
    }
  }
}

/// Tagged view of a container's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Success,
  BusinessFail { code: i32, message: String },
  FrameworkFail { fault: Fault, message: String },
}

/// Mutable contents of a `ResultContainer`, handed to hooks as `&mut ResultState<D>`.
pub struct ResultState<D> {
  code: i32,
  message: String,
  continue_on_fail: bool,
  data: D,
  separator: String,

  pub(crate) workflow: String,
  /// Cursor into the task-handler list. Only the chain driver moves it, and only forward.
  pub(crate) task_index: usize,
  /// Highest stage order whose success/fail/complete hooks still run.
  pub(crate) success_cursor: i32,
  /// Index of the handler whose effects have not been settled yet.
  pub(crate) awaiting: Option<usize>,
  /// Set once the run has been resumed from a callback completion.
  pub(crate) suspended: bool,
  /// Set once the cancel token or deadline has been folded into the outcome.
  pub(crate) interrupted: bool,
}

impl<D> ResultState<D> {
  fn new(data: D) -> Self {
    Self {
      code: codes::SUCCESS,
      message: String::new(),
      continue_on_fail: false,
      data,
      separator: DEFAULT_SEPARATOR.to_string(),
      workflow: String::new(),
      task_index: 0,
      success_cursor: i32::MIN,
      awaiting: None,
      suspended: false,
      interrupted: false,
    }
  }

  pub fn code(&self) -> i32 {
    self.code
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn data(&self) -> &D {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut D {
    &mut self.data
  }

  pub fn is_success(&self) -> bool {
    self.code == codes::SUCCESS
  }

  /// True while later `execute` hooks may still run: the run is succeeding, or it failed
  /// with `fail_and_continue`.
  pub fn should_continue(&self) -> bool {
    self.is_success() || self.continue_on_fail
  }

  /// Records a business failure that stops forward progress. Later `execute` hooks are
  /// skipped; unwind hooks of stages already reached still run.
  pub fn fail(&mut self, code: i32, message: impl AsRef<str>) {
    self.code = code;
    self.continue_on_fail = false;
    self.prepend_message(message.as_ref());
  }

  /// Records a business failure but lets the following `execute` hooks run.
  pub fn fail_and_continue(&mut self, code: i32, message: impl AsRef<str>) {
    self.code = code;
    self.continue_on_fail = true;
    self.prepend_message(message.as_ref());
  }

  /// Prepends `message` so the newest failure reads first.
  pub fn prepend_message(&mut self, message: &str) {
    if message.is_empty() {
      return;
    }
    if self.message.is_empty() {
      self.message = message.to_string();
    } else {
      self.message = format!("{}{}{}", message, self.separator, self.message);
    }
  }

  pub fn outcome(&self) -> Outcome {
    if self.is_success() {
      return Outcome::Success;
    }
    match Fault::from_code(self.code) {
      Some(fault) => Outcome::FrameworkFail {
        fault,
        message: self.message.clone(),
      },
      None => Outcome::BusinessFail {
        code: self.code,
        message: self.message.clone(),
      },
    }
  }

  pub fn workflow(&self) -> &str {
    &self.workflow
  }

  pub fn task_index(&self) -> usize {
    self.task_index
  }

  pub fn success_cursor(&self) -> i32 {
    self.success_cursor
  }

  /// Folds a hook error into the outcome. Only errors from `execute`-type work replace the
  /// code, and only while the run is still succeeding, so an earlier real cause is not masked.
  pub(crate) fn record_error(&mut self, forces_code: bool, message: &str) {
    if forces_code && self.is_success() {
      self.code = codes::INTERNAL_ERROR;
    }
    if forces_code {
      self.continue_on_fail = false;
    }
    self.prepend_message(message);
  }

  /// Folds a framework fault. The code is replaced only while the run is still succeeding
  /// or merely continuing past a business failure.
  pub(crate) fn record_fault(&mut self, fault: Fault, message: &str) {
    if self.should_continue() {
      self.code = fault.code();
    }
    self.continue_on_fail = false;
    self.prepend_message(message);
  }

  pub(crate) fn set_separator(&mut self, separator: &str) {
    self.separator = separator.to_string();
  }
}

impl<D: fmt::Debug> fmt::Debug for ResultState<D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultState")
      .field("workflow", &self.workflow)
      .field("code", &self.code)
      .field("message", &self.message)
      .field("continue_on_fail", &self.continue_on_fail)
      .field("task_index", &self.task_index)
      .field("success_cursor", &self.success_cursor)
      .field("data", &self.data)
      .finish()
  }
}

pub(crate) type FinishHook<D> = Box<dyn FnOnce(&ResultContainer<D>) + Send + 'static>;

struct Shared<D> {
  used: AtomicBool,
  state: Mutex<ResultState<D>>,
  finished: Mutex<bool>,
  finished_cv: Condvar,
  finish_hook: Mutex<Option<FinishHook<D>>>,
}

/// Shared handle to one invocation's result state. Submit it to a chain exactly once.
pub struct ResultContainer<D>(Arc<Shared<D>>);

impl<D: Send + 'static> ResultContainer<D> {
  pub fn new(data: D) -> Self {
    ResultContainer(Arc::new(Shared {
      used: AtomicBool::new(false),
      state: Mutex::new(ResultState::new(data)),
      finished: Mutex::new(false),
      finished_cv: Condvar::new(),
      finish_hook: Mutex::new(None),
    }))
  }

  /// Locks the state. The guard MUST NOT be held while a chain runs this container on the
  /// same thread.
  pub fn lock(&self) -> MutexGuard<'_, ResultState<D>> {
    self.0.state.lock()
  }

  pub fn try_lock(&self) -> Option<MutexGuard<'_, ResultState<D>>> {
    self.0.state.try_lock()
  }

  pub fn code(&self) -> i32 {
    self.lock().code()
  }

  pub fn message(&self) -> String {
    self.lock().message().to_string()
  }

  pub fn is_success(&self) -> bool {
    self.lock().is_success()
  }

  pub fn outcome(&self) -> Outcome {
    self.lock().outcome()
  }

  /// True once the container has been submitted to a chain.
  pub fn is_used(&self) -> bool {
    self.0.used.load(Ordering::Acquire)
  }

  pub fn is_finished(&self) -> bool {
    *self.0.finished.lock()
  }

  /// True when the run finished without ever being resumed from a callback completion.
  pub fn is_synchronous(&self) -> bool {
    self.is_finished() && !self.lock().suspended
  }

  /// Blocks until the run reaches its terminal step. Returns `false` on timeout.
  pub fn wait_finished(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut finished = self.0.finished.lock();
    while !*finished {
      if self.0.finished_cv.wait_until(&mut finished, deadline).timed_out() {
        return *finished;
      }
    }
    true
  }

  /// Single-use claim. Returns `false` if the container was already submitted.
  pub(crate) fn claim(&self) -> bool {
    self
      .0
      .used
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub(crate) fn set_finish_hook(&self, hook: FinishHook<D>) {
    *self.0.finish_hook.lock() = Some(hook);
  }

  /// Marks the run finished, wakes waiters and fires the finish hook. Returns `false` if the
  /// run had already finished.
  pub(crate) fn finish(&self) -> bool {
    {
      let mut finished = self.0.finished.lock();
      if *finished {
        return false;
      }
      *finished = true;
      self.0.finished_cv.notify_all();
    }
    let hook = self.0.finish_hook.lock().take();
    if let Some(hook) = hook {
      hook(self);
    }
    true
  }

  pub(crate) fn same_as(&self, other: &ResultContainer<D>) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl<D> Clone for ResultContainer<D> {
  fn clone(&self) -> Self {
    ResultContainer(Arc::clone(&self.0))
  }
}

impl<D: Send + Default + 'static> Default for ResultContainer<D> {
  fn default() -> Self {
    Self::new(Default::default())
  }
}

impl<D: Send + 'static> fmt::Debug for ResultContainer<D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (code, task_index) = match self.try_lock() {
      Some(state) => (Some(state.code()), Some(state.task_index())),
      None => (None, None),
    };
    f.debug_struct("ResultContainer")
      .field("used", &self.is_used())
      .field("finished", &self.is_finished())
      .field("code", &code)
      .field("task_index", &task_index)
      .finish()
  }
}
