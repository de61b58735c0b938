// skein/src/core/deadline.rs

//! Run deadlines. The driver checks the deadline at every step boundary; while the run is
//! suspended, a tokio timer aborts whatever it is suspended on once the deadline passes, so a
//! callback that never completes still unwinds the run with `DEADLINE_EXCEEDED`.

use crate::core::cancel::{disarm, Abort, ArmedSlot, Interrupt};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Timer runtime for chains built without one.
static TIMER_RUNTIME: Lazy<Option<Runtime>> = Lazy::new(|| {
  Builder::new_multi_thread()
    .worker_threads(1)
    .thread_name("skein-timer")
    .enable_time()
    .build()
    .map_err(|e| event!(Level::ERROR, error = %e, "Failed to build the deadline timer runtime."))
    .ok()
});

pub(crate) struct DeadlineWatch {
  deadline: Instant,
  expired: AtomicBool,
  started: AtomicBool,
  armed: ArmedSlot,
  stop: CancellationToken,
}

impl DeadlineWatch {
  pub(crate) fn new(deadline: Instant) -> Arc<Self> {
    Arc::new(Self {
      deadline,
      expired: AtomicBool::new(false),
      started: AtomicBool::new(false),
      armed: ArmedSlot::default(),
      stop: CancellationToken::new(),
    })
  }

  pub(crate) fn is_past(&self) -> bool {
    self.expired.load(Ordering::Acquire) || Instant::now() >= self.deadline
  }

  /// Remembers what the run is about to suspend on and starts the timer on first use.
  /// Aborts the work at once if the deadline already fired.
  pub(crate) fn arm(self: &Arc<Self>, pending: &Arc<dyn Abort>, runtime: Option<&Handle>) {
    {
      let mut armed = self.armed.lock();
      if !self.expired.load(Ordering::Acquire) {
        *armed = Some(Arc::downgrade(pending));
        drop(armed);
        self.start(runtime);
        return;
      }
    }
    Arc::clone(pending).abort(Interrupt::DeadlineExceeded);
  }

  fn start(self: &Arc<Self>, runtime: Option<&Handle>) {
    if self.started.swap(true, Ordering::AcqRel) {
      return;
    }
    let handle = match runtime {
      Some(handle) => handle.clone(),
      None => match TIMER_RUNTIME.as_ref() {
        Some(runtime) => runtime.handle().clone(),
        None => {
          event!(Level::WARN, "No timer runtime; deadline only checked between steps.");
          return;
        }
      },
    };
    let watch = Arc::downgrade(self);
    let stop = self.stop.clone();
    let at = tokio::time::Instant::from_std(self.deadline);
    handle.spawn(async move {
      tokio::select! {
        _ = tokio::time::sleep_until(at) => {
          // Aborting resumes the run, which executes user hooks.
          let _ = tokio::task::spawn_blocking(move || fire(&watch)).await;
        }
        _ = stop.cancelled() => {}
      }
    });
  }

  fn expire(&self) {
    let armed = {
      let mut armed = self.armed.lock();
      if self.expired.swap(true, Ordering::AcqRel) {
        return;
      }
      armed.take().and_then(|pending| pending.upgrade())
    };
    event!(Level::WARN, pending = armed.is_some(), "Run deadline fired.");
    if let Some(pending) = armed {
      pending.abort(Interrupt::DeadlineExceeded);
    }
  }

  /// Called when the run finished; ends the timer early.
  pub(crate) fn stop(&self) {
    self.stop.cancel();
    disarm(&self.armed);
  }
}

fn fire(watch: &Weak<DeadlineWatch>) {
  if let Some(watch) = watch.upgrade() {
    watch.expire();
  }
}

impl Drop for DeadlineWatch {
  fn drop(&mut self) {
    self.stop.cancel();
  }
}
