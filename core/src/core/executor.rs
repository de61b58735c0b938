// skein/src/core/executor.rs

//! Thread-affinity executors for callback completion.
//!
//! A callback configured with an executor re-dispatches its completion onto it at most
//! once. Executors may refuse work; a refused job comes back to the caller, and the
//! callback then completes inline instead.

use crate::error::{SkeinError, SkeinResult};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{event, Level};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job the executor refused, handed back for inline execution.
pub struct Rejected(pub Job);

impl fmt::Debug for Rejected {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Rejected(..)")
  }
}

pub trait Executor: Send + Sync {
  fn execute(&self, job: Job) -> Result<(), Rejected>;
}

/// Runs jobs on a tokio runtime's blocking pool. At most `capacity` jobs are in flight;
/// anything beyond that is rejected rather than queued.
#[derive(Clone)]
pub struct TokioExecutor {
  handle: Handle,
  permits: Arc<Semaphore>,
  capacity: usize,
}

impl TokioExecutor {
  pub fn new(handle: Handle, capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      handle,
      permits: Arc::new(Semaphore::new(capacity)),
      capacity,
    }
  }

  /// Uses the runtime the caller is running on.
  pub fn current(capacity: usize) -> SkeinResult<Self> {
    let handle = Handle::try_current().map_err(|e| SkeinError::Configuration(e.to_string()))?;
    Ok(Self::new(handle, capacity))
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn in_flight(&self) -> usize {
    self.capacity - self.permits.available_permits()
  }
}

impl Executor for TokioExecutor {
  fn execute(&self, job: Job) -> Result<(), Rejected> {
    let permit = match Arc::clone(&self.permits).try_acquire_owned() {
      Ok(permit) => permit,
      Err(_) => {
        event!(Level::DEBUG, capacity = self.capacity, "Executor at capacity; rejecting job.");
        return Err(Rejected(job));
      }
    };
    self.handle.spawn_blocking(move || {
      let _permit = permit;
      if catch_unwind(AssertUnwindSafe(job)).is_err() {
        event!(Level::ERROR, "Job panicked on executor thread.");
      }
    });
    Ok(())
  }
}

impl fmt::Debug for TokioExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioExecutor")
      .field("capacity", &self.capacity)
      .field("in_flight", &self.in_flight())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc;
  use std::thread;
  use std::time::{Duration, Instant};
  use tokio::runtime::{Builder, Runtime};

  fn runtime(name: &str) -> Runtime {
    Builder::new_multi_thread()
      .worker_threads(1)
      .thread_name(name)
      .enable_all()
      .build()
      .unwrap()
  }

  fn wait_until(condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
      if condition() {
        return true;
      }
      thread::sleep(Duration::from_millis(5));
    }
    false
  }

  #[test]
  fn runs_jobs_on_runtime_threads() {
    let rt = runtime("skein-test");
    let executor = TokioExecutor::new(rt.handle().clone(), 8);
    let (tx, rx) = mpsc::channel();
    executor
      .execute(Box::new(move || {
        let name = thread::current().name().map(str::to_string);
        tx.send(name).unwrap();
      }))
      .unwrap();
    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(name, "skein-test");
  }

  #[test]
  fn rejects_at_capacity_and_hands_the_job_back() {
    let rt = runtime("skein-full");
    let executor = TokioExecutor::new(rt.handle().clone(), 1);
    let (block_tx, block_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    executor
      .execute(Box::new(move || {
        started_tx.send(()).unwrap();
        let _ = block_rx.recv();
      }))
      .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(executor.in_flight(), 1);

    let ran_inline = Arc::new(AtomicUsize::new(0));
    let counter = ran_inline.clone();
    let rejected = executor
      .execute(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      }))
      .err()
      .unwrap();
    assert_eq!(ran_inline.load(Ordering::SeqCst), 0);
    (rejected.0)();
    assert_eq!(ran_inline.load(Ordering::SeqCst), 1);

    block_tx.send(()).unwrap();
    assert!(wait_until(|| executor.in_flight() == 0));
  }

  #[test]
  fn panicking_job_releases_its_slot() {
    let rt = runtime("skein-panic");
    let executor = TokioExecutor::new(rt.handle().clone(), 1);
    executor.execute(Box::new(|| panic!("job blew up"))).unwrap();
    assert!(wait_until(|| executor.in_flight() == 0));

    let (tx, rx) = mpsc::channel();
    executor.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
  }

  #[test]
  fn current_requires_a_runtime() {
    assert!(matches!(TokioExecutor::current(4), Err(SkeinError::Configuration(_))));
    let rt = runtime("skein-current");
    let executor = rt.block_on(async { TokioExecutor::current(4) }).unwrap();
    assert_eq!(executor.capacity(), 4);
  }
}
