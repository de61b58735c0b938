// skein/src/chain/future.rs

//! `ChainFuture<I, D>`: runs several invocations of one workflow strictly one after the
//! other and signals when the last one finished.
//!
//! Each leg's terminal step hands control to the next leg from whichever thread finished
//! it. Launches go through a trampoline, so a long series of synchronous legs does not
//! nest.

use crate::chain::definition::Chain;
use crate::config::RunOptions;
use crate::core::result::ResultContainer;
use crate::error::{SkeinError, SkeinResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{event, instrument, Level};

struct Leg<I, D> {
  chain: Chain<I, D>,
  input: Arc<I>,
  output: ResultContainer<D>,
}

impl<I, D> Clone for Leg<I, D> {
  fn clone(&self) -> Self {
    Self {
      chain: self.chain.clone(),
      input: Arc::clone(&self.input),
      output: self.output.clone(),
    }
  }
}

struct FutureInner<I, D> {
  workflow: String,
  legs: Mutex<Vec<Leg<I, D>>>,
  started: AtomicBool,
  launched: AtomicUsize,
  finished: AtomicUsize,
  pumping: AtomicBool,
  done: Mutex<bool>,
  done_cv: Condvar,
}

pub struct ChainFuture<I, D> {
  inner: Arc<FutureInner<I, D>>,
}

impl<I, D> ChainFuture<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  pub fn new(workflow: impl Into<String>) -> Self {
    Self {
      inner: Arc::new(FutureInner {
        workflow: workflow.into(),
        legs: Mutex::new(Vec::new()),
        started: AtomicBool::new(false),
        launched: AtomicUsize::new(0),
        finished: AtomicUsize::new(0),
        pumping: AtomicBool::new(false),
        done: Mutex::new(false),
        done_cv: Condvar::new(),
      }),
    }
  }

  /// Appends a leg. Legs run in the order they were added.
  pub fn init(&self, chain: &Chain<I, D>, input: impl Into<Arc<I>>, output: ResultContainer<D>) -> SkeinResult<&Self> {
    if self.inner.started.load(Ordering::Acquire) {
      return Err(SkeinError::FutureStarted);
    }
    self.inner.legs.lock().push(Leg {
      chain: chain.clone(),
      input: input.into(),
      output,
    });
    Ok(self)
  }

  /// Launches the first leg. Each later leg starts when its predecessor finishes.
  #[instrument(
    name = "ChainFuture::start",
    skip_all,
    fields(workflow = %self.inner.workflow, legs = self.len()),
    err(Display)
  )]
  pub fn start(&self) -> SkeinResult<()> {
    if self.inner.started.swap(true, Ordering::AcqRel) {
      return Err(SkeinError::FutureStarted);
    }
    event!(Level::DEBUG, "Chain future starting.");
    self.inner.pump();
    Ok(())
  }

  /// Blocks until the last leg finished. Returns `false` on timeout.
  pub fn wait_end(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut done = self.inner.done.lock();
    while !*done {
      if self.inner.done_cv.wait_until(&mut done, deadline).timed_out() {
        return *done;
      }
    }
    true
  }

  pub fn is_done(&self) -> bool {
    *self.inner.done.lock()
  }

  /// Number of legs that reached their terminal step.
  pub fn cursor(&self) -> usize {
    self.inner.finished.load(Ordering::Acquire)
  }

  pub fn len(&self) -> usize {
    self.inner.legs.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Result containers of every leg, in launch order.
  pub fn outputs(&self) -> Vec<ResultContainer<D>> {
    self.inner.legs.lock().iter().map(|leg| leg.output.clone()).collect()
  }
}

impl<I, D> Clone for ChainFuture<I, D> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<I, D> fmt::Debug for ChainFuture<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChainFuture")
      .field("workflow", &self.inner.workflow)
      .field("legs", &self.inner.legs.lock().len())
      .field("finished", &self.inner.finished.load(Ordering::Relaxed))
      .finish()
  }
}

impl<I, D> FutureInner<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  fn pump(self: &Arc<Self>) {
    loop {
      if self
        .pumping
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
      {
        return;
      }

      loop {
        let finished = self.finished.load(Ordering::Acquire);
        let launched = self.launched.load(Ordering::Acquire);
        if finished < launched {
          break;
        }
        let leg = {
          let legs = self.legs.lock();
          if finished >= legs.len() {
            None
          } else {
            Some(legs[finished].clone())
          }
        };
        let leg = match leg {
          Some(leg) => leg,
          None => {
            self.release();
            break;
          }
        };

        self.launched.store(launched + 1, Ordering::Release);
        event!(Level::DEBUG, workflow = %self.workflow, leg = finished, "Launching chain future leg.");
        let me = Arc::clone(self);
        let options = RunOptions::new().on_finish(move |_: &ResultContainer<D>| {
          me.finished.fetch_add(1, Ordering::AcqRel);
          me.pump();
        });
        if let Err(err) = leg.chain.run_workflow_with(&self.workflow, leg.input, &leg.output, options) {
          event!(Level::ERROR, leg = finished, error = %err, "Chain future leg failed to start.");
          self.finished.fetch_add(1, Ordering::AcqRel);
        }
      }

      self.pumping.store(false, Ordering::Release);
      // A leg may have finished on another thread while this one held the flag.
      let idle = self.finished.load(Ordering::Acquire) == self.launched.load(Ordering::Acquire);
      if !idle || *self.done.lock() {
        return;
      }
    }
  }

  fn release(&self) {
    let mut done = self.done.lock();
    if !*done {
      *done = true;
      self.done_cv.notify_all();
      event!(Level::DEBUG, workflow = %self.workflow, legs = self.finished.load(Ordering::Acquire), "Chain future done.");
    }
  }
}
