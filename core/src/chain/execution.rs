// skein/src/chain/execution.rs

//! The chain driver: an explicit loop over the result container's task cursor.
//!
//! A `Run` carries everything needed to continue a workflow from any thread. The thread
//! that currently owns the run drives it until the workflow finishes or a hook hands back
//! pending work that has not completed yet; ownership then passes to whichever thread
//! completes that work, which calls `resume`.

use crate::callback::combinator::CombinatorInner;
use crate::callback::Attach;
use crate::chain::definition::{Chain, CompiledWorkflow};
use crate::core::cancel::{Abort, CancelToken};
use crate::core::control::HookKind;
use crate::core::deadline::DeadlineWatch;
use crate::core::result::{Fault, ResultContainer, ResultState};
use std::sync::Arc;
use tracing::{event, Level};

pub(crate) struct Run<I, D> {
  pub(crate) chain: Chain<I, D>,
  pub(crate) workflow: Arc<CompiledWorkflow<I, D>>,
  pub(crate) input: Arc<I>,
  pub(crate) output: ResultContainer<D>,
  pub(crate) cancel: Option<CancelToken>,
  pub(crate) deadline: Option<Arc<DeadlineWatch>>,
}

impl<I, D> Clone for Run<I, D> {
  fn clone(&self) -> Self {
    Self {
      chain: self.chain.clone(),
      workflow: Arc::clone(&self.workflow),
      input: Arc::clone(&self.input),
      output: self.output.clone(),
      cancel: self.cancel.clone(),
      deadline: self.deadline.clone(),
    }
  }
}

/// What a pending callback or combinator needs to resume the run: the run itself plus the
/// hook that produced it, for error attribution. A combinator's children get an attachment
/// naming the combinator, which they report to instead of resuming the run themselves.
pub(crate) struct Attachment<I, D> {
  pub(crate) run: Run<I, D>,
  pub(crate) origin: HookKind,
  pub(crate) label: Arc<str>,
  pub(crate) parent: Option<Arc<CombinatorInner<I, D>>>,
}

impl<I, D> Clone for Attachment<I, D> {
  fn clone(&self) -> Self {
    Self {
      run: self.run.clone(),
      origin: self.origin,
      label: Arc::clone(&self.label),
      parent: self.parent.clone(),
    }
  }
}

impl<I, D> Run<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  /// Drives the run until it finishes or suspends. Never recurses into itself: a pending
  /// result that completed inline just continues the loop.
  pub(crate) fn drive(&self) {
    let handlers = &self.workflow.handlers;
    loop {
      let index = match self.step() {
        Some(index) => index,
        None => return,
      };
      let handler = &handlers[index];
      let pending = match handler.invoke(
        &self.input,
        &self.output,
        self.chain.observer(),
        self.chain.config().log_hooks,
      ) {
        Some(pending) => pending,
        None => continue,
      };

      let abort: Arc<dyn Abort> = Arc::clone(&pending.0).into_abort();
      if let Some(token) = &self.cancel {
        token.arm(&abort);
      }
      if let Some(watch) = &self.deadline {
        watch.arm(&abort, self.chain.runtime());
      }
      drop(abort);
      let attachment = Attachment {
        run: self.clone(),
        origin: handler.kind(),
        label: Arc::from(handler.name()),
        parent: None,
      };
      match Arc::clone(&pending.0).attach(attachment) {
        Ok(Attach::Continue) => {
          event!(Level::TRACE, stage = handler.name(), hook = %handler.kind(), "Pending work completed inline; continuing.");
        }
        Ok(Attach::Suspended) => {
          event!(Level::DEBUG, workflow = %self.workflow.name, stage = handler.name(), hook = %handler.kind(), "Run suspended.");
          return;
        }
        Err(err) => {
          event!(Level::ERROR, stage = handler.name(), hook = %handler.kind(), error = %err, "Failed to attach pending work.");
          self
            .output
            .lock()
            .record_error(true, &format!("{} {} failed: {}", handler.name(), handler.kind(), err));
        }
      }
    }
  }

  /// Picks the next handler to run, or finishes the workflow. Returns `None` when the
  /// caller should stop driving.
  fn step(&self) -> Option<usize> {
    let handlers = &self.workflow.handlers;
    let mut state = self.output.lock();
    self.settle(&mut state);
    self.check_interrupt(&mut state);

    loop {
      if state.task_index >= handlers.len() {
        drop(state);
        self.finish();
        return None;
      }
      let index = state.task_index;
      state.task_index += 1;
      let handler = &handlers[index];
      if handler.should_run(&state) {
        state.awaiting = Some(index);
        return Some(index);
      }
      event!(
        Level::TRACE,
        stage = handler.name(),
        hook = %handler.kind(),
        success_cursor = state.success_cursor,
        "Handler skipped."
      );
    }
  }

  /// Applies the effects of the handler that ran last: after an `execute` hook that left
  /// the run in a continue state, the success cursor moves forward.
  fn settle(&self, state: &mut ResultState<D>) {
    let index = match state.awaiting.take() {
      Some(index) => index,
      None => return,
    };
    let handler = &self.workflow.handlers[index];
    if handler.kind() != HookKind::Execute || !state.should_continue() {
      return;
    }
    if let Some(order) = handler.advance_to() {
      if order > state.success_cursor {
        state.success_cursor = order;
      }
    }
  }

  fn check_interrupt(&self, state: &mut ResultState<D>) {
    if state.interrupted {
      return;
    }
    if self.cancel.as_ref().map_or(false, CancelToken::is_cancelled) {
      event!(Level::INFO, workflow = %self.workflow.name, "Run cancelled; unwinding.");
      state.record_fault(Fault::Cancelled, &format!("workflow {} cancelled", self.workflow.name));
      state.interrupted = true;
    } else if self.deadline.as_ref().map_or(false, |watch| watch.is_past()) {
      event!(Level::WARN, workflow = %self.workflow.name, "Run deadline exceeded; unwinding.");
      state.record_fault(
        Fault::DeadlineExceeded,
        &format!("workflow {} deadline exceeded", self.workflow.name),
      );
      state.interrupted = true;
    }
  }

  /// Continues a suspended run on the current thread.
  pub(crate) fn resume(&self) {
    self.output.lock().suspended = true;
    event!(Level::DEBUG, workflow = %self.workflow.name, "Run resumed.");
    self.drive();
  }

  fn finish(&self) {
    if let Some(watch) = &self.deadline {
      watch.stop();
    }
    if self.output.finish() {
      event!(
        Level::DEBUG,
        workflow = %self.workflow.name,
        code = self.output.code(),
        "Workflow finished."
      );
    } else {
      event!(Level::WARN, workflow = %self.workflow.name, "Workflow reached its terminal step twice.");
    }
  }
}
