// skein/src/chain/handler.rs

//! Task handlers: the chain's wrapper around one stage hook, plus the synthetic `final`
//! handler closing every workflow.
//!
//! This is the boundary where hook errors and panics are trapped and folded into the
//! result container, and where the hook observer is notified.

use crate::core::control::{Flow, HookKind, Pending};
use crate::core::observer::HookObserver;
use crate::core::result::{Fault, ResultContainer, ResultState};
use crate::core::stage::StageDef;
use crate::error::SkeinError;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{event, span, Level};

pub(crate) const FINAL_NAME: &str = "final";

pub struct TaskHandler<I, D> {
  kind: HookKind,
  stage: Option<StageDef<I, D>>,
  /// Where the success cursor moves once this `execute` hook leaves the run in a continue
  /// state: the next `execute` handler's order, or for the last one the highest stage order.
  advance_to: Option<i32>,
}

impl<I: 'static, D: 'static> TaskHandler<I, D> {
  pub fn kind(&self) -> HookKind {
    self.kind
  }

  pub fn stage(&self) -> Option<&StageDef<I, D>> {
    self.stage.as_ref()
  }

  pub fn order(&self) -> Option<i32> {
    self.stage.as_ref().map(|s| s.order)
  }

  pub fn name(&self) -> &str {
    self.stage.as_ref().map_or(FINAL_NAME, |s| s.name())
  }

  pub(crate) fn advance_to(&self) -> Option<i32> {
    self.advance_to
  }

  /// Skip policy. `final` always runs; everything else needs the success cursor to have
  /// reached its stage, and the success/fail hooks additionally need a matching outcome.
  pub(crate) fn should_run(&self, state: &ResultState<D>) -> bool {
    let stage = match &self.stage {
      None => return true,
      Some(stage) => stage,
    };
    if state.success_cursor < stage.order {
      return false;
    }
    match self.kind {
      HookKind::OnSuccess => state.is_success(),
      HookKind::OnFail => !state.is_success(),
      HookKind::Execute => !state.interrupted,
      _ => true,
    }
  }
}

impl<I, D> TaskHandler<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  /// Runs the hook under the container lock. Returns the pending completion if the hook
  /// went asynchronous; errors and panics are folded into the container.
  pub(crate) fn invoke(
    &self,
    input: &I,
    output: &ResultContainer<D>,
    observer: &dyn HookObserver<I, D>,
    log_hooks: bool,
  ) -> Option<Pending<I, D>> {
    let hook_span = span!(Level::DEBUG, "task_handler", stage = self.name(), hook = %self.kind);
    let _hook_span_guard = hook_span.enter();

    let mut state = output.lock();
    let observe = log_hooks && observer.is_logging_enabled();
    if observe {
      observer.before_hook(self.name(), self.kind, input, &state);
    }
    let started = Instant::now();

    let result = match &self.stage {
      None => {
        event!(Level::DEBUG, workflow = %state.workflow(), code = state.code(), "Workflow reached its final handler.");
        Ok(None)
      }
      Some(def) => guard_hook(|| {
        let stage = def.stage.as_ref();
        let flow = match self.kind {
          HookKind::Execute => stage.execute(input, &mut state),
          HookKind::OnSuccess => stage.on_success(input, &mut state),
          HookKind::OnFail => stage.on_fail(input, &mut state),
          HookKind::OnComplete => stage.on_complete(input, &mut state),
          HookKind::Final => Ok(Flow::Next),
        }?;
        Ok(match flow {
          Flow::Next => None,
          Flow::Await(pending) => Some(pending),
        })
      }),
    };

    let pending = match result {
      Ok(pending) => pending,
      Err(message) => {
        event!(Level::ERROR, stage = self.name(), hook = %self.kind, error = %message, "Hook failed.");
        state.record_error(
          self.kind.forces_error_code(),
          &format!("{} {} failed: {}", self.name(), self.kind, message),
        );
        None
      }
    };

    if observe {
      observer.after_hook(self.name(), self.kind, input, &state, started.elapsed());
    }
    pending
  }
}

impl<I: 'static, D: 'static> fmt::Debug for TaskHandler<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandler")
      .field("kind", &self.kind)
      .field("name", &self.name())
      .field("order", &self.order())
      .finish()
  }
}

/// Initial success cursor: the first `execute` order, or every stage when none executes.
pub(crate) fn first_cursor<I, D>(stages: &[StageDef<I, D>]) -> i32 {
  stages
    .iter()
    .find(|s| s.hooks.execute)
    .map_or(i32::MAX, |s| s.order)
}

/// Builds the handler list for stages already sorted by order:
/// every `execute` hook in ascending order, then the success/fail/complete hooks of each
/// stage in descending order (unwind), then `final`.
pub(crate) fn compile<I, D>(stages: &[StageDef<I, D>]) -> Vec<TaskHandler<I, D>> {
  let mut handlers = Vec::new();
  let last_order = stages.last().map(|s| s.order);
  let executes: Vec<&StageDef<I, D>> = stages.iter().filter(|s| s.hooks.execute).collect();
  for (i, def) in executes.iter().enumerate() {
    let advance_to = match executes.get(i + 1) {
      Some(next) => Some(next.order),
      None => last_order.filter(|&order| order > def.order),
    };
    handlers.push(TaskHandler {
      kind: HookKind::Execute,
      stage: Some((*def).clone()),
      advance_to,
    });
  }

  for def in stages.iter().rev() {
    let unwind = [
      (def.hooks.on_success, HookKind::OnSuccess),
      (def.hooks.on_fail, HookKind::OnFail),
      (def.hooks.on_complete, HookKind::OnComplete),
    ];
    for (declared, kind) in unwind {
      if declared {
        handlers.push(TaskHandler {
          kind,
          stage: Some(def.clone()),
          advance_to: None,
        });
      }
    }
  }

  handlers.push(TaskHandler {
    kind: HookKind::Final,
    stage: None,
    advance_to: None,
  });
  handlers
}

/// Runs user code, turning both `Err` and panics into a printable message.
pub(crate) fn guard_hook<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
  match panic::catch_unwind(AssertUnwindSafe(f)) {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(err)) => Err(format!("{:#}", err)),
    Err(payload) => Err(
      SkeinError::HookPanicked {
        message: panic_message(payload.as_ref()),
      }
      .to_string(),
    ),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Folds a failed asynchronous operation into the container when the callback has no
/// fail sub-path of its own (or after it ran, for framework faults).
pub(crate) fn fold_failure<D>(state: &mut ResultState<D>, origin: HookKind, label: &str, error: &anyhow::Error) {
  match error.downcast_ref::<SkeinError>() {
    Some(SkeinError::SubWorkflowFailed { code, message, .. }) => {
      if state.should_continue() {
        state.fail(*code, message);
      } else {
        state.prepend_message(message);
      }
    }
    Some(SkeinError::Cancelled) => {
      state.record_fault(Fault::Cancelled, &format!("{}: run cancelled", label));
      state.interrupted = true;
    }
    Some(SkeinError::DeadlineExceeded) => {
      state.record_fault(Fault::DeadlineExceeded, &format!("{}: run deadline exceeded", label));
      state.interrupted = true;
    }
    _ => state.record_error(
      origin.forces_error_code(),
      &format!("{} {} failed: {:#}", label, origin, error),
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::stage::{Hooks, Stage};
  use std::sync::Arc;

  struct S(Hooks);

  impl Stage<(), ()> for S {
    fn hooks(&self) -> Hooks {
      self.0
    }
  }

  fn def(order: i32, hooks: Hooks) -> StageDef<(), ()> {
    StageDef::new("w", order, Arc::new(S(hooks)))
  }

  #[test]
  fn compile_orders_executes_then_unwind_then_final() {
    let stages = vec![def(10, Hooks::ALL), def(20, Hooks::EXECUTE), def(30, Hooks::EXECUTE | Hooks::ON_FAIL)];
    let handlers = compile(&stages);
    let layout: Vec<(HookKind, Option<i32>)> = handlers.iter().map(|h| (h.kind(), h.order())).collect();
    assert_eq!(
      layout,
      vec![
        (HookKind::Execute, Some(10)),
        (HookKind::Execute, Some(20)),
        (HookKind::Execute, Some(30)),
        (HookKind::OnFail, Some(30)),
        (HookKind::OnSuccess, Some(10)),
        (HookKind::OnFail, Some(10)),
        (HookKind::OnComplete, Some(10)),
        (HookKind::Final, None),
      ]
    );
    assert_eq!(handlers[0].advance_to(), Some(20));
    assert_eq!(handlers[2].advance_to(), None);
    assert_eq!(first_cursor(&stages), 10);
  }

  #[test]
  fn last_execute_advances_over_trailing_unwind_only_stages() {
    let stages = vec![def(10, Hooks::EXECUTE), def(20, Hooks::ON_COMPLETE)];
    let handlers = compile(&stages);
    assert_eq!(handlers[0].advance_to(), Some(20));
    assert_eq!(first_cursor(&[def(5, Hooks::ON_COMPLETE)]), i32::MAX);
  }

  #[test]
  fn interrupt_failures_become_faults_and_mark_the_run() {
    use crate::core::result::{codes, ResultContainer};

    let container = ResultContainer::new(());
    let mut state = container.lock();
    let error: anyhow::Error = SkeinError::DeadlineExceeded.into();
    fold_failure(&mut state, HookKind::Execute, "fetch", &error);
    assert_eq!(state.code(), codes::DEADLINE_EXCEEDED);
    assert_eq!(state.message(), "fetch: run deadline exceeded");
    assert!(state.interrupted);

    let cancelled: anyhow::Error = SkeinError::Cancelled.into();
    fold_failure(&mut state, HookKind::Execute, "fetch", &cancelled);
    assert_eq!(state.code(), codes::DEADLINE_EXCEEDED);
  }

  #[test]
  fn guard_hook_traps_panics() {
    let err = guard_hook::<()>(|| panic!("exploded")).unwrap_err();
    assert!(err.contains("exploded"));
  }
}
