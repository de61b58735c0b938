// skein/src/core/observer.rs

//! The hook logging sink. The chain reports every hook invocation to a `HookObserver`
//! when `is_logging_enabled()` says so.

use crate::core::control::HookKind;
use crate::core::result::ResultState;
use std::time::Duration;
use tracing::{event, Level};

pub trait HookObserver<I, D>: Send + Sync {
  fn is_logging_enabled(&self) -> bool;

  fn before_hook(&self, stage: &str, hook: HookKind, input: &I, output: &ResultState<D>);

  fn after_hook(&self, stage: &str, hook: HookKind, input: &I, output: &ResultState<D>, elapsed: Duration);
}

/// Default observer: emits `tracing` events on the `skein::hooks` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl<I, D> HookObserver<I, D> for TracingObserver {
  fn is_logging_enabled(&self) -> bool {
    tracing::enabled!(target: "skein::hooks", Level::DEBUG)
  }

  fn before_hook(&self, stage: &str, hook: HookKind, _input: &I, output: &ResultState<D>) {
    event!(
      target: "skein::hooks",
      Level::DEBUG,
      workflow = %output.workflow(),
      %stage,
      %hook,
      task_index = output.task_index(),
      code = output.code(),
      "Hook starting."
    );
  }

  fn after_hook(&self, stage: &str, hook: HookKind, _input: &I, output: &ResultState<D>, elapsed: Duration) {
    event!(
      target: "skein::hooks",
      Level::DEBUG,
      workflow = %output.workflow(),
      %stage,
      %hook,
      code = output.code(),
      elapsed_ms = elapsed.as_millis() as u64,
      "Hook finished."
    );
  }
}
