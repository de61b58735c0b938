// skein/src/core/stage.rs

//! Defines the `Stage` trait implemented by business units and the registration record
//! (`StageDef`) that places a stage at an order within a workflow.

use crate::core::control::{Flow, HookResult};
use crate::core::result::ResultState;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Capability flags: which hooks a stage takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hooks {
  pub execute: bool,
  pub on_success: bool,
  pub on_fail: bool,
  pub on_complete: bool,
}

impl Hooks {
  pub const NONE: Hooks = Hooks {
    execute: false,
    on_success: false,
    on_fail: false,
    on_complete: false,
  };
  pub const EXECUTE: Hooks = Hooks {
    execute: true,
    ..Hooks::NONE
  };
  pub const ON_SUCCESS: Hooks = Hooks {
    on_success: true,
    ..Hooks::NONE
  };
  pub const ON_FAIL: Hooks = Hooks {
    on_fail: true,
    ..Hooks::NONE
  };
  pub const ON_COMPLETE: Hooks = Hooks {
    on_complete: true,
    ..Hooks::NONE
  };
  pub const ALL: Hooks = Hooks {
    execute: true,
    on_success: true,
    on_fail: true,
    on_complete: true,
  };
}

impl BitOr for Hooks {
  type Output = Hooks;

  fn bitor(self, rhs: Hooks) -> Hooks {
    Hooks {
      execute: self.execute || rhs.execute,
      on_success: self.on_success || rhs.on_success,
      on_fail: self.on_fail || rhs.on_fail,
      on_complete: self.on_complete || rhs.on_complete,
    }
  }
}

/// A unit of business logic contributing up to four hooks to a workflow.
///
/// `I` is the read-only input shared by every hook of a run; `D` is the business payload
/// stored in the result container. Every hook either finishes synchronously
/// (`Ok(Flow::Next)`) or hands back a pending `Callback`/`Combinator` (`Ok(Flow::Await(..))`).
/// Business failures are recorded with `ResultState::fail`; returning `Err` is reserved for
/// unexpected errors.
///
/// Only the hooks listed by `hooks()` are ever called.
pub trait Stage<I, D>: Send + Sync + 'static {
  fn name(&self) -> &str {
    std::any::type_name::<Self>()
  }

  fn hooks(&self) -> Hooks {
    Hooks::EXECUTE
  }

  fn execute(&self, _input: &I, _result: &mut ResultState<D>) -> HookResult<I, D> {
    Ok(Flow::Next)
  }

  fn on_success(&self, _input: &I, _result: &mut ResultState<D>) -> HookResult<I, D> {
    Ok(Flow::Next)
  }

  fn on_fail(&self, _input: &I, _result: &mut ResultState<D>) -> HookResult<I, D> {
    Ok(Flow::Next)
  }

  fn on_complete(&self, _input: &I, _result: &mut ResultState<D>) -> HookResult<I, D> {
    Ok(Flow::Next)
  }
}

/// A stage registered at a fixed `order` within one workflow.
pub struct StageDef<I, D> {
  pub workflow: String,
  pub order: i32,
  pub hooks: Hooks,
  pub stage: Arc<dyn Stage<I, D>>,
}

impl<I: 'static, D: 'static> StageDef<I, D> {
  /// Registers `stage` with the hooks it declares.
  pub fn new(workflow: impl Into<String>, order: i32, stage: Arc<dyn Stage<I, D>>) -> Self {
    let hooks = stage.hooks();
    Self {
      workflow: workflow.into(),
      order,
      hooks,
      stage,
    }
  }

  /// Overrides the declared hooks.
  pub fn with_hooks(mut self, hooks: Hooks) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn name(&self) -> &str {
    self.stage.name()
  }
}

impl<I, D> Clone for StageDef<I, D> {
  fn clone(&self) -> Self {
    Self {
      workflow: self.workflow.clone(),
      order: self.order,
      hooks: self.hooks,
      stage: Arc::clone(&self.stage),
    }
  }
}

// The stage itself is a trait object without Debug; print its name instead.
impl<I: 'static, D: 'static> fmt::Debug for StageDef<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StageDef")
      .field("workflow", &self.workflow)
      .field("order", &self.order)
      .field("name", &self.name())
      .field("hooks", &self.hooks)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Audit;

  impl Stage<String, Vec<String>> for Audit {
    fn name(&self) -> &str {
      "audit"
    }

    fn hooks(&self) -> Hooks {
      Hooks::EXECUTE | Hooks::ON_COMPLETE
    }
  }

  #[test]
  fn stage_def_takes_name_and_hooks_from_the_stage() {
    let def = StageDef::new("checkout", 7, Arc::new(Audit));
    assert_eq!(def.name(), "audit");
    assert_eq!(def.hooks, Hooks::EXECUTE | Hooks::ON_COMPLETE);

    let narrowed = def.clone().with_hooks(Hooks::EXECUTE);
    assert_eq!(narrowed.hooks, Hooks::EXECUTE);
    assert!(format!("{:?}", narrowed).contains("audit"));
  }
}
