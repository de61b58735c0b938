// skein/src/lib.rs

//! Skein: a multi-stage service-execution engine with asynchronous continuations.
//!
//! Skein runs ordered lists of stages ("workflows") where every stage contributes up to four
//! hooks:
//!  - `execute`, run in ascending stage order while the workflow keeps succeeding.
//!  - `on_success`, `on_fail` and `on_complete`, run in descending order as the workflow unwinds.
//!
//! Any hook may finish synchronously or hand back pending work (a `Callback`, or a
//! `Combinator` fanning in several callbacks). The chain then suspends and is resumed by
//! whichever thread completes that work, exactly once.

pub mod callback;
pub mod chain;
pub mod config;
pub mod core;
pub mod error;
pub mod registry;

// --- Re-exports for the Public API ---

pub use crate::core::cancel::CancelToken;
pub use crate::core::control::{Flow, HookKind, HookResult, Pending};
pub use crate::core::executor::{Executor, Job, Rejected, TokioExecutor};
pub use crate::core::observer::{HookObserver, TracingObserver};
pub use crate::core::result::{codes, Fault, Outcome, ResultContainer, ResultState};
pub use crate::core::stage::{Hooks, Stage, StageDef};

pub use crate::callback::{Callback, CallbackBuilder, Combinator};
pub use crate::chain::{Chain, ChainBuilder, ChainFuture, TaskHandler};
pub use crate::config::{ChainConfig, RunOptions};
pub use crate::error::{SkeinError, SkeinResult};
pub use crate::registry::{StageRegistry, StaticRegistry};

/*
    Core Workflow:
    1. Implement `Stage<I, D>` for each business unit; declare its hooks with `Hooks`.
    2. Register stages per workflow name in a `StaticRegistry` (or your own `StageRegistry`).
    3. Build a `Chain` over the registry.
    4. For every request create a fresh `ResultContainer<D>` and call
       `chain.run_workflow("name", input, &container)`.
    5. A hook that starts asynchronous work builds a callback (`chain.callback()` or
       `Callback::builder()`), hands a clone to the external system, and returns
       `Ok(Flow::wait(callback))`. The external system later calls `succeed`, `fail` or
       `complete`.
    6. Wait for the terminal step with `container.wait_finished(timeout)` or a finish sink in
       `RunOptions`.
*/
