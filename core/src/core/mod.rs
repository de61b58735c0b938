// skein/src/core/mod.rs

pub mod cancel;
pub mod control;
pub(crate) mod deadline;
pub mod executor;
pub mod gate;
pub mod observer;
pub mod result;
pub mod stage;

// Re-export key types for easier access from other skein modules (and lib.rs)
pub use cancel::CancelToken;
pub use control::{Flow, HookKind, HookResult, Pending};
pub use executor::{Executor, Job, Rejected, TokioExecutor};
pub use observer::{HookObserver, TracingObserver};
pub use result::{codes, Fault, Outcome, ResultContainer, ResultState};
pub use stage::{Hooks, Stage, StageDef};
