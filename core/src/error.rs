// skein/src/error.rs
use anyhow::Error as AnyhowError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
  #[error("Result container already submitted to a chain (workflow '{workflow}')")]
  ContainerReused { workflow: String },

  #[error("Workflow not found: {workflow}")]
  WorkflowNotFound { workflow: String },

  #[error("Duplicate stage order {order} in workflow '{workflow}'")]
  DuplicateOrder { workflow: String, order: i32 },

  #[error("Callback handoff timed out after {waited:?} waiting for the chain to attach")]
  HandoffTimeout { waited: Duration },

  #[error("Callback or combinator is already attached to a run")]
  AlreadyAttached,

  #[error("Callback already belongs to a combinator")]
  AlreadyCombined,

  #[error("Combinator is sealed: children cannot be added after it was attached")]
  CombinatorSealed,

  #[error("Chain future already started")]
  FutureStarted,

  #[error("Run was cancelled")]
  Cancelled,

  #[error("Run deadline exceeded")]
  DeadlineExceeded,

  #[error("Sub-workflow '{workflow}' failed with code {code}: {message}")]
  SubWorkflowFailed { workflow: String, code: i32, message: String },

  #[error("Hook panicked: {message}")]
  HookPanicked { message: String },

  #[error("Error in user-provided hook or external operation. Source: {source}")]
  HookError {
    #[source]
    source: AnyhowError,
  },

  #[error("Configuration error: {0}")]
  Configuration(String),

  #[error("Internal skein error: {0}")]
  Internal(String),
}

impl From<AnyhowError> for SkeinError {
  fn from(err: AnyhowError) -> Self {
    SkeinError::HookError { source: err }
  }
}

pub type SkeinResult<T, E = SkeinError> = std::result::Result<T, E>;
