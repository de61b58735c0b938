// skein/src/chain/definition.rs

//! Defines `Chain<I, D>`, the entry point for running workflows, and its builder.
//!
//! A chain resolves each workflow's stage list from its `StageRegistry` the first time the
//! workflow runs, compiles it into a task-handler list and caches the result. Compiled lists
//! are immutable and shared by every run of that workflow.

use crate::callback::{Callback, CallbackBuilder};
use crate::chain::execution::Run;
use crate::chain::handler::{compile, first_cursor, TaskHandler};
use crate::config::{ChainConfig, RunOptions};
use crate::core::deadline::DeadlineWatch;
use crate::core::executor::Executor;
use crate::core::observer::{HookObserver, TracingObserver};
use crate::core::result::ResultContainer;
use crate::error::{SkeinError, SkeinResult};
use crate::registry::{normalize_stages, StageRegistry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{event, instrument, Level};

pub(crate) struct CompiledWorkflow<I, D> {
  pub(crate) name: Arc<str>,
  pub(crate) handlers: Arc<[TaskHandler<I, D>]>,
  pub(crate) first_cursor: i32,
}

struct ChainInner<I, D> {
  registry: Arc<dyn StageRegistry<I, D>>,
  compiled: RwLock<HashMap<String, Arc<CompiledWorkflow<I, D>>>>,
  config: ChainConfig,
  observer: Arc<dyn HookObserver<I, D>>,
  runtime: Option<Handle>,
}

/// Runs named workflows. Cheap to clone; clones share the compiled workflows.
pub struct Chain<I, D> {
  inner: Arc<ChainInner<I, D>>,
}

impl<I, D> Clone for Chain<I, D> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<I, D> fmt::Debug for Chain<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let compiled: Vec<String> = self.inner.compiled.read().keys().cloned().collect();
    f.debug_struct("Chain")
      .field("config", &self.inner.config)
      .field("compiled_workflows", &compiled)
      .finish()
  }
}

pub struct ChainBuilder<I, D> {
  registry: Arc<dyn StageRegistry<I, D>>,
  config: ChainConfig,
  observer: Arc<dyn HookObserver<I, D>>,
  runtime: Option<Handle>,
}

impl<I, D> ChainBuilder<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  pub fn config(mut self, config: ChainConfig) -> Self {
    self.config = config;
    self
  }

  pub fn observer(mut self, observer: impl HookObserver<I, D> + 'static) -> Self {
    self.observer = Arc::new(observer);
    self
  }

  /// Runtime for deadline timers. Without one, a shared timer runtime is used.
  pub fn runtime(mut self, runtime: Handle) -> Self {
    self.runtime = Some(runtime);
    self
  }

  pub fn build(self) -> Chain<I, D> {
    Chain {
      inner: Arc::new(ChainInner {
        registry: self.registry,
        compiled: RwLock::new(HashMap::new()),
        config: self.config,
        observer: self.observer,
        runtime: self.runtime,
      }),
    }
  }
}

impl<I, D> fmt::Debug for ChainBuilder<I, D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChainBuilder").field("config", &self.config).finish()
  }
}

impl<I, D> Chain<I, D>
where
  I: Send + Sync + 'static,
  D: Send + 'static,
{
  /// A chain with the default configuration and the tracing observer.
  pub fn new(registry: impl StageRegistry<I, D> + 'static) -> Self {
    Self::builder(registry).build()
  }

  pub fn builder(registry: impl StageRegistry<I, D> + 'static) -> ChainBuilder<I, D> {
    Self::builder_shared(Arc::new(registry))
  }

  /// Builder over a registry shared with other owners.
  pub fn builder_shared(registry: Arc<dyn StageRegistry<I, D>>) -> ChainBuilder<I, D> {
    ChainBuilder {
      registry,
      config: ChainConfig::default(),
      observer: Arc::new(TracingObserver),
      runtime: None,
    }
  }

  pub fn config(&self) -> &ChainConfig {
    &self.inner.config
  }

  pub(crate) fn observer(&self) -> &dyn HookObserver<I, D> {
    self.inner.observer.as_ref()
  }

  pub(crate) fn runtime(&self) -> Option<&Handle> {
    self.inner.runtime.as_ref()
  }

  /// Workflows the registry can enumerate.
  pub fn workflows(&self) -> Vec<String> {
    self.inner.registry.workflows()
  }

  /// The compiled task-handler list for `workflow`, compiling it on first use.
  pub fn task_handlers(&self, workflow: &str) -> SkeinResult<Arc<[TaskHandler<I, D>]>> {
    Ok(Arc::clone(&self.compiled(workflow)?.handlers))
  }

  pub(crate) fn compiled(&self, workflow: &str) -> SkeinResult<Arc<CompiledWorkflow<I, D>>> {
    if let Some(compiled) = self.inner.compiled.read().get(workflow) {
      return Ok(Arc::clone(compiled));
    }

    let mut stages = self
      .inner
      .registry
      .list_stages(workflow)
      .ok_or_else(|| SkeinError::WorkflowNotFound {
        workflow: workflow.to_string(),
      })?;
    normalize_stages(workflow, &mut stages)?;
    let handlers = compile(&stages);
    event!(
      Level::DEBUG,
      %workflow,
      stages = stages.len(),
      handlers = handlers.len(),
      "Compiled workflow."
    );
    let compiled = Arc::new(CompiledWorkflow {
      name: Arc::from(workflow),
      handlers: handlers.into(),
      first_cursor: first_cursor(&stages),
    });

    let mut cache = self.inner.compiled.write();
    Ok(Arc::clone(cache.entry(workflow.to_string()).or_insert(compiled)))
  }

  /// A callback builder preset with this chain's handoff timeout.
  pub fn callback<R: Send + 'static>(&self) -> CallbackBuilder<I, D, R> {
    CallbackBuilder::new().timeout(self.inner.config.handoff_timeout)
  }

  /// Runs `workflow` against `output`. Returns once the run finished or suspended on
  /// pending work; use `ResultContainer::wait_finished` to wait for the terminal step.
  pub fn run_workflow(&self, workflow: &str, input: impl Into<Arc<I>>, output: &ResultContainer<D>) -> SkeinResult<()> {
    self.run_workflow_with(workflow, input, output, RunOptions::default())
  }

  /// Like `run_workflow`, with a cancel token, deadline or finish sink.
  ///
  /// Errors are reserved for misuse: an unknown workflow, an invalid stage list, or a
  /// container that was already submitted. Hook failures end up in the container.
  #[instrument(
    name = "Chain::run_workflow_with",
    skip_all,
    fields(workflow = %workflow),
    err(Display)
  )]
  pub fn run_workflow_with(
    &self,
    workflow: &str,
    input: impl Into<Arc<I>>,
    output: &ResultContainer<D>,
    options: RunOptions<D>,
  ) -> SkeinResult<()> {
    let compiled = self.compiled(workflow)?;
    if !output.claim() {
      event!(Level::ERROR, "Result container submitted twice.");
      return Err(SkeinError::ContainerReused {
        workflow: workflow.to_string(),
      });
    }
    {
      let mut state = output.lock();
      state.workflow = workflow.to_string();
      state.task_index = 0;
      state.success_cursor = compiled.first_cursor;
      state.set_separator(&self.inner.config.message_separator);
    }
    if let Some(hook) = options.on_finish {
      output.set_finish_hook(hook);
    }

    event!(Level::DEBUG, handlers = compiled.handlers.len(), "Workflow starting.");
    let run = Run {
      chain: self.clone(),
      workflow: compiled,
      input: input.into(),
      output: output.clone(),
      cancel: options.cancel,
      deadline: options.deadline.map(DeadlineWatch::new),
    };
    run.drive();
    Ok(())
  }

  /// Runs `workflow` as a sub-step of an outer run. The returned callback succeeds with the
  /// sub-run's container when it finishes successfully, and fails with
  /// `SkeinError::SubWorkflowFailed` otherwise.
  pub fn run_workflow_with_callback<OI, OD>(
    &self,
    workflow: &str,
    input: impl Into<Arc<I>>,
    output: &ResultContainer<D>,
    executor: Option<Arc<dyn Executor>>,
    timeout: Option<Duration>,
  ) -> SkeinResult<Callback<OI, OD, ResultContainer<D>>>
  where
    OI: Send + Sync + 'static,
    OD: Send + 'static,
  {
    let mut builder = CallbackBuilder::new().timeout(timeout.unwrap_or(self.inner.config.handoff_timeout));
    if let Some(executor) = executor {
      builder = builder.executor(executor);
    }
    self.run_sub_workflow(workflow, input, output, builder)
  }

  /// Like `run_workflow_with_callback`, with caller-supplied sub-paths on the callback.
  pub fn run_sub_workflow<OI, OD>(
    &self,
    workflow: &str,
    input: impl Into<Arc<I>>,
    output: &ResultContainer<D>,
    builder: CallbackBuilder<OI, OD, ResultContainer<D>>,
  ) -> SkeinResult<Callback<OI, OD, ResultContainer<D>>>
  where
    OI: Send + Sync + 'static,
    OD: Send + 'static,
  {
    let callback = builder.build();
    let sink = callback.clone();
    let name = workflow.to_string();
    let options = RunOptions::new().on_finish(move |container: &ResultContainer<D>| {
      let (success, code, message) = {
        let state = container.lock();
        (state.is_success(), state.code(), state.message().to_string())
      };
      let delivered = if success {
        sink.succeed(container.clone())
      } else {
        sink.fail(SkeinError::SubWorkflowFailed {
          workflow: name,
          code,
          message,
        })
      };
      if let Err(err) = delivered {
        event!(Level::ERROR, error = %err, "Failed to deliver sub-workflow result.");
      }
    });
    self.run_workflow_with(workflow, input, output, options)?;
    Ok(callback)
  }
}
