// skein/src/registry.rs

//! Defines the `StageRegistry<I, D>` boundary the chain reads its stage lists from, and
//! `StaticRegistry<I, D>`, an in-memory registry populated at start-up.
//!
//! The chain asks the registry once per workflow name and caches the compiled
//! task-handler list, so registries are free to be slow or to build lists on demand.

use crate::core::stage::{Stage, StageDef};
use crate::error::{SkeinError, SkeinResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

/// Source of ordered stage lists, one per workflow name.
pub trait StageRegistry<I, D>: Send + Sync {
  /// Returns the stages registered for `workflow`, or `None` if the workflow is unknown.
  /// The chain sorts the list by `order` and rejects duplicate orders.
  fn list_stages(&self, workflow: &str) -> Option<Vec<StageDef<I, D>>>;

  /// Names of the workflows this registry knows about, if it can enumerate them.
  fn workflows(&self) -> Vec<String> {
    Vec::new()
  }
}

/// Sorts `stages` by order and rejects duplicates within the workflow.
pub(crate) fn normalize_stages<I, D>(workflow: &str, stages: &mut [StageDef<I, D>]) -> SkeinResult<()> {
  stages.sort_by_key(|s| s.order);
  if let Some(pair) = stages.windows(2).find(|pair| pair[0].order == pair[1].order) {
    event!(Level::ERROR, %workflow, order = pair[0].order, "Duplicate stage order.");
    return Err(SkeinError::DuplicateOrder {
      workflow: workflow.to_string(),
      order: pair[0].order,
    });
  }
  Ok(())
}

/// In-memory registry. Stages are kept sorted by order as they are added.
pub struct StaticRegistry<I, D> {
  workflows: HashMap<String, Vec<StageDef<I, D>>>,
}

impl<I, D> Default for StaticRegistry<I, D> {
  fn default() -> Self {
    Self {
      workflows: HashMap::new(),
    }
  }
}

impl<I, D> StaticRegistry<I, D>
where
  I: 'static,
  D: 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `stage` at `order` in `workflow` with the hooks the stage declares.
  pub fn add(&mut self, workflow: &str, order: i32, stage: impl Stage<I, D>) -> SkeinResult<&mut Self> {
    self.register(StageDef::new(workflow, order, Arc::new(stage)))
  }

  pub fn register(&mut self, def: StageDef<I, D>) -> SkeinResult<&mut Self> {
    let stages = self.workflows.entry(def.workflow.clone()).or_default();
    match stages.binary_search_by_key(&def.order, |s| s.order) {
      Ok(_) => {
        event!(Level::ERROR, workflow = %def.workflow, order = def.order, "Duplicate stage order.");
        return Err(SkeinError::DuplicateOrder {
          workflow: def.workflow,
          order: def.order,
        });
      }
      Err(pos) => {
        event!(Level::DEBUG, workflow = %def.workflow, order = def.order, stage = %def.name(), "Registering stage.");
        stages.insert(pos, def);
      }
    }
    Ok(self)
  }

  /// Registers an empty workflow: it runs only the synthetic final handler.
  pub fn declare(&mut self, workflow: &str) -> &mut Self {
    self.workflows.entry(workflow.to_string()).or_default();
    self
  }

  pub fn stage_count(&self, workflow: &str) -> usize {
    self.workflows.get(workflow).map_or(0, Vec::len)
  }
}

impl<I, D> StageRegistry<I, D> for StaticRegistry<I, D> {
  fn list_stages(&self, workflow: &str) -> Option<Vec<StageDef<I, D>>> {
    self.workflows.get(workflow).cloned()
  }

  fn workflows(&self) -> Vec<String> {
    let mut names: Vec<String> = self.workflows.keys().cloned().collect();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::stage::Hooks;

  struct Named(&'static str);

  impl Stage<(), ()> for Named {
    fn name(&self) -> &str {
      self.0
    }

    fn hooks(&self) -> Hooks {
      Hooks::EXECUTE | Hooks::ON_COMPLETE
    }
  }

  #[test]
  fn keeps_stages_sorted_by_order() {
    let mut registry = StaticRegistry::<(), ()>::new();
    registry.add("checkout", 30, Named("ship")).unwrap();
    registry.add("checkout", 10, Named("reserve")).unwrap();
    registry.add("checkout", 20, Named("charge")).unwrap();

    let stages = registry.list_stages("checkout").unwrap();
    let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["reserve", "charge", "ship"]);
    assert_eq!(stages[0].hooks, Hooks::EXECUTE | Hooks::ON_COMPLETE);
  }

  #[test]
  fn rejects_duplicate_order() {
    let mut registry = StaticRegistry::<(), ()>::new();
    registry.add("checkout", 10, Named("a")).unwrap();
    let err = registry.add("checkout", 10, Named("b")).err().unwrap();
    assert!(matches!(err, SkeinError::DuplicateOrder { order: 10, .. }));
  }

  #[test]
  fn unknown_workflow_is_none_and_declared_is_empty() {
    let mut registry = StaticRegistry::<(), ()>::new();
    registry.declare("noop");
    assert!(registry.list_stages("missing").is_none());
    assert_eq!(registry.list_stages("noop").unwrap().len(), 0);
    assert_eq!(registry.workflows(), vec!["noop".to_string()]);
  }

  #[test]
  fn normalize_sorts_and_detects_duplicates() {
    let mut stages = vec![
      StageDef::<(), ()>::new("w", 2, Arc::new(Named("b"))),
      StageDef::<(), ()>::new("w", 1, Arc::new(Named("a"))),
    ];
    normalize_stages("w", &mut stages).unwrap();
    assert_eq!(stages[0].order, 1);

    stages.push(StageDef::new("w", 1, Arc::new(Named("c"))));
    assert!(normalize_stages("w", &mut stages).is_err());
  }
}
