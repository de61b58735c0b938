// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use skein::{
  Callback, Chain, Flow, HookKind, HookObserver, HookResult, Hooks, ResultContainer, ResultState, Stage,
  StaticRegistry,
};
use parking_lot::Mutex;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use tracing::Level;

// --- Common Input / Payload ---
#[derive(Clone, Debug, Default)]
pub struct TestInput {
  pub request_id: u32,
}

#[derive(Clone, Debug, Default)]
pub struct TestData {
  pub log: Vec<String>,
  pub value: i64,
}

pub type TestChain = Chain<TestInput, TestData>;
pub type TestCallback<R = ()> = Callback<TestInput, TestData, R>;
pub type TestResult = HookResult<TestInput, TestData>;

pub const WAIT: Duration = Duration::from_secs(5);

// --- Scripted stage: records every hook, optionally runs a custom `execute` ---
type ExecuteFn = Arc<dyn Fn(&TestInput, &mut ResultState<TestData>) -> TestResult + Send + Sync>;

pub struct ScriptedStage {
  name: String,
  hooks: Hooks,
  execute: Option<ExecuteFn>,
}

impl ScriptedStage {
  pub fn with_execute(
    mut self,
    f: impl Fn(&TestInput, &mut ResultState<TestData>) -> TestResult + Send + Sync + 'static,
  ) -> Self {
    self.execute = Some(Arc::new(f));
    self
  }

  fn record(&self, hook: &str, result: &mut ResultState<TestData>) {
    let entry = format!("{}.{}", self.name, hook);
    tracing::debug!(target: "test_stages", %entry, code = result.code(), "hook ran");
    result.data_mut().log.push(entry);
    HOOK_EXEC_COUNTER.fetch_add(1, Ordering::SeqCst);
  }
}

impl Stage<TestInput, TestData> for ScriptedStage {
  fn name(&self) -> &str {
    &self.name
  }

  fn hooks(&self) -> Hooks {
    self.hooks
  }

  fn execute(&self, input: &TestInput, result: &mut ResultState<TestData>) -> TestResult {
    self.record("execute", result);
    match &self.execute {
      Some(f) => f(input, result),
      None => Ok(Flow::Next),
    }
  }

  fn on_success(&self, _input: &TestInput, result: &mut ResultState<TestData>) -> TestResult {
    self.record("on_success", result);
    Ok(Flow::Next)
  }

  fn on_fail(&self, _input: &TestInput, result: &mut ResultState<TestData>) -> TestResult {
    self.record("on_fail", result);
    Ok(Flow::Next)
  }

  fn on_complete(&self, _input: &TestInput, result: &mut ResultState<TestData>) -> TestResult {
    self.record("on_complete", result);
    Ok(Flow::Next)
  }
}

pub fn recording(name: &str, hooks: Hooks) -> ScriptedStage {
  ScriptedStage {
    name: name.to_string(),
    hooks,
    execute: None,
  }
}

pub fn registry_of(workflow: &str, stages: Vec<(i32, ScriptedStage)>) -> StaticRegistry<TestInput, TestData> {
  let mut registry = StaticRegistry::new();
  registry.declare(workflow);
  for (order, stage) in stages {
    registry.add(workflow, order, stage).expect("unique stage orders");
  }
  registry
}

pub fn new_output() -> ResultContainer<TestData> {
  ResultContainer::new(TestData::default())
}

pub fn log_of(output: &ResultContainer<TestData>) -> Vec<String> {
  output.lock().data().log.clone()
}

pub fn count_in(log: &[String], entry: &str) -> usize {
  log.iter().filter(|e| e.as_str() == entry).count()
}

// --- Hand-off slot for callbacks created inside hooks ---
pub type Slot<T> = Arc<Mutex<Vec<T>>>;

pub fn new_slot<T>() -> Slot<T> {
  Arc::new(Mutex::new(Vec::new()))
}

pub fn take_one<T>(slot: &Slot<T>) -> T {
  slot.lock().remove(0)
}

// --- Observer capturing the task cursor seen by every hook ---
#[derive(Clone, Default)]
pub struct CursorObserver {
  pub seen: Arc<Mutex<Vec<(String, HookKind, usize)>>>,
}

impl HookObserver<TestInput, TestData> for CursorObserver {
  fn is_logging_enabled(&self) -> bool {
    true
  }

  fn before_hook(&self, stage: &str, hook: HookKind, _input: &TestInput, output: &ResultState<TestData>) {
    self.seen.lock().push((stage.to_string(), hook, output.task_index()));
  }

  fn after_hook(
    &self,
    _stage: &str,
    _hook: HookKind,
    _input: &TestInput,
    _output: &ResultState<TestData>,
    _elapsed: Duration,
  ) {
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Atomic counters for checking execution counts ---
pub static HOOK_EXEC_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));
pub static SEQUENCE: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn reset_counters() {
  HOOK_EXEC_COUNTER.store(0, Ordering::SeqCst);
  SEQUENCE.store(0, Ordering::SeqCst);
}
