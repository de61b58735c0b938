// skein/examples/sub_workflow.rs

use skein::{
  Callback, Chain, ChainFuture, Flow, HookResult, Hooks, ResultContainer, ResultState, SkeinResult, Stage,
  StaticRegistry,
};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct Shipment {
  parcels: u32,
}

#[derive(Debug, Default)]
struct Label {
  weight: u32,
  tracking: Option<String>,
}

// --- Inner workflow: weighs the parcels ---
struct Weigh;

impl Stage<Shipment, Label> for Weigh {
  fn name(&self) -> &str {
    "weigh"
  }

  fn execute(&self, input: &Shipment, result: &mut ResultState<Label>) -> HookResult<Shipment, Label> {
    if input.parcels == 0 {
      result.fail(422, "nothing to ship");
    } else {
      result.data_mut().weight = input.parcels * 3;
    }
    Ok(Flow::Next)
  }
}

// --- Outer workflow: runs the inner one as a sub-step, then prints a label ---
struct WeighFirst {
  scales: Chain<Shipment, Label>,
}

impl Stage<Shipment, Label> for WeighFirst {
  fn name(&self) -> &str {
    "weigh_first"
  }

  fn execute(&self, input: &Shipment, _result: &mut ResultState<Label>) -> HookResult<Shipment, Label> {
    let on_weighed = Callback::<Shipment, Label, ResultContainer<Label>>::builder().on_success(|_, result, weighed| {
      result.data_mut().weight = weighed.lock().data().weight;
      Ok(())
    });
    let callback = self.scales.run_sub_workflow(
      "weigh",
      input.clone(),
      &ResultContainer::new(Label::default()),
      on_weighed,
    )?;
    Ok(Flow::wait(callback))
  }
}

struct PrintLabel;

impl Stage<Shipment, Label> for PrintLabel {
  fn name(&self) -> &str {
    "print_label"
  }

  fn hooks(&self) -> Hooks {
    Hooks::EXECUTE | Hooks::ON_FAIL
  }

  fn execute(&self, _input: &Shipment, result: &mut ResultState<Label>) -> HookResult<Shipment, Label> {
    let weight = result.data().weight;
    result.data_mut().tracking = Some(format!("TRK-{:04}", weight));
    Ok(Flow::Next)
  }

  fn on_fail(&self, _input: &Shipment, result: &mut ResultState<Label>) -> HookResult<Shipment, Label> {
    result.data_mut().tracking = None;
    Ok(Flow::Next)
  }
}

fn main() -> SkeinResult<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Sub-Workflow Example ---");

  let mut inner = StaticRegistry::new();
  inner.add("weigh", 1, Weigh)?;
  let scales = Chain::new(inner);

  let mut outer = StaticRegistry::new();
  outer.add("ship", 1, WeighFirst { scales })?;
  outer.add("ship", 2, PrintLabel)?;
  let chain = Chain::new(outer);

  // Three shipments, one after the other.
  let future = ChainFuture::new("ship");
  for parcels in [2, 0, 5] {
    future.init(&chain, Shipment { parcels }, ResultContainer::new(Label::default()))?;
  }
  future.start()?;
  future.wait_end(Duration::from_secs(5));

  for (leg, output) in future.outputs().iter().enumerate() {
    let state = output.lock();
    info!(
      leg,
      code = state.code(),
      message = state.message(),
      weight = state.data().weight,
      tracking = ?state.data().tracking,
      "Shipment processed."
    );
  }
  Ok(())
}
