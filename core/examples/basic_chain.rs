// skein/examples/basic_chain.rs

use skein::{Chain, Flow, HookResult, Hooks, ResultContainer, ResultState, SkeinResult, Stage, StaticRegistry};
use tracing::info;

// 1. Define the request and the payload the stages fill in
#[derive(Debug)]
struct Order {
  sku: String,
  quantity: u32,
}

#[derive(Debug, Default)]
struct Checkout {
  log: Vec<String>,
  reserved: u32,
}

// 2. Stages: each one opts into the hooks it implements
struct Reserve;

impl Stage<Order, Checkout> for Reserve {
  fn name(&self) -> &str {
    "reserve"
  }

  fn hooks(&self) -> Hooks {
    Hooks::EXECUTE | Hooks::ON_FAIL
  }

  fn execute(&self, input: &Order, result: &mut ResultState<Checkout>) -> HookResult<Order, Checkout> {
    result.data_mut().reserved = input.quantity;
    result.data_mut().log.push(format!("reserved {} x {}", input.quantity, input.sku));
    Ok(Flow::Next)
  }

  fn on_fail(&self, input: &Order, result: &mut ResultState<Checkout>) -> HookResult<Order, Checkout> {
    // Rollback: a later stage failed.
    result.data_mut().reserved = 0;
    result.data_mut().log.push(format!("released {}", input.sku));
    Ok(Flow::Next)
  }
}

struct Charge {
  limit: u32,
}

impl Stage<Order, Checkout> for Charge {
  fn name(&self) -> &str {
    "charge"
  }

  fn hooks(&self) -> Hooks {
    Hooks::EXECUTE | Hooks::ON_COMPLETE
  }

  fn execute(&self, input: &Order, result: &mut ResultState<Checkout>) -> HookResult<Order, Checkout> {
    if input.quantity > self.limit {
      result.fail(402, format!("quantity {} over limit {}", input.quantity, self.limit));
      return Ok(Flow::Next);
    }
    result.data_mut().log.push("charged".to_string());
    Ok(Flow::Next)
  }

  fn on_complete(&self, _input: &Order, result: &mut ResultState<Checkout>) -> HookResult<Order, Checkout> {
    let code = result.code();
    result.data_mut().log.push(format!("receipt (code {})", code));
    Ok(Flow::Next)
  }
}

fn main() -> SkeinResult<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Chain Example ---");

  // 3. Register the stages under one workflow, ordered by their order number
  let mut registry = StaticRegistry::new();
  registry.add("checkout", 10, Reserve)?;
  registry.add("checkout", 20, Charge { limit: 5 })?;
  let chain = Chain::new(registry);

  // 4. Run it twice: once within the limit, once over it
  for quantity in [2, 9] {
    let output = ResultContainer::new(Checkout::default());
    let order = Order {
      sku: "sku-42".to_string(),
      quantity,
    };
    chain.run_workflow("checkout", order, &output)?;

    let state = output.lock();
    info!(
      quantity,
      code = state.code(),
      message = state.message(),
      reserved = state.data().reserved,
      "Checkout finished."
    );
    for line in &state.data().log {
      info!("  {}", line);
    }
  }

  Ok(())
}
