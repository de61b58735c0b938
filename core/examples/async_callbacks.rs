// skein/examples/async_callbacks.rs

use skein::{
  Callback, Chain, Combinator, Executor, Flow, Hooks, ResultContainer, ResultState, RunOptions, SkeinError, Stage,
  StaticRegistry, TokioExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::info;

#[derive(Debug)]
struct Quote {
  origin: String,
  destination: String,
}

#[derive(Debug, Default)]
struct Offers {
  prices: Vec<u32>,
}

// Asks every carrier in parallel and resumes once all of them answered.
struct AskCarriers {
  carriers: Vec<(&'static str, u32)>,
  runtime: Handle,
  executor: Arc<dyn Executor>,
}

impl Stage<Quote, Offers> for AskCarriers {
  fn name(&self) -> &str {
    "ask_carriers"
  }

  fn hooks(&self) -> Hooks {
    Hooks::EXECUTE | Hooks::ON_COMPLETE
  }

  fn execute(&self, input: &Quote, _result: &mut ResultState<Offers>) -> skein::HookResult<Quote, Offers> {
    let combinator = Combinator::new();
    for (carrier, base) in self.carriers.iter().copied() {
      let callback = Callback::<Quote, Offers, u32>::builder()
        .on_success(move |_, result, price| {
          info!(carrier, price, "Carrier answered.");
          result.data_mut().prices.push(price);
          Ok(())
        })
        .on_fail(move |_, _, err| {
          info!(carrier, error = %err, "Carrier unavailable; skipping.");
          Ok(())
        })
        .executor(self.executor.clone())
        .build();
      combinator.combine(&callback)?;

      let route_len = (input.origin.len() + input.destination.len()) as u32;
      self.runtime.spawn(async move {
        tokio::time::sleep(Duration::from_millis(u64::from(base % 50))).await;
        let delivered = if base == 0 {
          callback.fail(anyhow::anyhow!("{} is closed today", carrier))
        } else {
          callback.succeed(base + route_len)
        };
        if let Err(err) = delivered {
          tracing::error!(error = %err, "Failed to deliver carrier answer.");
        }
      });
    }
    Ok(Flow::wait(combinator))
  }

  fn on_complete(&self, _input: &Quote, result: &mut ResultState<Offers>) -> skein::HookResult<Quote, Offers> {
    result.data_mut().prices.sort_unstable();
    Ok(Flow::Next)
  }
}

fn main() -> Result<(), SkeinError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Async Callbacks Example ---");

  let runtime = Runtime::new().map_err(|e| SkeinError::Internal(e.to_string()))?;
  // Callback sub-paths run on the blocking pool instead of tokio's worker threads.
  let executor: Arc<dyn Executor> = Arc::new(TokioExecutor::new(runtime.handle().clone(), 64));

  let mut registry = StaticRegistry::new();
  registry.add(
    "quote",
    1,
    AskCarriers {
      carriers: vec![("north", 120), ("south", 95), ("harbour", 0)],
      runtime: runtime.handle().clone(),
      executor,
    },
  )?;
  let chain = Chain::builder(registry).runtime(runtime.handle().clone()).build();

  let output = ResultContainer::new(Offers::default());
  let request = Quote {
    origin: "Lyon".to_string(),
    destination: "Porto".to_string(),
  };
  let options = RunOptions::new().timeout(Duration::from_secs(2));
  chain.run_workflow_with("quote", request, &output, options)?;
  info!(finished = output.is_finished(), "run_workflow returned.");

  if !output.wait_finished(Duration::from_secs(5)) {
    return Err(SkeinError::Internal("quote workflow did not finish".to_string()));
  }
  let state = output.lock();
  info!(code = state.code(), prices = ?state.data().prices, "Quotes collected.");
  Ok(())
}
