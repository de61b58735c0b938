// skein/src/config.rs

//! Chain-wide configuration and per-run options.
//!
//! `ChainConfig::from_env()` overlays environment variables on the defaults:
//! - `SKEIN_HANDOFF_TIMEOUT_MS`: bound for a resuming thread waiting on the handoff gate
//! - `SKEIN_LOG_HOOKS`: `true`/`false`, gates the hook observer

use crate::core::cancel::CancelToken;
use crate::core::result::{FinishHook, ResultContainer, DEFAULT_SEPARATOR};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{event, Level};

pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_HANDOFF_TIMEOUT_MS: &str = "SKEIN_HANDOFF_TIMEOUT_MS";
pub const ENV_LOG_HOOKS: &str = "SKEIN_LOG_HOOKS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
  /// How long a callback's resuming thread waits for the chain to attach.
  pub handoff_timeout: Duration,
  /// Master switch for the hook observer.
  pub log_hooks: bool,
  /// Joins failure messages in a result container.
  pub message_separator: String,
}

impl Default for ChainConfig {
  fn default() -> Self {
    Self {
      handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
      log_hooks: true,
      message_separator: DEFAULT_SEPARATOR.to_string(),
    }
  }
}

impl ChainConfig {
  pub fn from_env() -> Self {
    Self::default().overlay(|key| std::env::var(key).ok())
  }

  pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
    self.handoff_timeout = timeout;
    self
  }

  pub fn log_hooks(mut self, enabled: bool) -> Self {
    self.log_hooks = enabled;
    self
  }

  pub fn message_separator(mut self, separator: impl Into<String>) -> Self {
    self.message_separator = separator.into();
    self
  }

  fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(raw) = lookup(ENV_HANDOFF_TIMEOUT_MS) {
      match raw.trim().parse::<u64>() {
        Ok(ms) => self.handoff_timeout = Duration::from_millis(ms),
        Err(_) => event!(Level::WARN, value = %raw, "Ignoring invalid {}.", ENV_HANDOFF_TIMEOUT_MS),
      }
    }
    if let Some(raw) = lookup(ENV_LOG_HOOKS) {
      match parse_bool(&raw) {
        Some(enabled) => self.log_hooks = enabled,
        None => event!(Level::WARN, value = %raw, "Ignoring invalid {}.", ENV_LOG_HOOKS),
      }
    }
    self
  }
}

fn parse_bool(s: &str) -> Option<bool> {
  match s.trim().to_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

/// Options for a single workflow invocation.
pub struct RunOptions<D> {
  pub(crate) cancel: Option<CancelToken>,
  pub(crate) deadline: Option<Instant>,
  pub(crate) on_finish: Option<FinishHook<D>>,
}

impl<D: Send + 'static> Default for RunOptions<D> {
  fn default() -> Self {
    Self {
      cancel: None,
      deadline: None,
      on_finish: None,
    }
  }
}

impl<D: Send + 'static> RunOptions<D> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel_token(mut self, token: CancelToken) -> Self {
    self.cancel = Some(token);
    self
  }

  /// Checked at every step boundary, and enforced by a timer while the run is suspended.
  /// A run past its deadline is marked `DEADLINE_EXCEEDED` and unwinds.
  pub fn deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn timeout(self, timeout: Duration) -> Self {
    self.deadline(Instant::now() + timeout)
  }

  /// Called once, on the thread that runs the terminal step.
  pub fn on_finish(mut self, hook: impl FnOnce(&ResultContainer<D>) + Send + 'static) -> Self {
    self.on_finish = Some(Box::new(hook));
    self
  }
}

impl<D: Send + 'static> fmt::Debug for RunOptions<D> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunOptions")
      .field("cancel", &self.cancel)
      .field("deadline", &self.deadline)
      .field("on_finish_present", &self.on_finish.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn overlay_with(vars: &[(&str, &str)]) -> ChainConfig {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    ChainConfig::default().overlay(|key| vars.get(key).cloned())
  }

  #[test]
  fn env_overrides_defaults() {
    let config = overlay_with(&[(ENV_HANDOFF_TIMEOUT_MS, "250"), (ENV_LOG_HOOKS, "off")]);
    assert_eq!(config.handoff_timeout, Duration::from_millis(250));
    assert!(!config.log_hooks);
  }

  #[test]
  fn invalid_env_values_are_ignored() {
    let config = overlay_with(&[(ENV_HANDOFF_TIMEOUT_MS, "soon"), (ENV_LOG_HOOKS, "maybe")]);
    assert_eq!(config, ChainConfig::default());
  }
}
