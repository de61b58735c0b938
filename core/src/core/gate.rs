// skein/src/core/gate.rs

//! Single-assignment handoff between the thread that attaches a run to a callback and
//! the thread that resumes it.
//!
//! Exactly one value ever passes through a gate. Three parties meet here:
//! - the attaching side `offer`s the value;
//! - a trigger on the issuing thread that fires before the attach `try_park`s instead of
//!   waiting, so the attaching side gets its value back and completes inline;
//! - a trigger on any other thread `take`s the value, waiting up to a bound. A taker that
//!   gives up closes the gate, which also hands the value back to a late `offer`.
//!
//! All transitions happen under one lock, so the "trigger before attach" race has exactly
//! one winner.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

enum Slot<T> {
  Empty,
  Parked,
  Filled(T),
  Taken,
  Closed,
}

pub struct HandoffGate<T> {
  slot: Mutex<Slot<T>>,
  cv: Condvar,
}

impl<T> Default for HandoffGate<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> HandoffGate<T> {
  pub fn new() -> Self {
    Self {
      slot: Mutex::new(Slot::Empty),
      cv: Condvar::new(),
    }
  }

  /// Stores `value` for a taker. Returns it back when a trigger parked before the offer,
  /// when a taker already gave up, or when a value already went through.
  pub fn offer(&self, value: T) -> Result<(), T> {
    let mut slot = self.slot.lock();
    match *slot {
      Slot::Empty => {
        *slot = Slot::Filled(value);
        self.cv.notify_all();
        Ok(())
      }
      _ => Err(value),
    }
  }

  /// Marks that the trigger fired before any offer. Returns `false` if an offer already
  /// arrived (or the gate is otherwise no longer empty).
  pub fn try_park(&self) -> bool {
    let mut slot = self.slot.lock();
    if matches!(*slot, Slot::Empty) {
      *slot = Slot::Parked;
      true
    } else {
      false
    }
  }

  /// Takes the value if it is already there.
  pub fn try_take(&self) -> Option<T> {
    let mut slot = self.slot.lock();
    Self::take_filled(&mut *slot)
  }

  /// Waits up to `timeout` for the value. On timeout the gate closes and `None` is returned.
  pub fn take(&self, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    let mut slot = self.slot.lock();
    loop {
      match *slot {
        Slot::Filled(_) => return Self::take_filled(&mut *slot),
        Slot::Empty => {
          if self.cv.wait_until(&mut slot, deadline).timed_out() {
            if matches!(*slot, Slot::Filled(_)) {
              return Self::take_filled(&mut *slot);
            }
            if matches!(*slot, Slot::Empty) {
              *slot = Slot::Closed;
            }
            return None;
          }
        }
        _ => return None,
      }
    }
  }

  pub fn is_closed(&self) -> bool {
    matches!(*self.slot.lock(), Slot::Closed)
  }

  fn take_filled(slot: &mut Slot<T>) -> Option<T> {
    match std::mem::replace(slot, Slot::Taken) {
      Slot::Filled(value) => Some(value),
      other => {
        *slot = other;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn offer_then_take() {
    let gate = HandoffGate::new();
    assert!(gate.offer(7).is_ok());
    assert_eq!(gate.take(Duration::from_millis(10)), Some(7));
    assert_eq!(gate.try_take(), None);
  }

  #[test]
  fn parked_trigger_hands_value_back_to_offer() {
    let gate = HandoffGate::new();
    assert!(gate.try_park());
    assert_eq!(gate.offer("run"), Err("run"));
  }

  #[test]
  fn park_after_offer_is_refused() {
    let gate = HandoffGate::new();
    gate.offer(1).unwrap();
    assert!(!gate.try_park());
  }

  #[test]
  fn taker_waits_for_late_offer() {
    let gate = Arc::new(HandoffGate::new());
    let taker = {
      let gate = gate.clone();
      thread::spawn(move || gate.take(Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    gate.offer(99u32).unwrap();
    assert_eq!(taker.join().unwrap(), Some(99));
  }

  #[test]
  fn timed_out_taker_closes_gate() {
    let gate: HandoffGate<u8> = HandoffGate::new();
    assert_eq!(gate.take(Duration::from_millis(5)), None);
    assert!(gate.is_closed());
    assert_eq!(gate.offer(3), Err(3));
  }
}
