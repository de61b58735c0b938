// tests/combinator_tests.rs
mod common;

use common::*;
use serial_test::serial;
use skein::{codes, Chain, Combinator, Flow, Hooks, RunOptions, SkeinError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

type Children = Slot<(Combinator<TestInput, TestData>, Vec<TestCallback<usize>>)>;

/// Workflow "fanout": `fanout` (order 1) fans in `children` callbacks, `after` (order 2) is synchronous.
fn fanout_chain(children: usize, fast_return: bool, slot: Children) -> TestChain {
  let registry = registry_of(
    "fanout",
    vec![
      (
        1,
        recording("fanout", Hooks::EXECUTE | Hooks::ON_COMPLETE).with_execute(move |_, _| {
          let combinator = if fast_return {
            Combinator::fast_return()
          } else {
            Combinator::new()
          };
          let mut callbacks = Vec::new();
          for _ in 0..children {
            let callback = TestCallback::<usize>::builder()
              .on_success(|_, result, child| {
                result.data_mut().log.push(format!("child{}", child));
                Ok(())
              })
              .build();
            combinator.combine(&callback)?;
            callbacks.push(callback);
          }
          slot.lock().push((combinator.clone(), callbacks));
          Ok(Flow::wait(combinator))
        }),
      ),
      (2, recording("after", Hooks::EXECUTE)),
    ],
  );
  Chain::new(registry)
}

fn run_counting_finishes(chain: &TestChain, output: &skein::ResultContainer<TestData>) -> Arc<AtomicUsize> {
  let finishes = Arc::new(AtomicUsize::new(0));
  let sink = finishes.clone();
  chain
    .run_workflow_with(
      "fanout",
      TestInput::default(),
      output,
      RunOptions::new().on_finish(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
      }),
    )
    .unwrap();
  finishes
}

#[test]
#[serial]
fn wait_all_resumes_exactly_once_under_concurrent_completion() {
  setup_tracing();
  const CHILDREN: usize = 8;
  let slot = new_slot();
  let chain = fanout_chain(CHILDREN, false, slot.clone());
  let output = new_output();
  let finishes = run_counting_finishes(&chain, &output);
  assert!(!output.is_finished());

  let (combinator, callbacks) = take_one(&slot);
  assert_eq!(combinator.len(), CHILDREN);
  let barrier = Arc::new(Barrier::new(CHILDREN));
  let handles: Vec<_> = callbacks
    .into_iter()
    .enumerate()
    .map(|(i, callback)| {
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        callback.succeed(i)
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap().unwrap();
  }

  assert!(output.wait_finished(WAIT));
  let log = log_of(&output);
  for i in 0..CHILDREN {
    assert_eq!(count_in(&log, &format!("child{}", i)), 1);
  }
  assert_eq!(count_in(&log, "after.execute"), 1);
  assert_eq!(count_in(&log, "fanout.on_complete"), 1);
  assert_eq!(log.last().map(String::as_str), Some("fanout.on_complete"));
  assert_eq!(finishes.load(Ordering::SeqCst), 1);
  assert!(combinator.is_done());
  assert_eq!(combinator.completed_children(), CHILDREN);
  assert!(!combinator.is_synchronous());
}

#[test]
#[serial]
fn wait_all_does_not_resume_until_last_child() {
  setup_tracing();
  let slot = new_slot();
  let chain = fanout_chain(3, false, slot.clone());
  let output = new_output();
  run_counting_finishes(&chain, &output);

  let (combinator, callbacks) = take_one(&slot);
  callbacks[0].succeed(0).unwrap();
  callbacks[2].succeed(2).unwrap();
  assert!(!combinator.is_done());
  assert!(!output.is_finished());
  assert_eq!(count_in(&log_of(&output), "after.execute"), 0);

  callbacks[1].succeed(1).unwrap();
  assert!(output.is_finished());
  assert_eq!(
    log_of(&output),
    vec!["fanout.execute", "child0", "child2", "child1", "after.execute", "fanout.on_complete"]
  );
}

#[test]
#[serial]
fn fast_return_resumes_on_first_child_only() {
  setup_tracing();
  let slot = new_slot();
  let chain = fanout_chain(3, true, slot.clone());
  let output = new_output();
  let finishes = run_counting_finishes(&chain, &output);

  let (combinator, callbacks) = take_one(&slot);
  assert!(combinator.is_fast_return());

  let second = callbacks[1].clone();
  thread::spawn(move || second.succeed(2)).join().unwrap().unwrap();
  assert!(output.wait_finished(WAIT));
  assert!(combinator.is_done());
  assert_eq!(
    log_of(&output),
    vec!["fanout.execute", "child2", "after.execute", "fanout.on_complete"]
  );

  callbacks[0].succeed(1).unwrap();
  let third = callbacks[2].clone();
  thread::spawn(move || third.succeed(3)).join().unwrap().unwrap();

  let log = log_of(&output);
  assert_eq!(count_in(&log, "child1"), 1);
  assert_eq!(count_in(&log, "child3"), 1);
  assert_eq!(count_in(&log, "after.execute"), 1);
  assert_eq!(finishes.load(Ordering::SeqCst), 1);
  assert_eq!(combinator.completed_children(), 3);
}

#[test]
#[serial]
fn fast_return_leftovers_release_the_run_once_dropped() {
  setup_tracing();
  let slot = new_slot();
  let chain = fanout_chain(3, true, slot.clone());
  let output = new_output();
  let input = Arc::new(TestInput::default());
  let payload = Arc::downgrade(&input);
  chain.run_workflow("fanout", input, &output).unwrap();

  let (combinator, mut callbacks) = take_one(&slot);
  callbacks.remove(1).succeed(2).unwrap();
  assert!(output.wait_finished(WAIT));
  assert!(combinator.is_done());
  assert!(payload.upgrade().is_some(), "pending children still hold the run");

  drop(combinator);
  drop(callbacks);
  assert!(payload.upgrade().is_none(), "combinator and children kept each other alive");
}

#[test]
#[serial]
fn abandoned_wait_all_children_release_the_run() {
  setup_tracing();
  let slot = new_slot();
  let chain = fanout_chain(2, false, slot.clone());
  let output = new_output();
  let input = Arc::new(TestInput::default());
  let payload = Arc::downgrade(&input);
  chain.run_workflow("fanout", input, &output).unwrap();

  let (combinator, callbacks) = take_one(&slot);
  callbacks[0].succeed(1).unwrap();
  assert!(!output.is_finished());

  drop(callbacks);
  assert!(payload.upgrade().is_some(), "the combinator handle still reaches the run");
  drop(combinator);
  assert!(payload.upgrade().is_none());
  assert!(!output.is_finished());
}

#[test]
#[serial]
fn children_completed_inline_continue_in_place() {
  setup_tracing();
  let registry = registry_of(
    "inline_fanout",
    vec![
      (
        1,
        recording("lookup", Hooks::EXECUTE).with_execute(|_, _| {
          let combinator = Combinator::new();
          for shard in 0..3usize {
            let callback = TestCallback::<usize>::builder()
              .on_success(|_, result, shard| {
                result.data_mut().value += shard as i64;
                Ok(())
              })
              .build();
            callback.succeed(shard + 1)?;
            combinator.combine(&callback)?;
          }
          Ok(Flow::wait(combinator))
        }),
      ),
      (2, recording("after", Hooks::EXECUTE)),
    ],
  );
  let chain = Chain::new(registry);
  let output = new_output();

  chain.run_workflow("inline_fanout", TestInput::default(), &output).unwrap();

  assert!(output.is_finished());
  assert!(output.is_synchronous());
  assert_eq!(output.lock().data().value, 6);
  assert_eq!(log_of(&output), vec!["lookup.execute", "after.execute"]);
}

#[test]
#[serial]
fn empty_combinator_continues_in_place() {
  setup_tracing();
  let registry = registry_of(
    "empty",
    vec![
      (
        1,
        recording("noop", Hooks::EXECUTE)
          .with_execute(|_, _| Ok(Flow::wait(Combinator::<TestInput, TestData>::new()))),
      ),
      (2, recording("after", Hooks::EXECUTE)),
    ],
  );
  let chain = Chain::new(registry);
  let output = new_output();

  chain.run_workflow("empty", TestInput::default(), &output).unwrap();

  assert!(output.is_synchronous());
  assert_eq!(log_of(&output), vec!["noop.execute", "after.execute"]);
}

#[test]
#[serial]
fn a_callback_joins_at_most_one_combinator() {
  setup_tracing();
  let first = Combinator::<TestInput, TestData>::new();
  let second = Combinator::<TestInput, TestData>::new();
  let callback = TestCallback::<()>::new();

  first.combine(&callback).unwrap();
  assert!(matches!(first.combine(&callback), Err(SkeinError::AlreadyCombined)));
  assert!(matches!(second.combine(&callback), Err(SkeinError::AlreadyCombined)));
  assert_eq!(first.len(), 1);
  assert!(second.is_empty());
}

#[test]
#[serial]
fn combinator_is_sealed_once_attached() {
  setup_tracing();
  let slot = new_slot();
  let chain = fanout_chain(1, false, slot.clone());
  let output = new_output();
  run_counting_finishes(&chain, &output);

  let (combinator, callbacks) = take_one(&slot);
  let late = TestCallback::<usize>::new();
  assert!(matches!(combinator.combine(&late), Err(SkeinError::CombinatorSealed)));

  callbacks[0].succeed(0).unwrap();
  assert!(output.is_finished());
}

#[test]
#[serial]
fn returning_a_combined_callback_directly_is_a_loud_failure() {
  setup_tracing();
  let registry = registry_of(
    "misuse",
    vec![
      (
        1,
        recording("misuse", Hooks::EXECUTE).with_execute(|_, _| {
          let combinator = Combinator::new();
          let callback = TestCallback::<()>::new();
          combinator.combine(&callback)?;
          Ok(Flow::wait(callback))
        }),
      ),
      (2, recording("after", Hooks::EXECUTE)),
    ],
  );
  let chain = Chain::new(registry);
  let output = new_output();

  chain.run_workflow("misuse", TestInput::default(), &output).unwrap();

  assert!(output.is_finished());
  assert_eq!(output.code(), codes::INTERNAL_ERROR);
  assert!(output.message().contains("already belongs to a combinator"));
  assert_eq!(log_of(&output), vec!["misuse.execute"]);
}
