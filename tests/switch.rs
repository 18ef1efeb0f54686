mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use common::{runtime, Call, MockContext, MockOs, MockPrims};
use safestack::*;

fn enabled() -> Runtime<MockOs, ThreadLocal> {
  let rt = runtime(MockOs::new().with_limit(1 << 20));
  rt.init().unwrap();
  rt
}

#[test]
fn disabled_runtime_passes_through() {
  let rt = runtime(MockOs::new());
  let prims = MockPrims::default();
  let mut ctx = MockContext::new(0x10000, 0x4000);
  set_active_pointer(0x1234);
  unsafe {
    assert_eq!(rt.save(&prims, &mut ctx), 0);
    assert_eq!(rt.restore(&prims, &mut ctx).unwrap(), 0);
  }
  assert_eq!(ctx.usp, 0);
  assert_eq!(rt.live_entries(), 0);
  assert_eq!(rt.os().maps(), 0);
  assert_eq!(prims.calls(), vec![Call::Save(ctx.stack), Call::Restore(ctx.stack, 0x1234)]);
}

#[test]
fn first_restore_maps_and_installs() {
  let rt = enabled();
  let prims = MockPrims::default();
  let mut ctx = MockContext::new(0x10000, 0x8000);
  unsafe { rt.restore(&prims, &mut ctx).unwrap() };

  let entry = rt.with_registry(|r| *r.find(ctx.stack).unwrap());
  assert_eq!(entry.unsafe_stack.len, 0x8000);
  assert_eq!(ctx.usp, entry.top());
  assert_eq!(get_active_pointer(), entry.top());
  assert_eq!(prims.calls(), vec![Call::Restore(ctx.stack, entry.top())]);
  assert_eq!(rt.live_entries(), 1);
}

#[test]
fn cached_pointer_skips_the_registry() {
  let rt = enabled();
  let prims = MockPrims::default();
  let mut ctx = MockContext::new(0x10000, 0x8000);
  unsafe { rt.restore(&prims, &mut ctx).unwrap() };
  let maps = rt.os().maps();

  // As if the context had run for a while and been saved.
  ctx.usp -= 0x100;
  unsafe { rt.restore(&prims, &mut ctx).unwrap() };
  assert_eq!(rt.os().maps(), maps);
  assert_eq!(get_active_pointer(), ctx.usp);
}

#[test]
fn identity_is_remembered_across_context_objects() {
  let rt = enabled();
  let mut first = MockContext::new(0x10000, 0x8000);
  let mut second = MockContext::new(0x10000, 0x8000);
  let a = rt.ensure_allocated(&mut first).unwrap();
  let b = rt.ensure_allocated(&mut second).unwrap();
  assert_eq!(a, b);
  assert_eq!(second.usp, a);
  assert_eq!(rt.live_entries(), 1);
}

#[test]
fn save_records_the_active_pointer() {
  let rt = enabled();
  let prims = MockPrims::default();
  let mut ctx = MockContext::new(0, 0);
  set_active_pointer(0xdead0);
  unsafe { rt.save(&prims, &mut ctx) };
  assert_eq!(ctx.usp, 0xdead0);
}

#[test]
fn swap_saves_then_installs() {
  let rt = enabled();
  let prims = MockPrims::default();
  let main_top = rt.main_stack().unwrap().top();
  let mut main = MockContext::new(0, 0);
  let mut coro = MockContext::new(0x40000, 0x4000);
  unsafe { rt.swap(&prims, &mut main, &mut coro).unwrap() };

  assert_eq!(main.usp, main_top);
  assert_ne!(coro.usp, 0);
  assert_eq!(prims.calls(), vec![Call::Swap(main.stack, coro.stack, coro.usp)]);

  // Entering it again goes through the cached pointer.
  let maps = rt.os().maps();
  let mut other = MockContext::new(0, 0);
  unsafe { rt.swap(&prims, &mut other, &mut coro).unwrap() };
  assert_eq!(rt.os().maps(), maps);
  assert_eq!(prims.calls()[1], Call::Swap(other.stack, coro.stack, coro.usp));
}

#[test]
fn returning_from_swap_reinstates_the_caller() {
  let rt = enabled();
  let prims = MockPrims::default();
  let main = rt.main_stack().unwrap();
  let mut home = MockContext::new(0, 0);
  let mut coro = MockContext::new(0x40000, 0x4000);
  // Like a coroutine that ends and resumes its `uc_link`.
  unsafe { rt.swap(&prims, &mut home, &mut coro).unwrap() };

  assert_eq!(get_active_pointer(), main.top());
  assert_eq!(get_unsafe_stack_start(), main.start());
  rt.release(0x40000, 0x4000).unwrap();
  assert_eq!(get_active_pointer(), main.top());
}

#[test]
fn failed_restore_puts_the_caller_back() {
  let rt = enabled();
  let prims = MockPrims::failing();
  let main = rt.main_stack().unwrap();
  let mut ctx = MockContext::new(0x10000, 0x8000);
  assert_eq!(unsafe { rt.restore(&prims, &mut ctx) }.unwrap(), -1);

  assert_eq!(prims.calls(), vec![Call::Restore(ctx.stack, ctx.usp)]);
  assert_eq!(get_active_pointer(), main.top());
  assert_eq!(get_unsafe_stack_start(), main.start());
}

#[test]
fn failed_swap_puts_the_caller_back() {
  let rt = enabled();
  let prims = MockPrims::failing();
  let main = rt.main_stack().unwrap();
  let mut out = MockContext::new(0, 0);
  let mut ctx = MockContext::new(0x10000, 0x8000);
  assert_eq!(unsafe { rt.swap(&prims, &mut out, &mut ctx) }.unwrap(), -1);

  assert_eq!(prims.calls(), vec![Call::Swap(out.stack, ctx.stack, ctx.usp)]);
  assert_eq!(get_active_pointer(), main.top());
  assert_eq!(get_unsafe_stack_start(), main.start());
}

#[test]
fn unsafe_stack_start_follows_the_context() {
  let rt = enabled();
  let prims = MockPrims::default();
  let main = rt.main_stack().unwrap();
  assert_eq!(get_unsafe_stack_start(), main.start());
  assert_eq!(main.start(), main.mapping.base + main.guard);

  let mut ctx = MockContext::new(0x10000, 0x8000);
  unsafe { rt.restore(&prims, &mut ctx).unwrap() };
  let entry = rt.with_registry(|r| *r.find(ctx.stack).unwrap());
  assert_eq!(ctx.start, entry.unsafe_stack.base);
  assert_eq!(get_unsafe_stack_start(), entry.unsafe_stack.base);

  // Saving records it alongside the pointer.
  let mut saved = MockContext::new(0, 0);
  unsafe { rt.save(&prims, &mut saved) };
  assert_eq!((saved.usp, saved.start), (entry.top(), entry.unsafe_stack.base));
}

#[test]
fn exhaustion_keeps_the_caller_in_control() {
  let rt = enabled();
  let prims = MockPrims::default();
  let before = get_active_pointer();
  rt.os().fail_maps.store(true, Ordering::SeqCst);

  let mut ctx = MockContext::new(0x10000, 0x8000);
  let err = unsafe { rt.restore(&prims, &mut ctx) }.unwrap_err();
  assert!(err.is_resource_exhausted());
  let mut out = MockContext::new(0, 0);
  assert!(unsafe { rt.swap(&prims, &mut out, &mut ctx) }.is_err());

  assert!(prims.calls().is_empty());
  assert_eq!(ctx.usp, 0);
  assert_eq!(get_active_pointer(), before);
  assert_eq!(rt.live_entries(), 0);
}

#[test]
fn empty_stack_cannot_be_entered_fresh() {
  let rt = enabled();
  let prims = MockPrims::default();
  let mut ctx = MockContext::new(0x10000, 0);
  let err = unsafe { rt.restore(&prims, &mut ctx) }.unwrap_err();
  assert!(matches!(err, Error::EmptyStack));
  assert_eq!(err.errno(), libc::ENOMEM);
}

#[test]
fn release_drops_the_paired_stack() {
  let rt = enabled();
  let mut a = MockContext::new(0x100000, 0x8000);
  let mut b = MockContext::new(0x200000, 0x8000);
  rt.ensure_allocated(&mut a).unwrap();
  rt.ensure_allocated(&mut b).unwrap();
  let a_stack = rt.with_registry(|r| r.find(a.stack).unwrap().unsafe_stack);
  let b_stack = rt.with_registry(|r| r.find(b.stack).unwrap().unsafe_stack);

  // Neighbouring and overlapping ranges that are not exactly `a` change nothing.
  rt.release(0x300000, 0x8000).unwrap();
  rt.release(0x100000, 0x4000).unwrap();
  assert_eq!(rt.live_entries(), 2);
  assert!(rt.os().is_mapped(a_stack.base, a_stack.len));

  rt.release(0x100000, 0x8000).unwrap();
  assert_eq!(rt.live_entries(), 1);
  assert!(rt.with_registry(|r| r.find(a.stack).is_none()));
  assert!(!rt.os().is_mapped(a_stack.base, a_stack.len));
  assert!(rt.os().is_mapped(b_stack.base, b_stack.len));
  assert!(rt.os().unmapped.lock().contains(&(0x100000, 0x8000)));
}

#[test]
fn release_without_entries_still_unmaps() {
  let rt = enabled();
  rt.release(0x500000, 0x1000).unwrap();
  assert_eq!(*rt.os().unmapped.lock(), vec![(0x500000, 0x1000)]);
}

#[test]
fn released_stack_gets_a_fresh_unsafe_stack() {
  let rt = enabled();
  let mut ctx = MockContext::new(0x100000, 0x8000);
  rt.ensure_allocated(&mut ctx).unwrap();
  rt.release(0x100000, 0x8000).unwrap();

  let mut reused = MockContext::new(0x100000, 0x8000);
  rt.ensure_allocated(&mut reused).unwrap();
  assert_eq!(rt.live_entries(), 1);
  let entry = rt.with_registry(|r| *r.find(reused.stack).unwrap());
  assert!(rt.os().is_mapped(entry.unsafe_stack.base, entry.unsafe_stack.len));
}

#[test]
fn contexts_on_many_threads_stay_apart() {
  const THREADS: usize = 8;
  const ROUNDS: usize = 100;
  let rt = Arc::new(enabled());

  let handles: Vec<_> = (0..THREADS).map(|i| {
    let rt = Arc::clone(&rt);
    thread::spawn(move || {
      let prims = MockPrims::default();
      let mut ctx = MockContext::new((i + 1) * 0x100000, 0x10000);
      let mut home = MockContext::new(0, 0);
      unsafe { rt.swap(&prims, &mut home, &mut ctx).unwrap() };
      let mine = ctx.usp;
      assert_ne!(mine, 0);
      for _ in 0..ROUNDS {
        unsafe { rt.swap(&prims, &mut home, &mut ctx).unwrap() };
        assert_eq!(prims.calls().last(), Some(&Call::Swap(home.stack, ctx.stack, mine)));
        assert_eq!(ctx.usp, mine);
      }
      (ctx.stack, mine)
    })
  }).collect();

  let mut seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
  assert_eq!(rt.live_entries(), THREADS);
  for (stack, top) in &seen {
    assert_eq!(rt.with_registry(|r| r.find(*stack).unwrap().top()), *top);
  }
  seen.sort_by_key(|(_, top)| *top);
  seen.dedup_by_key(|(_, top)| *top);
  assert_eq!(seen.len(), THREADS);
}
