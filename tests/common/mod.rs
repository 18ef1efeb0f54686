#![allow(dead_code)]

use std::collections::{BTreeMap, TryReserveError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use libc::c_int;
use parking_lot::Mutex;
use safestack::*;

/// A pretend address space. Nothing it hands out is backed by memory.
pub struct MockOs {
  pub page:        usize,
  pub limit:       Option<usize>,
  pub threaded:    AtomicBool,
  pub fail_maps:   AtomicBool,
  /// Reservations of exactly this many records fail. 0 fails none.
  pub fail_reserve_len: AtomicUsize,
  pub map_calls:   AtomicUsize,
  pub mapped:      Mutex<BTreeMap<usize, usize>>,
  pub protected:   Mutex<Vec<(usize, usize)>>,
  pub unmapped:    Mutex<Vec<(usize, usize)>>,
  next:            AtomicUsize,
}

impl MockOs {
  pub fn new() -> Self {
    MockOs {
      page: 4096,
      limit: None,
      threaded: AtomicBool::new(false),
      fail_maps: AtomicBool::new(false),
      fail_reserve_len: AtomicUsize::new(0),
      map_calls: AtomicUsize::new(0),
      mapped: Mutex::new(BTreeMap::new()),
      protected: Mutex::new(Vec::new()),
      unmapped: Mutex::new(Vec::new()),
      next: AtomicUsize::new(0x1000_0000),
    }
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn with_page(mut self, page: usize) -> Self {
    self.page = page;
    self
  }

  pub fn is_mapped(&self, base: usize, len: usize) -> bool {
    self.mapped.lock().get(&base) == Some(&len)
  }

  pub fn maps(&self) -> usize { self.map_calls.load(Ordering::SeqCst) }

  pub fn fail_reservations_of(&self, len: usize) {
    self.fail_reserve_len.store(len, Ordering::SeqCst);
  }
}

impl Os for MockOs {
  fn page_size(&self) -> usize { self.page }

  fn stack_limit(&self) -> io::Result<Option<usize>> { Ok(self.limit) }

  fn map_stack(&self, len: usize) -> io::Result<usize> {
    self.map_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_maps.load(Ordering::SeqCst) {
      return Err(io::ErrorKind::OutOfMemory.into());
    }
    let span = (len + self.page - 1) / self.page * self.page + self.page;
    let base = self.next.fetch_add(span, Ordering::SeqCst);
    self.mapped.lock().insert(base, len);
    Ok(base)
  }

  fn protect_none(&self, addr: usize, len: usize) -> io::Result<()> {
    self.protected.lock().push((addr, len));
    Ok(())
  }

  fn unmap(&self, addr: usize, len: usize) -> io::Result<()> {
    self.unmapped.lock().push((addr, len));
    let mut mapped = self.mapped.lock();
    if mapped.get(&addr) == Some(&len) {
      mapped.remove(&addr);
    }
    Ok(())
  }

  fn is_threaded(&self) -> bool { self.threaded.load(Ordering::SeqCst) }

  fn reserve<T>(&self, len: usize) -> std::result::Result<Vec<T>, TryReserveError> {
    if len == self.fail_reserve_len.load(Ordering::SeqCst) {
      return Err(Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err());
    }
    let mut vec = Vec::new();
    vec.try_reserve_exact(len)?;
    Ok(vec)
  }
}

pub fn runtime(os: MockOs) -> Runtime<MockOs, ThreadLocal> {
  Runtime::new(os, ThreadLocal, Config::default())
}

pub fn runtime_with(os: MockOs, config: Config) -> Runtime<MockOs, ThreadLocal> {
  Runtime::new(os, ThreadLocal, config)
}

pub struct MockContext {
  pub stack: StackIdentity,
  pub usp:   usize,
  pub start: usize,
}

impl MockContext {
  pub fn new(base: usize, size: usize) -> Self {
    MockContext { stack: StackIdentity::new(base, size), usp: 0, start: 0 }
  }
}

unsafe impl Context for MockContext {
  fn stack(&self) -> StackIdentity { self.stack }
  fn unsafe_stack_ptr(&self) -> usize { self.usp }
  fn set_unsafe_stack_ptr(&mut self, ptr: usize) { self.usp = ptr }
  fn unsafe_stack_start(&self) -> usize { self.start }
  fn set_unsafe_stack_start(&mut self, start: usize) { self.start = start }
}

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum Call {
  Save(StackIdentity),
  /// The context entered and the active pointer it was entered with.
  Restore(StackIdentity, usize),
  Swap(StackIdentity, StackIdentity, usize),
}

/// Records what would have happened instead of switching.
///
/// A successful swap returns as if the target had switched straight back.
#[derive(Default)]
pub struct MockPrims {
  pub calls: Mutex<Vec<Call>>,
  /// Every primitive reports failure.
  pub fail:  AtomicBool,
}

impl MockPrims {
  pub fn failing() -> Self {
    MockPrims { fail: AtomicBool::new(true), ..MockPrims::default() }
  }

  pub fn calls(&self) -> Vec<Call> { self.calls.lock().clone() }

  fn status(&self) -> c_int {
    if self.fail.load(Ordering::SeqCst) { -1 } else { 0 }
  }
}

impl Primitives for MockPrims {
  type Context = MockContext;

  unsafe fn save(&self, ctx: &mut MockContext) -> c_int {
    self.calls.lock().push(Call::Save(ctx.stack));
    self.status()
  }

  unsafe fn restore(&self, ctx: &MockContext) -> c_int {
    self.calls.lock().push(Call::Restore(ctx.stack, get_active_pointer()));
    self.status()
  }

  unsafe fn swap(&self, out: &mut MockContext, target: &MockContext) -> c_int {
    self.calls.lock().push(Call::Swap(out.stack, target.stack, get_active_pointer()));
    self.status()
  }
}
