//! Wrappers around context save, restore and swap, plus region release.
//!
//! Each context carries the unsafe stack pointer it last ran with. Switching
//! into a context that has never run looks its safe stack up in the
//! registry, mapping a fresh unsafe stack on a miss, and caches the result on
//! the context so later switches never take the lock.
use std::io;
use core::sync::atomic::Ordering;
use libc::c_int;
use log::{debug, warn};
use crate::active::ActivePointer;
use crate::error::Result;
use crate::os_unix::Os;
use crate::runtime::Runtime;
use crate::stack::StackIdentity;

#[cfg(all(target_os="linux", target_env="gnu"))]
pub mod ucontext;

/// Saved execution state that can carry an unsafe stack pointer.
///
/// # Safety
///
/// * `stack()` must describe the safe stack the context runs on, or be empty
///   if it runs on a stack we should not manage.
/// * `unsafe_stack_ptr()` must return what was last stored with
///   `set_unsafe_stack_ptr()`, and 0 for a fresh context.
/// * `unsafe_stack_start()` must return what was last stored with
///   `set_unsafe_stack_start()`.
pub unsafe trait Context {
  fn stack(&self) -> StackIdentity;
  fn unsafe_stack_ptr(&self) -> usize;
  fn set_unsafe_stack_ptr(&mut self, ptr: usize);
  /// Lowest usable address of the unsafe stack `unsafe_stack_ptr()` points into.
  fn unsafe_stack_start(&self) -> usize;
  fn set_unsafe_stack_start(&mut self, start: usize);
}

/// The context primitives being wrapped. They return C status codes.
pub trait Primitives {
  type Context: Context;

  /// Captures the current state into `ctx`.
  ///
  /// # Safety
  ///
  /// Like `setjmp`: control may come back here a second time through a
  /// restore of `ctx`, which is only sound while the calling frame is live.
  unsafe fn save(&self, ctx: &mut Self::Context) -> c_int;

  /// Transfers control into `ctx`. Only returns on failure.
  ///
  /// # Safety
  ///
  /// `ctx` must have been filled by `save` or prepared to run on a valid stack.
  unsafe fn restore(&self, ctx: &Self::Context) -> c_int;

  /// Saves into `out` and transfers control into `target`.
  ///
  /// # Safety
  ///
  /// As for `restore`.
  unsafe fn swap(&self, out: &mut Self::Context, target: &Self::Context) -> c_int;
}

impl<O: Os, A: ActivePointer> Runtime<O, A> {
  /// Makes sure `ctx` has an unsafe stack and returns the pointer to install.
  ///
  /// A context that already carries a pointer is trusted without locking.
  /// The caller must not switch into the same context from two threads at once.
  pub fn ensure_allocated<C: Context>(&self, ctx: &mut C) -> Result<usize> {
    let cached = ctx.unsafe_stack_ptr();
    if cached != 0 {
      return Ok(cached);
    }
    let identity = ctx.stack();
    let mut registry = self.registry.lock();
    let entry = match registry.find(identity) {
      Some(entry) => *entry,
      None => {
        let entry = *registry.insert(&self.os, identity)?;
        self.live.store(registry.len(), Ordering::Release);
        debug!("mapped unsafe stack {:?} for safe stack {:#x}+{:#x}",
          entry.unsafe_stack, identity.base, identity.size);
        entry
      }
    };
    drop(registry);
    ctx.set_unsafe_stack_ptr(entry.top());
    ctx.set_unsafe_stack_start(entry.unsafe_stack.base);
    Ok(entry.top())
  }

  /// Makes the unsafe stack of `ctx` the active one.
  #[inline(always)]
  fn install<C: Context>(&self, ctx: &C) {
    self.active.set(ctx.unsafe_stack_ptr());
    self.active.set_start(ctx.unsafe_stack_start());
  }

  #[inline(always)]
  fn record<C: Context>(&self, ctx: &mut C) {
    ctx.set_unsafe_stack_ptr(self.active.get());
    ctx.set_unsafe_stack_start(self.active.start());
  }

  /// Records the active unsafe stack pointer in `ctx`, then saves it.
  ///
  /// # Safety
  ///
  /// See [`Primitives::save`].
  #[inline(always)]
  pub unsafe fn save<P: Primitives>(&self, prims: &P, ctx: &mut P::Context) -> c_int {
    if self.is_enabled() {
      self.record(ctx);
    }
    prims.save(ctx)
  }

  /// Installs the unsafe stack of `ctx` and transfers control into it.
  ///
  /// On success this does not return. `Ok` carries the status of a failed
  /// restore, after which the caller's unsafe stack is active again; `Err`
  /// means no unsafe stack could be found or made, and `ctx` was not entered.
  ///
  /// # Safety
  ///
  /// See [`Primitives::restore`].
  pub unsafe fn restore<P: Primitives>(&self, prims: &P, ctx: &mut P::Context) -> Result<c_int> {
    if !self.is_enabled() {
      return Ok(prims.restore(ctx));
    }
    let (ptr, start) = (self.active.get(), self.active.start());
    self.ensure_allocated(ctx)?;
    self.install(ctx);
    let status = prims.restore(ctx);
    if status != 0 {
      self.active.set(ptr);
      self.active.set_start(start);
    }
    Ok(status)
  }

  /// Saves the current unsafe stack pointer into `out`, then behaves like
  /// [`restore`](Self::restore) for `target`. Returns once something
  /// switches back into `out`, or at once if the switch failed; either way
  /// `out`'s unsafe stack is active again.
  ///
  /// Resumption through `uc_link` bypasses every wrapper, so the pointer is
  /// put back here rather than by whoever ran last.
  ///
  /// # Safety
  ///
  /// See [`Primitives::swap`].
  pub unsafe fn swap<P: Primitives>(
    &self,
    prims: &P,
    out: &mut P::Context,
    target: &mut P::Context,
  ) -> Result<c_int> {
    if !self.is_enabled() {
      return Ok(prims.swap(out, target));
    }
    self.record(out);
    self.ensure_allocated(target)?;
    self.install(target);
    let status = prims.swap(out, target);
    self.install(out);
    Ok(status)
  }

  /// Unmaps `[addr, addr + len)`. If that exact range is a safe stack we
  /// mapped an unsafe stack for, the unsafe stack goes with it.
  pub fn release(&self, addr: usize, len: usize) -> io::Result<()> {
    // Racing an insert here can only make us miss a stack that is still in use.
    if self.live.load(Ordering::Acquire) != 0 {
      let mut registry = self.registry.lock();
      if let Some(unsafe_stack) = registry.remove(StackIdentity::new(addr, len)) {
        self.live.store(registry.len(), Ordering::Release);
        drop(registry);
        match self.os.unmap(unsafe_stack.base, unsafe_stack.len) {
          Ok(()) => debug!("released unsafe stack {:?} with safe stack {:#x}+{:#x}", unsafe_stack, addr, len),
          Err(e) => warn!("failed to unmap unsafe stack {:?}: {}", unsafe_stack, e),
        }
      }
    }
    self.os.unmap(addr, len)
  }
}
