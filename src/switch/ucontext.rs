//! `getcontext`/`setcontext`/`swapcontext` from glibc.
use core::mem;
use core::ptr::null_mut;
use std::io;
use libc::{c_int, c_void};
use crate::stack::{Region, StackIdentity};
use super::{Context, Primitives};

/// A `ucontext_t` with room for its unsafe stack.
///
/// glibc stores pointers into the context itself, so once saved or prepared
/// it must stay where it is. [`UContext::boxed`] hands out one that will.
#[repr(C)]
pub struct UContext {
  pub uc: libc::ucontext_t,
  usp:    usize,
  uss:    usize,
}

impl UContext {
  pub fn boxed() -> Box<UContext> {
    // All zeroes is a valid, if useless, ucontext_t.
    Box::new(unsafe { mem::zeroed() })
  }

  /// Sets the context up to run `entry` on `stack`, continuing with `link`
  /// when `entry` returns (the thread exits if there is none).
  ///
  /// # Safety
  ///
  /// * `stack` must be mapped, writable and not used by anything else.
  /// * `link` must outlive every switch into this context.
  /// * `entry` must not unwind.
  pub unsafe fn prepare(&mut self, stack: Region, link: Option<&mut UContext>, entry: extern "C" fn()) -> io::Result<()> {
    if libc::getcontext(&mut self.uc) != 0 {
      return Err(io::Error::last_os_error());
    }
    self.uc.uc_stack.ss_sp = stack.base as *mut c_void;
    self.uc.uc_stack.ss_size = stack.len;
    self.uc.uc_stack.ss_flags = 0;
    self.uc.uc_link = link.map_or(null_mut(), |link| &mut link.uc as *mut _);
    self.usp = 0;
    self.uss = 0;
    libc::makecontext(&mut self.uc, entry, 0);
    Ok(())
  }
}

unsafe impl Context for UContext {
  fn stack(&self) -> StackIdentity {
    StackIdentity::new(self.uc.uc_stack.ss_sp as usize, self.uc.uc_stack.ss_size)
  }
  fn unsafe_stack_ptr(&self) -> usize { self.usp }
  fn set_unsafe_stack_ptr(&mut self, ptr: usize) { self.usp = ptr }
  fn unsafe_stack_start(&self) -> usize { self.uss }
  fn set_unsafe_stack_start(&mut self, start: usize) { self.uss = start }
}

/// The libc primitives themselves.
#[derive(Clone,Copy,Debug,Default)]
pub struct Ucontext;

impl Primitives for Ucontext {
  type Context = UContext;

  #[inline(always)]
  unsafe fn save(&self, ctx: &mut UContext) -> c_int {
    libc::getcontext(&mut ctx.uc)
  }

  unsafe fn restore(&self, ctx: &UContext) -> c_int {
    libc::setcontext(&ctx.uc)
  }

  unsafe fn swap(&self, out: &mut UContext, target: &UContext) -> c_int {
    libc::swapcontext(&mut out.uc, &target.uc)
  }
}
