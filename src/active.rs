//! Where instrumented code finds the unsafe stack pointer.
//!
//! Compilers that split the stack read and write this cell in function
//! prologues and epilogues, so both accessors are plain loads and stores.
//! Next to it sits the lowest usable address of the same unsafe stack, for
//! tools (conservative garbage collectors, mostly) that scan stacks.
use core::cell::Cell;

/// Storage for the active unsafe stack of the calling thread.
pub trait ActivePointer: Sync {
  fn get(&self) -> usize;
  fn set(&self, ptr: usize);
  /// Lowest usable address of the stack `get()` points into.
  fn start(&self) -> usize;
  fn set_start(&self, start: usize);
}

thread_local! {
  static UNSAFE_STACK_PTR: Cell<usize> = const { Cell::new(0) };
  static UNSAFE_STACK_START: Cell<usize> = const { Cell::new(0) };
}

/// One slot per OS thread, kept in a `thread_local!`.
#[derive(Clone,Copy,Debug,Default)]
pub struct ThreadLocal;

impl ActivePointer for ThreadLocal {
  #[inline(always)]
  fn get(&self) -> usize { get_active_pointer() }
  #[inline(always)]
  fn set(&self, ptr: usize) { set_active_pointer(ptr) }
  #[inline(always)]
  fn start(&self) -> usize { get_unsafe_stack_start() }
  #[inline(always)]
  fn set_start(&self, start: usize) { UNSAFE_STACK_START.with(|cell| cell.set(start)) }
}

/// The calling thread's unsafe stack pointer, or 0 if none was installed.
#[inline(always)]
pub fn get_active_pointer() -> usize {
  UNSAFE_STACK_PTR.with(Cell::get)
}

#[inline(always)]
pub fn set_active_pointer(ptr: usize) {
  UNSAFE_STACK_PTR.with(|cell| cell.set(ptr))
}

/// Bottom of the calling thread's unsafe stack, or 0 if none was installed.
pub fn get_unsafe_stack_start() -> usize {
  UNSAFE_STACK_START.with(Cell::get)
}

/// An address just below the caller's frame on the ordinary stack.
///
/// Everything the caller has pushed so far lies above it.
#[inline(never)]
pub fn get_safe_stack_ptr() -> usize {
  let marker = 0usize;
  core::hint::black_box(&marker) as *const usize as usize
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn safe_stack_ptr_is_just_below_the_caller() {
    let here = 0u8;
    let here = core::hint::black_box(&here) as *const u8 as usize;
    let ptr = get_safe_stack_ptr();
    assert!(ptr < here);
    assert!(here - ptr < 64 * 1024);
  }

  #[test]
  fn start_is_per_thread() {
    ThreadLocal.set_start(0x7000);
    assert_eq!(get_unsafe_stack_start(), 0x7000);
    std::thread::spawn(|| assert_eq!(get_unsafe_stack_start(), 0)).join().unwrap();
  }
}
