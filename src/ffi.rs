//! C entry points over the process-wide [`Runtime`](crate::Runtime).
//!
//! These keep the calling conventions of the libc functions they stand in
//! for, but carry a `safestack_` prefix: linking this crate never replaces
//! libc's own symbols behind anyone's back.
use libc::{c_int, c_void, size_t};
use log::warn;
use crate::active::{get_active_pointer, get_safe_stack_ptr, get_unsafe_stack_start, set_active_pointer};
use crate::runtime::global;

#[cfg(all(target_os="linux", target_env="gnu"))]
use crate::switch::ucontext::{UContext, Ucontext};

/// Enables unsafe stacks unconditionally. 1 on success, 0 on failure.
#[no_mangle]
pub extern "C" fn safestack_init() -> c_int {
  match global().init() {
    Ok(()) => 1,
    Err(e) => {
      warn!("safestack_init: {}", e);
      0
    }
  }
}

/// Enables unsafe stacks if the program carries the opt-in note.
/// 1 if they are enabled afterwards, 0 otherwise.
#[no_mangle]
pub extern "C" fn safestack_start() -> c_int {
  match crate::runtime::start() {
    Ok(enabled) => enabled as c_int,
    Err(e) => {
      warn!("safestack_start: {}", e);
      0
    }
  }
}

#[no_mangle]
pub extern "C" fn safestack_enabled() -> c_int {
  global().is_enabled() as c_int
}

#[no_mangle]
pub extern "C" fn safestack_get_usp() -> *mut c_void {
  get_active_pointer() as *mut c_void
}

#[no_mangle]
pub extern "C" fn safestack_set_usp(ptr: *mut c_void) {
  set_active_pointer(ptr as usize)
}

/// Lowest usable address of the calling thread's unsafe stack.
#[no_mangle]
pub extern "C" fn safestack_get_unsafe_stack_start() -> *mut c_void {
  get_unsafe_stack_start() as *mut c_void
}

/// An address below the caller's frame on the ordinary stack.
#[no_mangle]
#[inline(never)]
pub extern "C" fn safestack_get_safe_stack_ptr() -> *mut c_void {
  get_safe_stack_ptr() as *mut c_void
}

/// `munmap`, also dropping the unsafe stack paired with `[addr, addr + len)`.
///
/// # Safety
///
/// As for `munmap`.
#[no_mangle]
pub unsafe extern "C" fn safestack_munmap(addr: *mut c_void, len: size_t) -> c_int {
  match global().release(addr as usize, len) {
    Ok(()) => 0,
    Err(_) => -1, // errno is already set by munmap
  }
}

/// `getcontext`, also recording the unsafe stack pointer.
///
/// # Safety
///
/// `ucp` must be valid for writes. Resuming the saved context is only sound
/// while the caller of this function has not returned.
#[cfg(all(target_os="linux", target_env="gnu"))]
#[no_mangle]
pub unsafe extern "C" fn safestack_getcontext(ucp: *mut UContext) -> c_int {
  global().save(&Ucontext, &mut *ucp)
}

/// `setcontext`, giving `ucp` an unsafe stack first if it has none.
///
/// # Safety
///
/// As for `setcontext`. The context is written to (its cached pointer) even
/// though libc's signature says `const`.
#[cfg(all(target_os="linux", target_env="gnu"))]
#[no_mangle]
pub unsafe extern "C" fn safestack_setcontext(ucp: *mut UContext) -> c_int {
  status(global().restore(&Ucontext, &mut *ucp))
}

/// `swapcontext`, saving the unsafe stack pointer into `oucp` and giving
/// `ucp` an unsafe stack first if it has none.
///
/// # Safety
///
/// As for `swapcontext`; `ucp` is written to as for `safestack_setcontext`.
#[cfg(all(target_os="linux", target_env="gnu"))]
#[no_mangle]
pub unsafe extern "C" fn safestack_swapcontext(oucp: *mut UContext, ucp: *mut UContext) -> c_int {
  status(global().swap(&Ucontext, &mut *oucp, &mut *ucp))
}

#[cfg(all(target_os="linux", target_env="gnu"))]
fn status(result: crate::Result<c_int>) -> c_int {
  match result {
    Ok(status) => status,
    Err(e) => {
      unsafe { *libc::__errno_location() = e.errno() };
      -1
    }
  }
}
