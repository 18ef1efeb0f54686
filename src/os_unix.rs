//! The handful of operating system calls the runtime is built on.
//!
//! Everything goes through [`Os`] so the registry and the interceptor can be
//! driven against a fake address space in tests.
use std::collections::TryReserveError;
use std::io;
use std::ptr::null_mut;
use libc::{c_int, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};

const MMAP_RETURNED_NULL: &str =
  "Mmap returned null, which violates POSIX and certainly isn't sporting.";

#[cfg(any(target_os="dragonflybsd", target_os="freebsd", target_os="linux", target_os="netbsd", target_os="openbsd"))]
const STACK_FLAGS: c_int = MAP_ANONYMOUS | MAP_PRIVATE | libc::MAP_STACK;
#[cfg(not(any(target_os="dragonflybsd", target_os="freebsd", target_os="linux", target_os="netbsd", target_os="openbsd")))]
const STACK_FLAGS: c_int = MAP_ANONYMOUS | MAP_PRIVATE;

/// Memory and process primitives. All of them may fail; none of them abort.
pub trait Os: Sync {
  /// The system page size in bytes.
  fn page_size(&self) -> usize;

  /// The soft `RLIMIT_STACK`, or `None` when it is infinite.
  fn stack_limit(&self) -> io::Result<Option<usize>>;

  /// Maps `len` bytes with the protection ordinary stacks get and returns the base address.
  fn map_stack(&self, len: usize) -> io::Result<usize>;

  /// Makes `[addr, addr + len)` inaccessible.
  fn protect_none(&self, addr: usize, len: usize) -> io::Result<()>;

  /// Releases `[addr, addr + len)`.
  fn unmap(&self, addr: usize, len: usize) -> io::Result<()>;

  /// Whether the process has grown past its initial thread.
  fn is_threaded(&self) -> bool;

  /// Reserves room for `len` bookkeeping records without aborting on failure.
  fn reserve<T>(&self, len: usize) -> Result<Vec<T>, TryReserveError> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(len)?;
    Ok(vec)
  }
}

#[repr(transparent)]
#[derive(Clone,Copy,Debug)]
/// A value holding the operating system's standard pagesize (probably 4k).
pub struct PageSize(usize);

impl PageSize {
  pub fn get() -> io::Result<PageSize> {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
      -1 => Err(io::Error::last_os_error()),
      size => Ok(PageSize(size as usize)),
    }
  }
  pub fn size(self) -> usize { self.0 }
}

/// The real thing, backed by `libc`.
#[derive(Clone,Copy,Debug)]
pub struct Unix {
  page: PageSize,
  prot: c_int,
}

impl Default for Unix {
  fn default() -> Self {
    // A failing sysconf is not worth refusing to start over.
    let page = PageSize::get().unwrap_or(PageSize(4096));
    Unix { page, prot: PROT_READ | PROT_WRITE }
  }
}

impl Unix {
  pub fn new() -> io::Result<Unix> {
    Ok(Unix { page: PageSize::get()?, prot: PROT_READ | PROT_WRITE })
  }

  /// Maps stacks executable, as `PT_GNU_STACK` asks some binaries to.
  pub fn with_executable_stack(mut self, executable: bool) -> Self {
    self.prot = if executable { PROT_READ | PROT_WRITE | PROT_EXEC } else { PROT_READ | PROT_WRITE };
    self
  }

  pub fn stack_protection(&self) -> c_int { self.prot }
}

impl Os for Unix {
  fn page_size(&self) -> usize { self.page.size() }

  fn stack_limit(&self) -> io::Result<Option<usize>> {
    let mut rl = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    match unsafe { libc::getrlimit(libc::RLIMIT_STACK, &mut rl) } {
      0 if rl.rlim_cur == libc::RLIM_INFINITY => Ok(None),
      0 => Ok(Some(usize::try_from(rl.rlim_cur).unwrap_or(usize::MAX))),
      _ => Err(io::Error::last_os_error()),
    }
  }

  fn map_stack(&self, len: usize) -> io::Result<usize> {
    match unsafe { libc::mmap(null_mut(), len, self.prot, STACK_FLAGS, -1, 0) } {
      MAP_FAILED => Err(io::Error::last_os_error()),
      not_ptr if not_ptr.is_null() => panic!("{}", MMAP_RETURNED_NULL),
      ptr => Ok(ptr as usize),
    }
  }

  fn protect_none(&self, addr: usize, len: usize) -> io::Result<()> {
    match unsafe { libc::mprotect(addr as *mut _, len, PROT_NONE) } {
      0 => Ok(()),
      _ => Err(io::Error::last_os_error()),
    }
  }

  fn unmap(&self, addr: usize, len: usize) -> io::Result<()> {
    match unsafe { libc::munmap(addr as *mut _, len) } {
      0 => Ok(()),
      _ => Err(io::Error::last_os_error()),
    }
  }

  #[cfg(target_os="linux")]
  fn is_threaded(&self) -> bool {
    std::fs::read_dir("/proc/self/task").map(|tasks| tasks.count() > 1).unwrap_or(false)
  }

  // Nothing portable to ask, so we take the caller's word for it.
  #[cfg(not(target_os="linux"))]
  fn is_threaded(&self) -> bool { false }
}
