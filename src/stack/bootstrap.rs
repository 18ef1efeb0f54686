use std::io;
use log::debug;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::os_unix::Os;
use super::Region;

/// The unsafe stack of the initial context. It lives as long as the process.
///
/// ```text
/// base          base + guard                    top
/// | guard (---) | usable, grows down <--------- |
/// ```
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct MainStack {
  pub mapping: Region,
  pub guard:   usize,
}

impl MainStack {
  /// The value installed as the active unsafe stack pointer.
  pub fn top(&self) -> usize { self.mapping.top() }
  /// Lowest usable address, just above the guard.
  pub fn start(&self) -> usize { self.mapping.base + self.guard }
  /// Usable bytes above the guard.
  pub fn size(&self) -> usize { self.mapping.len - self.guard }
}

/// How big the main unsafe stack should be: whatever `RLIMIT_STACK` allows
/// the safe stack, or a million pointers if that is infinite.
pub fn main_stack_size<O: Os>(os: &O, config: &Config) -> usize {
  match os.stack_limit() {
    Ok(Some(limit)) => limit,
    Ok(None) => config.default_stack_size(),
    Err(e) => {
      debug!("getrlimit(RLIMIT_STACK) failed, using the default unsafe stack size: {}", e);
      config.default_stack_size()
    }
  }
}

/// Maps the main unsafe stack with a guard below it.
///
/// Bypasses the registry entirely; the result is never released.
pub fn allocate_main_stack<O: Os>(os: &O, config: &Config) -> Result<MainStack> {
  let size = main_stack_size(os, config);
  let guard = config.guard_size(os.page_size());
  let len = size.checked_add(guard).ok_or_else(|| Error::MapFailed {
    len: usize::MAX,
    source: io::ErrorKind::OutOfMemory.into(),
  })?;
  let base = os.map_stack(len).map_err(|source| Error::MapFailed { len, source })?;
  if let Err(e) = os.protect_none(base, guard) {
    let _ = os.unmap(base, len);
    return Err(Error::GuardFailed(e));
  }
  let stack = MainStack { mapping: Region { base, len }, guard };
  debug!("main unsafe stack {:?} ({} bytes usable, {} byte guard)", stack.mapping, size, guard);
  Ok(stack)
}
