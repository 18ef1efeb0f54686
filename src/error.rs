use std::io;
use libc::c_int;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can stop an unsafe stack from being handed out.
#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to map an unsafe stack of {len} bytes: {source}")]
  MapFailed { len: usize, source: io::Error },
  #[error("failed to install the unsafe stack guard: {0}")]
  GuardFailed(io::Error),
  #[error("out of memory for registry bookkeeping")]
  ReservationFailed,
  #[error("context has an empty stack")]
  EmptyStack,
  #[error("unsafe stacks cannot be retrofitted onto a process that already has threads")]
  Threaded,
}

impl Error {
  /// True for the failures caused by the system refusing us memory.
  pub fn is_resource_exhausted(&self) -> bool {
    matches!(self, Error::MapFailed { .. } | Error::GuardFailed(_) | Error::ReservationFailed)
  }

  /// The `errno` value the C entry points report for this error.
  pub fn errno(&self) -> c_int {
    match self {
      Error::Threaded => libc::EAGAIN,
      _ => libc::ENOMEM,
    }
  }
}
