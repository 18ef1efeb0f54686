use core::fmt;

mod bootstrap;
pub use bootstrap::*;

/// Identifies a safe stack by where it starts and how big it is.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,Default)]
pub struct StackIdentity {
  pub base: usize,
  pub size: usize,
}

impl StackIdentity {
  pub const fn new(base: usize, size: usize) -> Self {
    StackIdentity { base, size }
  }

  /// Division cancels the bits that only vary within one stack while keeping
  /// same-sized stacks at different bases apart.
  ///
  /// Zero-sized identities never reach the table.
  #[inline]
  pub fn hash(&self) -> usize {
    self.base / self.size
  }

  pub fn is_empty(&self) -> bool { self.size == 0 }
}

/// A mapped range of memory we own.
#[derive(Clone,Copy,PartialEq,Eq,Default)]
pub struct Region {
  pub base: usize,
  pub len:  usize,
}

impl Region {
  /// The address one past the end. Stacks grow down from here.
  pub fn top(&self) -> usize { self.base + self.len }
}

impl fmt::Debug for Region {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Region<{:x}-{:x}>", self.base, self.top())
  }
}
