//! Tunables for the unsafe stack runtime.
//!
//! Every value has a sensible default and may be overridden programmatically
//! or through the environment.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SAFESTACK_DEFAULT_STACK_WORDS` | Main unsafe stack size in words when `RLIMIT_STACK` is infinite | 1048576 |
//! | `SAFESTACK_MIN_GUARD_SIZE` | Smallest guard region below the main unsafe stack | 4096 |
//! | `SAFESTACK_BLOCK_SIZE` | Bytes reserved per registry allocator block | 16384 |

use std::env;

/// Prime bucket counts. Stacks are page multiples, so the small primes are
/// left out.
pub const TABLE_SIZES: &[usize] = &[
  389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433, 1572869,
  3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611, 402653189, 805306457,
  1610612741,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
  /// The main unsafe stack is this many pointers big unless `RLIMIT_STACK` is finite.
  pub default_stack_words: usize,
  /// Lower bound on the guard region. The page size wins if larger.
  pub min_guard_size: usize,
  /// How many bytes worth of registry entries to reserve at once.
  pub block_size: usize,
  /// Ascending bucket counts the registry grows through.
  pub table_sizes: &'static [usize],
}

impl Default for Config {
  fn default() -> Self {
    Config {
      default_stack_words: 1 << 20,
      min_guard_size: 4096,
      block_size: 1 << 14,
      table_sizes: TABLE_SIZES,
    }
  }
}

impl Config {
  /// Defaults, overridden by any `SAFESTACK_*` variables that parse.
  pub fn from_env() -> Self {
    let mut config = Config::default();
    if let Some(words) = env_usize("SAFESTACK_DEFAULT_STACK_WORDS") {
      config.default_stack_words = words;
    }
    if let Some(guard) = env_usize("SAFESTACK_MIN_GUARD_SIZE") {
      config.min_guard_size = guard;
    }
    if let Some(block) = env_usize("SAFESTACK_BLOCK_SIZE") {
      config.block_size = block;
    }
    config
  }

  pub fn with_table_sizes(mut self, sizes: &'static [usize]) -> Self {
    self.table_sizes = sizes;
    self
  }

  pub fn with_block_size(mut self, size: usize) -> Self {
    self.block_size = size;
    self
  }

  /// Size of the main unsafe stack when the resource limit does not say otherwise.
  pub fn default_stack_size(&self) -> usize {
    core::mem::size_of::<usize>() * self.default_stack_words
  }

  pub fn guard_size(&self, page_size: usize) -> usize {
    page_size.max(self.min_guard_size)
  }
}

fn env_usize(name: &str) -> Option<usize> {
  env::var(name).ok().and_then(|s| s.trim().parse().ok()).filter(|&n| n > 0)
}
