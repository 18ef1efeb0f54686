//! Split stacks for user-level contexts.
//!
//! Code built with stack splitting keeps return addresses and spills on the
//! ordinary ("safe") stack and moves buffers it cannot prove safe onto a
//! separately mapped, guard-paged "unsafe" stack. This crate owns the unsafe
//! stacks: it maps the one for the initial context at startup and pairs
//! every other context's safe stack with its own as contexts are switched
//! into, freeing it again when the safe stack is unmapped.

#[cfg(not(unix))]
compile_error!("Unsupported target platform!");

pub mod active;
pub mod config;
pub mod error;
pub mod ffi;
pub mod note;
pub mod os_unix;
pub mod registry;
pub mod runtime;
pub mod stack;
pub mod switch;

pub use active::{
  get_active_pointer, get_safe_stack_ptr, get_unsafe_stack_start, set_active_pointer, ActivePointer,
  ThreadLocal,
};
pub use config::Config;
pub use error::{Error, Result};
pub use note::ImageInfo;
pub use os_unix::{Os, Unix};
pub use registry::Registry;
pub use runtime::{global, start, Runtime};
pub use stack::{MainStack, Region, StackIdentity};
pub use switch::{Context, Primitives};
