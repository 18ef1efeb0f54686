use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use crate::active::{ActivePointer, ThreadLocal};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::note::ImageInfo;
use crate::os_unix::{Os, Unix};
use crate::registry::Registry;
use crate::stack::{allocate_main_stack, MainStack};

/// Everything the unsafe stack machinery knows about one process.
///
/// The C entry points use [`global`]; tests and embedders build their own.
pub struct Runtime<O: Os = Unix, A: ActivePointer = ThreadLocal> {
  pub(crate) os:       O,
  pub(crate) active:   A,
  config:              Config,
  enabled:             AtomicBool,
  main:                Mutex<Option<MainStack>>,
  pub(crate) registry: Mutex<Registry>,
  // Mirrors `registry.len()` so releases can skip the lock when nothing is registered.
  pub(crate) live:     AtomicUsize,
}

impl<O: Os, A: ActivePointer> Runtime<O, A> {
  pub fn new(os: O, active: A, config: Config) -> Self {
    let registry = Registry::new(&config);
    Runtime {
      os,
      active,
      config,
      enabled: AtomicBool::new(false),
      main: Mutex::new(None),
      registry: Mutex::new(registry),
      live: AtomicUsize::new(0),
    }
  }

  /// Whether unsafe stacks are in use. When they are not, every wrapper
  /// passes straight through.
  pub fn is_enabled(&self) -> bool { self.enabled.load(Ordering::Acquire) }

  /// Gives the calling (initial) context its unsafe stack and turns the
  /// wrappers on.
  ///
  /// Calling it again once enabled does nothing. Processes that already run
  /// several threads are refused, since their other threads would have no
  /// unsafe stack.
  pub fn init(&self) -> Result<()> {
    let mut main = self.main.lock();
    if self.is_enabled() {
      return Ok(());
    }
    if self.os.is_threaded() {
      return Err(Error::Threaded);
    }
    let stack = allocate_main_stack(&self.os, &self.config)?;
    self.active.set(stack.top());
    self.active.set_start(stack.start());
    *main = Some(stack);
    self.enabled.store(true, Ordering::Release);
    debug!("unsafe stacks enabled, main unsafe stack top at {:#x}", stack.top());
    Ok(())
  }

  /// [`init`](Self::init), but only for images carrying the opt-in note.
  /// Returns whether unsafe stacks ended up enabled.
  pub fn init_from_image(&self, image: &ImageInfo) -> Result<bool> {
    if !image.opted_in {
      debug!("no safestack note, leaving unsafe stacks disabled");
      return Ok(self.is_enabled());
    }
    self.init().map(|()| true)
  }

  pub fn main_stack(&self) -> Option<MainStack> { *self.main.lock() }

  /// Registered contexts, read without the lock.
  pub fn live_entries(&self) -> usize { self.live.load(Ordering::Acquire) }

  /// Runs `f` with the registry locked.
  pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
    f(&self.registry.lock())
  }

  pub fn table_capacity(&self) -> usize { self.registry.lock().capacity() }

  pub fn os(&self) -> &O { &self.os }
  pub fn active(&self) -> &A { &self.active }
  pub fn config(&self) -> &Config { &self.config }
}

static IMAGE: Lazy<ImageInfo> = Lazy::new(ImageInfo::from_process);

static GLOBAL: Lazy<Runtime> = Lazy::new(|| {
  let os = Unix::default().with_executable_stack(IMAGE.executable_stack);
  Runtime::new(os, ThreadLocal, Config::from_env())
});

/// The process-wide runtime.
pub fn global() -> &'static Runtime { &GLOBAL }

/// What the running image says about itself, scanned once.
pub fn image() -> &'static ImageInfo { &IMAGE }

/// Enables unsafe stacks for this process if, and only if, it opted in.
///
/// Meant to run once, early, while the process is still single threaded.
pub fn start() -> Result<bool> {
  global().init_from_image(image())
}
