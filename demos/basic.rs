use safestack::*;

#[cfg(all(target_os="linux", target_env="gnu"))]
mod coro {
  use core::ptr::null_mut;
  use safestack::switch::ucontext::{UContext, Ucontext};
  use safestack::*;

  // Leaked boxes: both contexts must stay put while either can be resumed.
  static mut MAIN: *mut UContext = null_mut();
  static mut CORO: *mut UContext = null_mut();

  extern "C" fn adder() {
    let mut n = 0usize;
    loop {
      n += 1;
      println!("coroutine step {} on unsafe stack {:#x}", n, get_active_pointer());
      unsafe { global().swap(&Ucontext, &mut *CORO, &mut *MAIN).unwrap() };
    }
  }

  pub fn run() {
    const STACK: usize = 64 * 1024;
    let rt = global();
    let base = rt.os().map_stack(STACK).unwrap();
    unsafe {
      MAIN = Box::into_raw(UContext::boxed());
      CORO = Box::into_raw(UContext::boxed());
      (*CORO).prepare(Region { base, len: STACK }, None, adder).unwrap();
      for _ in 1..10 {
        rt.swap(&Ucontext, &mut *MAIN, &mut *CORO).unwrap();
      }
    }
    println!("registered contexts: {}", rt.live_entries());
    rt.release(base, STACK).unwrap();
    println!("registered contexts after release: {}", rt.live_entries());
  }
}

fn main() {
  let image = runtime::image();
  println!("opt-in note present: {}", image.opted_in);
  // Enable regardless, so there is something to show.
  if let Err(e) = global().init() {
    println!("could not enable unsafe stacks: {}", e);
    return;
  }
  println!("main unsafe stack: {:?}", global().main_stack().map(|s| s.mapping));
  #[cfg(all(target_os="linux", target_env="gnu"))]
  coro::run();
}
