use std::ptr::NonNull;

use libc::sbrk;
use tagalloc::{BLOCK_OVERHEAD, Heap};

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  let mut heap = Heap::new();
  let mut failures = 0;

  unsafe {
    print_program_break("start");

    // --------------------------------------------------------------------
    // 1) Growing sizes with no release in between must be packed with no
    //    gaps: each block starts right after the previous footer.
    // --------------------------------------------------------------------
    let mut prev: Option<NonNull<u8>> = None;
    for i in 2..200u64 {
      let Ok(ptr) = heap.allocate(i << 3) else {
        println!("[1] allocation of {} bytes failed", i << 3);
        failures += 1;
        break;
      };
      if let Some(prev) = prev {
        let expected = prev.as_ptr() as usize + heap.usable_size(prev) + BLOCK_OVERHEAD;
        if expected != ptr.as_ptr() as usize {
          println!("[1] prev: {prev:p}, expected next at {expected:#x}, got {ptr:p}");
          failures += 1;
        }
      }
      prev = Some(ptr);
    }
    print_program_break("after contiguous run");

    // --------------------------------------------------------------------
    // 2) allocate -> release -> allocate must hand back the same address.
    // --------------------------------------------------------------------
    for i in 2..200u64 {
      let (Ok(first), Ok(_second)) = (heap.allocate(i << 3), heap.allocate(i << 3)) else {
        failures += 1;
        break;
      };
      heap.release(first.as_ptr());
      let Ok(again) = heap.allocate(i << 3) else {
        failures += 1;
        break;
      };
      if first != again {
        println!("[2] first: {first:p}, again: {again:p}");
        failures += 1;
      }
    }
    print_program_break("after reuse run");
  }

  match heap.verify() {
    Ok(stats) => println!("\nheap: {stats:?}"),
    Err(error) => {
      println!("\nheap corrupted: {error}");
      failures += 1;
    }
  }

  println!("{failures} failure(s)");
  if failures > 0 {
    std::process::exit(1);
  }
}
