use std::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};

/// Something that behaves like a program break: a single address that only
/// moves up, with everything below it readable and writable.
///
/// # Safety
///
/// Memory between the break returned by [`BreakSource::raise`] and that
/// break plus `increment` must be valid for reads and writes for as long as
/// the source lives, and must never be handed out again.
pub unsafe trait BreakSource {
  /// Current break, without moving it.
  fn current_break(&mut self) -> Option<NonNull<u8>>;

  /// Moves the break up by `increment` bytes and returns the previous break,
  /// or `None` if the reservation failed. A failed raise leaves the break
  /// where it was.
  fn raise(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;

  /// Moves the break back down by `decrement` bytes. Only used to undo a
  /// raise that landed somewhere the heap cannot use. Returns whether the
  /// break moved.
  fn lower(
    &mut self,
    decrement: usize,
  ) -> bool;
}

/// The process break, moved with `sbrk(2)`.
///
/// Other code in the process (the C library allocator, for one) may move the
/// break too. The heap notices when a raise does not start at its own end,
/// gives the bytes back and treats it as a failed reservation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

fn sbrk_failed(address: *mut c_void) -> bool {
  address == usize::MAX as *mut c_void
}

unsafe impl BreakSource for Sbrk {
  fn current_break(&mut self) -> Option<NonNull<u8>> {
    let address = unsafe { sbrk(0) };
    if sbrk_failed(address) {
      return None;
    }
    NonNull::new(address.cast())
  }

  fn raise(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let increment = intptr_t::try_from(increment).ok()?;
    let address = unsafe { sbrk(increment) };
    if sbrk_failed(address) {
      return None;
    }
    NonNull::new(address.cast())
  }

  fn lower(
    &mut self,
    decrement: usize,
  ) -> bool {
    let Ok(decrement) = intptr_t::try_from(decrement) else {
      return false;
    };
    !sbrk_failed(unsafe { sbrk(-decrement) })
  }
}

/// A simulated break over a fixed, caller-owned buffer. Raising past the end
/// of the buffer fails, which makes it handy for running independent heaps
/// side by side and for exercising out-of-memory paths.
#[derive(Debug)]
pub struct BufferBreak {
  start: NonNull<u8>,
  capacity: usize,
  used: usize,
}

impl BufferBreak {
  /// # Safety
  ///
  /// `start..start + capacity` must be valid for reads and writes for the
  /// whole lifetime of the returned value and of any heap built on it.
  pub const unsafe fn new(
    start: NonNull<u8>,
    capacity: usize,
  ) -> Self {
    Self {
      start,
      capacity,
      used: 0,
    }
  }

  /// Uses a leaked or `static` word buffer, so the start is already 8-byte
  /// aligned.
  pub fn from_static(buffer: &'static mut [u64]) -> Self {
    let capacity = std::mem::size_of_val(buffer);
    let start = NonNull::from(buffer).cast::<u8>();
    unsafe { Self::new(start, capacity) }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.used
  }
}

unsafe impl BreakSource for BufferBreak {
  fn current_break(&mut self) -> Option<NonNull<u8>> {
    Some(unsafe { self.start.add(self.used) })
  }

  fn raise(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let used = self.used.checked_add(increment)?;
    if used > self.capacity {
      return None;
    }

    let previous = unsafe { self.start.add(self.used) };
    self.used = used;
    Some(previous)
  }

  fn lower(
    &mut self,
    decrement: usize,
  ) -> bool {
    match self.used.checked_sub(decrement) {
      Some(used) => {
        self.used = used;
        true
      }
      None => false,
    }
  }
}
