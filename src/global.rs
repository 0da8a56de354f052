//! Process-wide heap on the program break.
//!
//! Every call takes the one lock for its whole duration: an allocation may
//! touch any free block and a release may touch either physical neighbor, so
//! there is nothing finer to lock.
//!
//! Logging from inside the allocator goes through the `log` facade. When
//! [`BrkAlloc`] is the global allocator, the installed logger must not
//! allocate, or it will spin on the lock it is called under.

use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{align::ALIGNMENT, heap::Heap, source::Sbrk};

static HEAP: Mutex<Heap<Sbrk>> = Mutex::new(Heap::new());

/// Allocates at least `size` bytes from the process heap. `None` when the
/// heap could not be initialized or grown.
pub fn allocate(size: u64) -> Option<NonNull<u8>> {
  HEAP.lock().allocate(size).ok()
}

/// Returns memory obtained from [`allocate`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by [`allocate`] that has not been
/// released yet.
pub unsafe fn release(ptr: *mut u8) {
  unsafe { HEAP.lock().release(ptr) }
}

/// [`GlobalAlloc`] front end for the process heap.
///
/// ```rust,ignore
/// #[global_allocator]
/// static GLOBAL: tagalloc::BrkAlloc = tagalloc::BrkAlloc;
/// ```
///
/// Only alignments up to 8 bytes are supported; larger ones get a null
/// pointer.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrkAlloc;

unsafe impl GlobalAlloc for BrkAlloc {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    allocate(layout.size() as u64).map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { release(ptr) }
  }
}
