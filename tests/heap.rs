//! Allocation behavior of heaps running over fixed buffers.

use std::ptr::NonNull;

use tagalloc::{AllocError, BLOCK_OVERHEAD, BreakSource, BufferBreak, ConfigError, Heap, HeapConfig};

fn buffer_heap(bytes: usize) -> Heap<BufferBreak> {
  buffer_heap_with(bytes, HeapConfig::DEFAULT)
}

fn buffer_heap_with(
  bytes: usize,
  config: HeapConfig,
) -> Heap<BufferBreak> {
  let buffer = Box::leak(vec![0u64; bytes / 8].into_boxed_slice());
  Heap::with_config(BufferBreak::from_static(buffer), config)
}

fn addr(ptr: NonNull<u8>) -> usize {
  ptr.as_ptr() as usize
}

/// Buffer break where other code grabs 8 bytes right before the heap's
/// `intrude_on`-th raise (counting from 1).
struct Intruding {
  inner: BufferBreak,
  raises: usize,
  intrude_on: usize,
}

impl Intruding {
  fn new(
    bytes: usize,
    intrude_on: usize,
  ) -> Self {
    let buffer = Box::leak(vec![0u64; bytes / 8].into_boxed_slice());
    Self {
      inner: BufferBreak::from_static(buffer),
      raises: 0,
      intrude_on,
    }
  }
}

unsafe impl BreakSource for Intruding {
  fn current_break(&mut self) -> Option<NonNull<u8>> {
    self.inner.current_break()
  }

  fn raise(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    self.raises += 1;
    if self.raises == self.intrude_on {
      self.inner.raise(8)?;
    }
    self.inner.raise(increment)
  }

  fn lower(
    &mut self,
    decrement: usize,
  ) -> bool {
    self.inner.lower(decrement)
  }
}

#[test]
fn test_allocations_are_contiguous() {
  let mut heap = buffer_heap(64 * 1024);

  let mut prev: Option<NonNull<u8>> = None;
  for i in 2..100u64 {
    let ptr = heap.allocate(i << 3).unwrap();
    if let Some(prev) = prev {
      let prev_end = addr(prev) + unsafe { heap.usable_size(prev) } + BLOCK_OVERHEAD;
      assert_eq!(prev_end, addr(ptr), "gap before block of {} bytes", i << 3);
    }
    prev = Some(ptr);
  }

  let stats = heap.verify().unwrap();
  assert_eq!(stats.used_blocks, 98);
  assert_eq!(stats.free_blocks, 0);
}

#[test]
fn test_release_then_allocate_reuses_address() {
  let mut heap = buffer_heap(64 * 1024);

  // The second block stays live, so the next round's release has a used
  // neighbor and nothing coalesces.
  for i in 2..100u64 {
    let first = heap.allocate(i << 3).unwrap();
    unsafe { heap.release(first.as_ptr()) };
    let second = heap.allocate(i << 3).unwrap();

    assert_eq!(first, second, "size {}", i << 3);
  }

  assert!(heap.verify().is_ok());
}

#[test]
fn test_every_address_is_aligned() {
  let mut heap = buffer_heap(64 * 1024);

  for size in [0, 1, 3, 7, 8, 9, 15, 17, 33, 100, 1000, 1500] {
    let ptr = heap.allocate(size).unwrap();
    assert_eq!(addr(ptr) % 8, 0, "size {size}");
    assert_eq!(unsafe { heap.usable_size(ptr) } % 8, 0);
  }
}

#[test]
fn test_minimum_size_floor() {
  let mut heap = buffer_heap(4096);

  let zero = heap.allocate(0).unwrap();
  let one = heap.allocate(1).unwrap();

  unsafe {
    assert_eq!(heap.usable_size(zero), 16);
    assert_eq!(heap.usable_size(one), 16);
  }
  assert_eq!(addr(one) - addr(zero), 16 + BLOCK_OVERHEAD);
}

#[test]
fn test_coalesce_with_both_neighbors() {
  let mut heap = buffer_heap(4096);

  let a = heap.allocate(24).unwrap();
  let b = heap.allocate(24).unwrap();
  let c = heap.allocate(24).unwrap();
  let _guard = heap.allocate(24).unwrap();

  unsafe {
    heap.release(a.as_ptr());
    heap.release(c.as_ptr());
  }
  assert_eq!(heap.free_blocks().len(), 2);

  unsafe { heap.release(b.as_ptr()) };

  // 3 * 24 bytes plus two reclaimed header/footer pairs.
  assert_eq!(heap.free_blocks(), vec![(a, 104)]);
  let stats = heap.verify().unwrap();
  assert_eq!(stats.free_blocks, 1);
  assert_eq!(stats.free_bytes, 104);
  assert_eq!(stats.used_blocks, 1);
}

#[test]
fn test_coalesce_with_one_neighbor() {
  let mut heap = buffer_heap(4096);

  let a = heap.allocate(24).unwrap();
  let b = heap.allocate(40).unwrap();
  let c = heap.allocate(24).unwrap();
  let d = heap.allocate(56).unwrap();
  let _guard = heap.allocate(16).unwrap();

  unsafe {
    heap.release(a.as_ptr());
    heap.release(b.as_ptr());
  }
  assert_eq!(heap.free_blocks(), vec![(a, 24 + 40 + BLOCK_OVERHEAD)]);

  unsafe {
    heap.release(d.as_ptr());
    heap.release(c.as_ptr());
  }

  // c joins both the merged a+b on its left and d on its right.
  assert_eq!(
    heap.free_blocks(),
    vec![(a, 24 + 40 + 24 + 56 + 3 * BLOCK_OVERHEAD)]
  );
  assert!(heap.verify().is_ok());
}

#[test]
fn test_releasing_last_block_then_growing_again() {
  let mut heap = buffer_heap(4096);

  let a = heap.allocate(16).unwrap();
  let b = heap.allocate(16).unwrap();
  unsafe {
    heap.release(b.as_ptr());
    heap.release(a.as_ptr());
  }
  assert_eq!(heap.free_blocks(), vec![(a, 16 + 16 + BLOCK_OVERHEAD)]);

  // Too big for the merged block, so it is carved after it.
  let c = heap.allocate(200).unwrap();
  assert_eq!(addr(c), addr(a) + 48 + BLOCK_OVERHEAD);
  assert!(heap.verify().is_ok());
}

#[test]
fn test_release_null_is_noop() {
  let mut heap = buffer_heap(4096);

  unsafe { heap.release(std::ptr::null_mut()) };
  assert_eq!(heap.bounds(), None);

  let _ptr = heap.allocate(32).unwrap();
  unsafe { heap.release(std::ptr::null_mut()) };
  assert!(heap.free_blocks().is_empty());
  assert_eq!(heap.verify().unwrap().used_blocks, 1);
}

#[test]
fn test_growth_in_whole_increments() {
  let mut heap = buffer_heap(16 * 1024);

  let mut blocks = Vec::new();
  for _ in 0..5 {
    blocks.push(heap.allocate(1500).unwrap());
    let (start, end) = heap.bounds().unwrap();
    assert_eq!((end - start) % 1024, 0);
    assert!(end - start >= blocks.len() * (1504 + BLOCK_OVERHEAD));
  }

  let (start, end) = heap.bounds().unwrap();
  assert_eq!(end - start, 8 * 1024);
  assert_eq!(heap.verify().unwrap().used_blocks, 5);
}

#[test]
fn test_growth_failure_keeps_heap_usable() {
  let mut heap = buffer_heap(4096);

  let a = heap.allocate(1000).unwrap();
  let _b = heap.allocate(1000).unwrap();
  let before = heap.free_blocks();

  assert_eq!(
    heap.allocate(5000),
    Err(AllocError::OutOfMemory { requested: 5000 })
  );
  assert_eq!(heap.free_blocks(), before);
  let stats = heap.verify().unwrap();
  assert_eq!(stats.used_blocks, 2);
  assert_eq!(stats.heap_size, 4096);

  // Already-free memory is still handed out.
  unsafe { heap.release(a.as_ptr()) };
  assert_eq!(heap.allocate(500).unwrap(), a);
  assert!(heap.verify().is_ok());
}

#[test]
fn test_foreign_break_move_gives_increment_back() {
  let mut heap = Heap::with_source(Intruding::new(64 * 1024, 2));

  let a = heap.allocate(1000).unwrap();
  assert_eq!(heap.source().inner.used(), 1024);

  for _ in 0..5 {
    assert_eq!(
      heap.allocate(2000),
      Err(AllocError::OutOfMemory { requested: 2000 })
    );
    // Only the 8 foreign bytes sit above the heap.
    assert_eq!(heap.source().inner.used(), 1032);
  }
  let (start, end) = heap.bounds().unwrap();
  assert_eq!(end - start, 1024);

  unsafe { heap.release(a.as_ptr()) };
  assert_eq!(heap.allocate(500).unwrap(), a);
  assert!(heap.verify().is_ok());
}

#[test]
fn test_foreign_break_move_before_initialization() {
  let mut source = Intruding::new(64 * 1024, 1);
  let origin = addr(source.current_break().unwrap());
  let mut heap = Heap::with_source(source);

  let a = heap.allocate(16).unwrap();
  let (start, end) = heap.bounds().unwrap();
  assert_eq!(start, origin + 8);
  assert_eq!(end - start, 1024);
  assert_eq!(addr(a), start + 8);

  // The region ends at the break, so growth still works.
  heap.allocate(2000).unwrap();
  let (start, end) = heap.bounds().unwrap();
  assert_eq!(end - start, 2 * 1024);
  assert_eq!(heap.source().inner.used(), 8 + 2 * 1024);
  assert!(heap.verify().is_ok());
}

#[test]
fn test_reuse_without_split() {
  let mut heap = buffer_heap(4096);

  let _a = heap.allocate(16).unwrap();
  let b = heap.allocate(24).unwrap();
  let _c = heap.allocate(32).unwrap();

  unsafe { heap.release(b.as_ptr()) };
  let d = heap.allocate(20).unwrap();

  assert_eq!(d, b);
  assert_eq!(unsafe { heap.usable_size(d) }, 24);
  assert!(heap.free_blocks().is_empty());
}

#[test]
fn test_reuse_with_split() {
  let mut heap = buffer_heap(4096);

  let _a = heap.allocate(16).unwrap();
  let b = heap.allocate(128).unwrap();
  let _c = heap.allocate(32).unwrap();

  unsafe { heap.release(b.as_ptr()) };
  let d = heap.allocate(20).unwrap();

  assert_eq!(d, b);
  assert_eq!(unsafe { heap.usable_size(d) }, 24);
  let leftover = 128 - 24 - BLOCK_OVERHEAD;
  let remainder = unsafe { NonNull::new_unchecked(b.as_ptr().add(24 + BLOCK_OVERHEAD)) };
  assert_eq!(heap.free_blocks(), vec![(remainder, leftover)]);

  let e = heap.allocate(leftover as u64).unwrap();
  assert_eq!(e, remainder);
  assert!(heap.free_blocks().is_empty());
  assert_eq!(heap.verify().unwrap().used_blocks, 4);
}

#[test]
fn test_no_split_below_minimum_block() {
  let mut heap = buffer_heap(4096);

  let _a = heap.allocate(16).unwrap();
  // Leaves 24 bytes, less than header + 16 + footer.
  let b = heap.allocate(64).unwrap();
  let _c = heap.allocate(16).unwrap();

  unsafe { heap.release(b.as_ptr()) };
  let d = heap.allocate(40).unwrap();

  assert_eq!(d, b);
  assert_eq!(unsafe { heap.usable_size(d) }, 64);
}

#[test]
fn test_independent_heaps() {
  let mut left = buffer_heap(4096);
  let mut right = buffer_heap(4096);

  let l = left.allocate(64).unwrap();
  let r = right.allocate(64).unwrap();
  assert_ne!(l, r);

  unsafe { left.release(l.as_ptr()) };
  assert_eq!(left.free_blocks().len(), 1);
  assert!(right.free_blocks().is_empty());
}

#[test]
fn test_custom_config() {
  assert_eq!(
    HeapConfig::new(64, 256, 32),
    Err(ConfigError::InitialNotMultiple {
      initial_size: 64,
      growth_increment: 256,
    })
  );

  let config = HeapConfig::new(128, 64, 32).unwrap();
  let mut heap = buffer_heap_with(4096, config);
  assert_eq!(heap.config(), config);

  let small = heap.allocate(1).unwrap();
  assert_eq!(unsafe { heap.usable_size(small) }, 32);
  let (start, end) = heap.bounds().unwrap();
  assert_eq!(end - start, 128);

  // 48 + 120 bytes need one more 64-byte increment.
  heap.allocate(100).unwrap();
  let (start, end) = heap.bounds().unwrap();
  assert_eq!(end - start, 128 + 64);
  assert!(heap.verify().is_ok());
}

#[test]
fn test_mixed_workload_stays_consistent() {
  let mut heap = buffer_heap(1024 * 1024);
  let mut live: Vec<NonNull<u8>> = Vec::new();

  // Deterministic pseudo-random pattern.
  let mut seed = 0x2545_f491_4f6c_dd1du64;
  for round in 0..2000 {
    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;

    if live.is_empty() || seed % 3 != 0 {
      let size = seed % 700;
      let ptr = heap.allocate(size).unwrap();
      unsafe { ptr.as_ptr().write_bytes(round as u8, size as usize) };
      live.push(ptr);
    } else {
      let index = (seed as usize / 3) % live.len();
      let ptr = live.swap_remove(index);
      unsafe { heap.release(ptr.as_ptr()) };
    }

    if round % 100 == 0 {
      heap.verify().unwrap();
    }
  }

  for ptr in live.drain(..) {
    unsafe { heap.release(ptr.as_ptr()) };
  }
  let stats = heap.verify().unwrap();
  assert_eq!(stats.used_blocks, 0);
  assert_eq!(stats.free_blocks, 1);
}
