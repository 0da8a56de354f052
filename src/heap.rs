use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
  align,
  align::{ALIGNMENT, is_aligned},
  block::{Block, OVERHEAD, merged_size, span},
  config::HeapConfig,
  error::{AllocError, CorruptionError},
  freelist::FreeList,
  source::{BreakSource, Sbrk},
};

/// Reserved span of memory. `base` is where the first block goes; `len`
/// only grows.
#[derive(Debug, Clone, Copy)]
struct Region {
  base: NonNull<u8>,
  len: usize,
}

impl Region {
  fn start(&self) -> usize {
    self.base.as_ptr() as usize
  }

  fn end(&self) -> usize {
    self.start() + self.len
  }
}

#[derive(Debug, Clone, Copy)]
enum State {
  Uninitialized,
  Ready(Region),
  /// The first reservation failed. Nothing will ever be allocated.
  Failed,
}

/// Snapshot produced by [`Heap::verify`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes reserved from the break (excluding alignment padding).
  pub heap_size: usize,
  pub used_blocks: usize,
  pub used_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
}

/// First-fit allocator with boundary tags over a region that grows through a
/// [`BreakSource`].
///
/// ```text
///   base                                                   last    heap end
///    |                                                       |         |
///    v                                                       v         v
///    +-------+--------------+-------+------------------+-------+-------+
///    | Used  |     Free     | Used  |       Free       | Used  | ..... |
///    +-------+--------------+-------+------------------+-------+-------+
///                  ^                          |
///                  +---- free list links -----+
/// ```
///
/// Blocks are packed with no gaps from the base up to the end of the last
/// block. The space between the last block and the heap end is not a block;
/// new blocks are carved from it when the free list has nothing that fits.
/// After every [`Heap::release`] no two neighbors are both free.
///
/// The heap is lazily initialized on the first allocation and never gives
/// memory back to its source.
pub struct Heap<B = Sbrk> {
  source: B,
  config: HeapConfig,
  state: State,
  /// Block at the heap base, once anything was ever allocated.
  first: Option<Block>,
  /// Physically last block.
  last: Option<Block>,
  free: FreeList,
}

// SAFETY: block handles only point into memory reserved by this heap, which
// nothing else touches except through pointers the heap handed out.
unsafe impl<B: Send> Send for Heap<B> {}

impl Heap<Sbrk> {
  /// Heap on the process break with the default configuration.
  pub const fn new() -> Self {
    Self::with_config(Sbrk, HeapConfig::DEFAULT)
  }
}

impl Default for Heap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<B: BreakSource> Heap<B> {
  pub const fn with_source(source: B) -> Self {
    Self::with_config(source, HeapConfig::DEFAULT)
  }

  pub const fn with_config(
    source: B,
    config: HeapConfig,
  ) -> Self {
    Self {
      source,
      config,
      state: State::Uninitialized,
      first: None,
      last: None,
      free: FreeList::new(),
    }
  }

  pub fn config(&self) -> HeapConfig {
    self.config
  }

  pub fn source(&self) -> &B {
    &self.source
  }

  /// `(start, end)` addresses of the reserved region, or `None` before the
  /// first allocation and after a failed initialization.
  pub fn bounds(&self) -> Option<(usize, usize)> {
    match self.state {
      State::Ready(region) => Some((region.start(), region.end())),
      State::Uninitialized | State::Failed => None,
    }
  }

  /// Records the break as the heap base and reserves the initial size. The
  /// base is rounded up to [`ALIGNMENT`] and the padding is reserved too.
  fn initialize(&mut self) -> Result<Region, AllocError> {
    match self.reserve_initial() {
      Some(region) => {
        debug!(
          "heap initialized at {:#x}, {} bytes",
          region.start(),
          region.len
        );
        self.state = State::Ready(region);
        Ok(region)
      }
      None => {
        warn!("initial heap reservation failed, heap disabled");
        self.state = State::Failed;
        Err(AllocError::Uninitialized)
      }
    }
  }

  fn reserve_initial(&mut self) -> Option<Region> {
    let initial = self.config.initial_size();
    let current = self.source.current_break()?;
    let mut reserved = (align!(current.as_ptr() as usize) - current.as_ptr() as usize)
      .checked_add(initial)?;

    // The break may have moved between the two calls. Align from wherever
    // the raise really started and top up if that needs more padding.
    let previous = self.source.raise(reserved)?;
    let start = previous.as_ptr() as usize;
    let padding = align!(start) - start;
    if padding + initial > reserved {
      let shortfall = padding + initial - reserved;
      match self.source.raise(shortfall) {
        Some(extra) if extra.as_ptr() as usize == start + reserved => reserved += shortfall,
        Some(extra) => {
          give_back(&mut self.source, extra, shortfall);
          give_back(&mut self.source, previous, reserved);
          return None;
        }
        None => {
          give_back(&mut self.source, previous, reserved);
          return None;
        }
      }
    }

    Some(Region {
      base: unsafe { previous.add(padding) },
      len: reserved - padding,
    })
  }

  /// Extends the region by exactly one growth increment.
  fn grow(
    &mut self,
    requested: u64,
  ) -> Result<(), AllocError> {
    let State::Ready(region) = &mut self.state else {
      return Err(AllocError::Uninitialized);
    };
    let increment = self.config.growth_increment();

    match self.source.raise(increment) {
      Some(previous) if previous.as_ptr() as usize == region.end() => {
        region.len += increment;
        debug!("heap grown by {increment} bytes, now ends at {:#x}", region.end());
        Ok(())
      }
      Some(previous) => {
        warn!(
          "break moved to {:p} behind our back (heap ends at {:#x}), not growing",
          previous,
          region.end()
        );
        give_back(&mut self.source, previous, increment);
        Err(AllocError::OutOfMemory { requested })
      }
      None => {
        warn!("heap growth of {increment} bytes failed");
        Err(AllocError::OutOfMemory { requested })
      }
    }
  }

  /// Usable size a request of `requested` bytes turns into: clamped up to the
  /// minimum and rounded up to [`ALIGNMENT`].
  fn usable_size_for(
    &self,
    requested: u64,
  ) -> Result<usize, AllocError> {
    let limit = isize::MAX as usize - OVERHEAD - ALIGNMENT;
    match usize::try_from(requested) {
      Ok(size) if size <= limit => Ok(align!(size.max(self.config.min_alloc_size()))),
      _ => Err(AllocError::TooLarge { requested }),
    }
  }

  /// Returns the address of at least `size` usable bytes, 8-byte aligned.
  ///
  /// Searches the free list first (first fit) and only carves a new block
  /// from the end of the heap, growing it if needed, when nothing fits.
  pub fn allocate(
    &mut self,
    size: u64,
  ) -> Result<NonNull<u8>, AllocError> {
    let region = match self.state {
      State::Ready(region) => region,
      State::Failed => return Err(AllocError::Uninitialized),
      State::Uninitialized => self.initialize()?,
    };
    let usable = self.usable_size_for(size)?;

    unsafe {
      if let Some(block) = self.free.first_fit(usable) {
        return Ok(self.take_free(block, usable));
      }

      self.carve(region, usable, size)
    }
  }

  /// Hands out a free block, splitting off the tail when what is left over
  /// can hold a minimum block of its own.
  unsafe fn take_free(
    &mut self,
    block: Block,
    usable: usize,
  ) -> NonNull<u8> {
    unsafe {
      let available = block.size();
      self.free.remove(block);

      let leftover = available - usable;
      if leftover >= self.config.min_block_size() {
        block.write(usable, false);
        let remainder = block.next_neighbor();
        remainder.write(leftover - OVERHEAD, false);
        self.free.insert(remainder);
        if self.last == Some(block) {
          self.last = Some(remainder);
        }
        trace!(
          "split {:#x}: {usable} used, {} free at {:#x}",
          block.address(),
          leftover - OVERHEAD,
          remainder.address()
        );
      }

      block.data()
    }
  }

  /// Places a new block right after the last one.
  unsafe fn carve(
    &mut self,
    region: Region,
    usable: usize,
    requested: u64,
  ) -> Result<NonNull<u8>, AllocError> {
    unsafe {
      let block = match self.last {
        Some(last) => last.next_neighbor(),
        None => Block::at(region.base),
      };
      let needed = block.address() + span(usable);

      while needed > self.region_end() {
        self.grow(requested)?;
      }

      block.write(usable, false);
      if self.first.is_none() {
        self.first = Some(block);
      }
      self.last = Some(block);

      Ok(block.data())
    }
  }

  fn region_end(&self) -> usize {
    self.bounds().map_or(0, |(_, end)| end)
  }

  /// Gives a block back, merging it with whichever physical neighbors are
  /// free. A null pointer is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or an address returned by [`Heap::allocate`] on this
  /// heap that has not been released since.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(data) = NonNull::new(ptr) else {
      return;
    };

    unsafe {
      let block = Block::from_data(data);
      let prev = if self.first == Some(block) {
        None
      } else {
        Some(block.prev_neighbor()).filter(|prev| prev.is_free())
      };
      let next = if self.last == Some(block) {
        None
      } else {
        Some(block.next_neighbor()).filter(|next| next.is_free())
      };

      let merged = match (prev, next) {
        (Some(prev), Some(next)) => {
          self.free.remove(next);
          self.free.remove(prev);
          if self.last == Some(next) {
            self.last = Some(prev);
          }
          prev.write(merged_size(&[prev.size(), block.size(), next.size()]), false);
          prev
        }
        (Some(prev), None) => {
          self.free.remove(prev);
          if self.last == Some(block) {
            self.last = Some(prev);
          }
          prev.write(merged_size(&[prev.size(), block.size()]), false);
          prev
        }
        (None, Some(next)) => {
          self.free.remove(next);
          if self.last == Some(next) {
            self.last = Some(block);
          }
          block.write(merged_size(&[block.size(), next.size()]), false);
          block
        }
        (None, None) => block,
      };

      if merged != block || next.is_some() {
        trace!("coalesced into {:#x} ({} bytes)", merged.address(), merged.size());
      }
      self.free.insert(merged);
    }
  }

  /// Usable size of an allocated block. At least what was requested.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live address returned by [`Heap::allocate`] on this
  /// heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Block::from_data(ptr).size() }
  }

  /// Data address and usable size of every free block, in free-list order.
  pub fn free_blocks(&self) -> Vec<(NonNull<u8>, usize)> {
    unsafe {
      self
        .free
        .iter()
        .map(|block| (block.data(), block.size()))
        .collect()
    }
  }

  /// Walks every block from the base to the last one and checks the layout
  /// invariants: matching header and footer, valid sizes, no gaps, no two
  /// free neighbors, and free flags agreeing with the free list.
  pub fn verify(&self) -> Result<HeapStats, CorruptionError> {
    let State::Ready(region) = self.state else {
      return Ok(HeapStats::default());
    };
    let mut stats = HeapStats {
      heap_size: region.len,
      ..HeapStats::default()
    };

    let Some(last) = self.last else {
      if self.free.len() != 0 {
        return Err(CorruptionError::FreeListCount {
          listed: self.free.len(),
          flagged: 0,
        });
      }
      return Ok(stats);
    };
    if self.first != Some(unsafe { Block::at(region.base) }) {
      return Err(CorruptionError::FirstBlockMismatch {
        start: region.start(),
      });
    }

    unsafe {
      let mut cursor = Block::at(region.base);
      let mut prev_free: Option<Block> = None;
      loop {
        self.check_block(region, cursor)?;

        let size = cursor.size();
        if cursor.is_free() {
          if let Some(prev) = prev_free {
            return Err(CorruptionError::UncoalescedNeighbors {
              address: prev.address(),
            });
          }
          stats.free_blocks += 1;
          stats.free_bytes += size;
          prev_free = Some(cursor);
        } else {
          stats.used_blocks += 1;
          stats.used_bytes += size;
          prev_free = None;
        }

        if cursor == last {
          break;
        }
        if cursor.address() > last.address() {
          return Err(CorruptionError::LastBlockMismatch {
            found: cursor.address(),
            expected: last.address(),
          });
        }
        cursor = cursor.next_neighbor();
      }

      for block in self.free.iter() {
        if block.address() < region.start() || block.address() > last.address() || !block.is_free() {
          return Err(CorruptionError::FreeListMismatch {
            address: block.address(),
          });
        }
      }
    }

    if self.free.len() != stats.free_blocks {
      return Err(CorruptionError::FreeListCount {
        listed: self.free.len(),
        flagged: stats.free_blocks,
      });
    }

    Ok(stats)
  }

  unsafe fn check_block(
    &self,
    region: Region,
    block: Block,
  ) -> Result<(), CorruptionError> {
    let address = block.address();
    if address + OVERHEAD > region.end() {
      return Err(CorruptionError::OutOfBounds { address });
    }

    let tag = unsafe { block.tag() };
    let size = tag.size();
    if size < self.config.min_alloc_size() || !is_aligned(size) {
      return Err(CorruptionError::BadSize { address, size });
    }
    if size > region.end() - address - OVERHEAD {
      return Err(CorruptionError::OutOfBounds { address });
    }

    let footer = unsafe { block.footer_tag() };
    if footer != tag {
      return Err(CorruptionError::TagMismatch {
        address,
        header: tag.size(),
        footer: footer.size(),
      });
    }

    Ok(())
  }
}

/// Undoes a raise of `increment` bytes that started at `previous`, as long as
/// nobody moved the break after it. Otherwise the bytes stay lost.
fn give_back<B: BreakSource>(
  source: &mut B,
  previous: NonNull<u8>,
  increment: usize,
) {
  let top = previous.as_ptr() as usize + increment;
  match source.current_break() {
    Some(current) if current.as_ptr() as usize == top && source.lower(increment) => {
      trace!("gave {increment} bytes back, break at {previous:p}");
    }
    _ => warn!("could not give back {increment} bytes at {previous:p}"),
  }
}
