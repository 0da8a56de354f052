use std::mem;

use crate::{
  align::{ALIGNMENT, is_aligned},
  block::{FOOTER_SIZE, FreeLinks, HEADER_SIZE},
  error::ConfigError,
};

/// Bytes reserved from the break the first time the heap is touched.
pub const INITIAL_HEAP_SIZE: usize = 1024;

/// Bytes added to the heap each time it runs out of room.
pub const GROWTH_INCREMENT: usize = 1024;

/// Smallest usable size a block may have. Requests below it are clamped up.
pub const MIN_ALLOC_SIZE: usize = 16;

/// Sizes that shape a [`crate::Heap`]. All of them are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  initial_size: usize,
  growth_increment: usize,
  min_alloc_size: usize,
}

impl HeapConfig {
  /// Configuration built from the crate constants.
  pub const DEFAULT: Self = Self {
    initial_size: INITIAL_HEAP_SIZE,
    growth_increment: GROWTH_INCREMENT,
    min_alloc_size: MIN_ALLOC_SIZE,
  };

  /// Builds a configuration, rejecting combinations that would break block
  /// accounting.
  ///
  /// The minimum allocation must hold the two free-list links a free block
  /// keeps in its data area, and the initial reservation must hold at least
  /// one minimum block. The initial size must be a whole number of growth
  /// increments, so the heap is always a multiple of the increment.
  pub const fn new(
    initial_size: usize,
    growth_increment: usize,
    min_alloc_size: usize,
  ) -> Result<Self, ConfigError> {
    if initial_size == 0 || growth_increment == 0 || min_alloc_size == 0 {
      return Err(ConfigError::Zero);
    }
    if !is_aligned(initial_size) || !is_aligned(growth_increment) || !is_aligned(min_alloc_size) {
      return Err(ConfigError::Unaligned {
        alignment: ALIGNMENT,
      });
    }
    if min_alloc_size < mem::size_of::<FreeLinks>() {
      return Err(ConfigError::MinAllocTooSmall {
        min_alloc_size,
        required: mem::size_of::<FreeLinks>(),
      });
    }
    let min_block_size = HEADER_SIZE + min_alloc_size + FOOTER_SIZE;
    if initial_size < min_block_size {
      return Err(ConfigError::InitialTooSmall {
        initial_size,
        required: min_block_size,
      });
    }
    if initial_size % growth_increment != 0 {
      return Err(ConfigError::InitialNotMultiple {
        initial_size,
        growth_increment,
      });
    }

    Ok(Self {
      initial_size,
      growth_increment,
      min_alloc_size,
    })
  }

  pub const fn initial_size(&self) -> usize {
    self.initial_size
  }

  pub const fn growth_increment(&self) -> usize {
    self.growth_increment
  }

  pub const fn min_alloc_size(&self) -> usize {
    self.min_alloc_size
  }

  /// Header + minimum data + footer. A split only happens when the leftover
  /// can hold one of these.
  pub const fn min_block_size(&self) -> usize {
    HEADER_SIZE + self.min_alloc_size + FOOTER_SIZE
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}
