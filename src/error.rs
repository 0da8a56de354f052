use thiserror::Error;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum AllocError {
  /// The first reservation from the break failed. The heap stays unusable.
  #[error("heap could not be initialized")]
  Uninitialized,
  /// The heap had to grow and the break refused to move.
  #[error("out of memory while allocating {requested} bytes")]
  OutOfMemory { requested: u64 },
  /// The request does not fit in the address space once metadata is added.
  #[error("request of {requested} bytes is too large")]
  TooLarge { requested: u64 },
}

/// Rejected [`crate::HeapConfig`] values.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
  #[error("heap sizes must be positive")]
  Zero,
  #[error("heap sizes must be multiples of {alignment}")]
  Unaligned { alignment: usize },
  #[error("minimum allocation of {min_alloc_size} bytes cannot hold free-list links ({required} bytes)")]
  MinAllocTooSmall {
    min_alloc_size: usize,
    required: usize,
  },
  #[error("initial heap of {initial_size} bytes cannot hold a minimum block ({required} bytes)")]
  InitialTooSmall { initial_size: usize, required: usize },
  #[error("initial heap of {initial_size} bytes is not a multiple of the {growth_increment}-byte growth increment")]
  InitialNotMultiple {
    initial_size: usize,
    growth_increment: usize,
  },
}

/// A broken heap invariant found by [`crate::Heap::verify`].
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum CorruptionError {
  #[error("block at {address:#x} has header size {header} but footer size {footer}")]
  TagMismatch {
    address: usize,
    header: usize,
    footer: usize,
  },
  #[error("block at {address:#x} has usable size {size}, below the minimum or unaligned")]
  BadSize { address: usize, size: usize },
  #[error("free blocks at {address:#x} and its successor are adjacent")]
  UncoalescedNeighbors { address: usize },
  #[error("block at {address:#x} runs past the heap end")]
  OutOfBounds { address: usize },
  #[error("walk reached {found:#x} without meeting the last block at {expected:#x}")]
  LastBlockMismatch { found: usize, expected: usize },
  #[error("first block is not at the heap start {start:#x}")]
  FirstBlockMismatch { start: usize },
  #[error("free-list entry at {address:#x} is not a free block inside the heap")]
  FreeListMismatch { address: usize },
  #[error("free list holds {listed} blocks but {flagged} blocks are flagged free")]
  FreeListCount { listed: usize, flagged: usize },
}
