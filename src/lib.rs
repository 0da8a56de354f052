//! # tagalloc - A Boundary-Tag Memory Allocator
//!
//! This crate provides a **first-fit free-list allocator** that manages a
//! single heap region grown from the program break (`sbrk(2)`), with
//! boundary tags for constant-time coalescing.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP MEMORY                               │
//!   │                                                                      │
//!   │   ┌─────┬──────────┬─────┬──────────────┬─────┬──────────────────┐   │
//!   │   │ A1  │   free   │ A3  │     free     │ A5  │   not carved     │   │
//!   │   └─────┴──────────┴─────┴──────────────┴─────┴──────────────────┘   │
//!   │   ▲          ▲                   ▲         ▲                    ▲    │
//!   │   │          └──── free list ────┘         │                    │    │
//!   │  base                                 last block           heap end  │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: first free block that fits (split if the rest is big enough),
//!             otherwise carve after the last block, growing the heap.
//!   release:  merge with free physical neighbors, push on the free list.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block layout, tags and neighbor lookup (internal)
//!   ├── config     - Heap sizes and their validation
//!   ├── error      - Error types
//!   ├── freelist   - Doubly linked list of free blocks (internal)
//!   ├── global     - Process-wide heap and GlobalAlloc front end
//!   ├── heap       - Heap: allocate, release, verify
//!   └── source     - Break sources (sbrk, fixed buffer)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tagalloc::Heap;
//!
//! fn main() {
//!     let mut heap = Heap::new();
//!
//!     let ptr = heap.allocate(64).unwrap();
//!     unsafe {
//!         ptr.cast::<u64>().write(42);
//!         heap.release(ptr.as_ptr());
//!     }
//! }
//! ```
//!
//! A heap can also run over a plain buffer, which is what the tests do:
//!
//! ```rust
//! use tagalloc::{BufferBreak, Heap};
//!
//! let buffer = Box::leak(vec![0u64; 512].into_boxed_slice());
//! let mut heap = Heap::with_source(BufferBreak::from_static(buffer));
//!
//! let first = heap.allocate(24).unwrap();
//! unsafe { heap.release(first.as_ptr()) };
//! assert_eq!(heap.allocate(24).unwrap(), first);
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   ┌──────────────┬────────────────────────────────┬──────────────┐
//!   │    Header    │            Data                │    Footer    │
//!   │ size | free  │  size bytes, 8-byte aligned    │ size | free  │
//!   │   8 bytes    │  (free: next/prev links here)  │   8 bytes    │
//!   └──────────────┴────────────────────────────────┴──────────────┘
//!                  ▲
//!                  └── Pointer returned to user
//! ```
//!
//! The footer repeats the header, so the block before any header can be
//! found by reading the 8 bytes right in front of it.
//!
//! ## Limitations
//!
//! - **Single heap lock**: the global heap serializes every call
//! - **Grow only**: memory is never given back to the OS
//! - **8-byte alignment**: larger alignments are not supported
//! - **Unix-only break**: [`Sbrk`] requires `libc` and `sbrk`
//!
//! ## Safety
//!
//! Releasing a pointer that was not returned by the same heap, or releasing
//! it twice, is undefined behavior and is not detected.

pub mod align;
mod block;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod source;

pub use config::{GROWTH_INCREMENT, HeapConfig, INITIAL_HEAP_SIZE, MIN_ALLOC_SIZE};
pub use error::{AllocError, ConfigError, CorruptionError};
pub use global::{BrkAlloc, allocate, release};
pub use heap::{Heap, HeapStats};
pub use source::{BreakSource, BufferBreak, Sbrk};

/// Header plus footer bytes around every block.
pub const BLOCK_OVERHEAD: usize = block::OVERHEAD;
