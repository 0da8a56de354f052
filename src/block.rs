use std::{mem, ptr::NonNull};

/// Low bit of a [`Tag`]. Usable sizes are multiples of 8 so it is never part
/// of the size.
const FREE_BIT: u64 = 1;

/// Size word stored at both ends of a block: `usable_size | free_flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Tag(u64);

impl Tag {
  pub const fn new(
    size: usize,
    is_free: bool,
  ) -> Self {
    Self(size as u64 | is_free as u64)
  }

  #[inline]
  pub const fn size(self) -> usize {
    (self.0 & !FREE_BIT) as usize
  }

  #[inline]
  pub const fn is_free(self) -> bool {
    self.0 & FREE_BIT == FREE_BIT
  }

  /// Same size, new flag.
  #[inline]
  pub const fn with_free(
    self,
    is_free: bool,
  ) -> Self {
    Self::new(self.size(), is_free)
  }
}

/// Leading metadata of every block.
#[repr(C)]
pub(crate) struct Header {
  tag: Tag,
}

/// Trailing metadata, a copy of the header tag. Lets a block be found from
/// the address right after it.
#[repr(C)]
pub(crate) struct Footer {
  tag: Tag,
}

/// Free-list links. Only meaningful while the block is free, and stored in
/// the first bytes of its data area, so the minimum allocation must hold them.
#[repr(C)]
pub(crate) struct FreeLinks {
  pub next: Option<Block>,
  pub prev: Option<Block>,
}

pub(crate) const HEADER_SIZE: usize = mem::size_of::<Header>();

pub(crate) const FOOTER_SIZE: usize = mem::size_of::<Footer>();

/// Metadata bytes of one block. Merging two blocks reclaims exactly this.
pub(crate) const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Bytes a block with `size` usable bytes occupies in the heap.
#[inline]
pub(crate) const fn span(size: usize) -> usize {
  size + OVERHEAD
}

/// Usable size of the block obtained by merging physically adjacent blocks
/// with the given usable sizes. Every eliminated boundary gives back one
/// footer and one header.
pub(crate) fn merged_size(sizes: &[usize]) -> usize {
  let boundaries = sizes.len().saturating_sub(1);
  sizes.iter().sum::<usize>() + boundaries * OVERHEAD
}

/// Handle to a block header somewhere in the heap.
///
/// ```text
///   Used block:                         Free block:
///   +---------------------------+       +---------------------------+
///   | Header: size | 0          |       | Header: size | 1          |
///   +---------------------------+ <--+  +---------------------------+
///   |                           |    |  | FreeLinks: next, prev     |
///   |   size bytes of data      |    |  +---------------------------+
///   |                           |    |  |   rest of data (unused)   |
///   +---------------------------+    |  +---------------------------+
///   | Footer: size | 0          |    |  | Footer: size | 1          |
///   +---------------------------+    |  +---------------------------+
///                                    |
///                                    +-- address returned to the caller
/// ```
///
/// All accessors are `unsafe`: the handle must point at a header written by
/// the heap and the whole block must lie inside reserved memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Block(NonNull<Header>);

impl Block {
  /// Block whose header starts at `address`.
  #[inline]
  pub unsafe fn at(address: NonNull<u8>) -> Self {
    Self(address.cast())
  }

  /// Inverse of [`Block::data`]. This is how a released pointer is mapped
  /// back to its block.
  #[inline]
  pub unsafe fn from_data(data: NonNull<u8>) -> Self {
    unsafe { Self::at(data.sub(HEADER_SIZE)) }
  }

  /// Block whose footer starts at `footer`.
  #[inline]
  pub unsafe fn from_footer(footer: NonNull<u8>) -> Self {
    unsafe {
      let tag = footer.cast::<Footer>().as_ptr().read().tag;
      Self::at(footer.sub(tag.size() + HEADER_SIZE))
    }
  }

  #[inline]
  pub fn address(self) -> usize {
    self.0.as_ptr() as usize
  }

  #[inline]
  pub fn as_ptr(self) -> NonNull<u8> {
    self.0.cast()
  }

  #[inline]
  pub unsafe fn tag(self) -> Tag {
    unsafe { self.0.as_ptr().read().tag }
  }

  #[inline]
  pub unsafe fn footer_tag(self) -> Tag {
    unsafe { self.footer().cast::<Footer>().as_ptr().read().tag }
  }

  #[inline]
  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size() }
  }

  #[inline]
  pub unsafe fn is_free(self) -> bool {
    unsafe { self.tag().is_free() }
  }

  /// First byte handed to the caller.
  #[inline]
  pub unsafe fn data(self) -> NonNull<u8> {
    unsafe { self.as_ptr().add(HEADER_SIZE) }
  }

  /// Where the footer lives according to the header size.
  #[inline]
  pub unsafe fn footer(self) -> NonNull<u8> {
    unsafe { self.data().add(self.size()) }
  }

  /// First byte after the footer.
  #[cfg(test)]
  pub unsafe fn end(self) -> usize {
    unsafe { self.address() + span(self.size()) }
  }

  /// Writes header and footer with the same tag. The footer is placed using
  /// `size`, not whatever size the header held before.
  pub unsafe fn write(
    self,
    size: usize,
    is_free: bool,
  ) {
    let tag = Tag::new(size, is_free);
    unsafe {
      self.0.as_ptr().write(Header { tag });
      self.footer().cast::<Footer>().as_ptr().write(Footer { tag });
    }
  }

  /// Flips the free flag in both tags, leaving the size alone.
  pub unsafe fn set_free(
    self,
    is_free: bool,
  ) {
    unsafe {
      let tag = self.tag().with_free(is_free);
      self.0.as_ptr().write(Header { tag });
      self.footer().cast::<Footer>().as_ptr().write(Footer { tag });
    }
  }

  /// Block that physically follows this one. The caller must know that one
  /// exists (this is not the last block).
  #[inline]
  pub unsafe fn next_neighbor(self) -> Self {
    unsafe { Self::at(self.as_ptr().add(span(self.size()))) }
  }

  /// Block that physically precedes this one, found through the footer that
  /// ends at this header. The caller must know that one exists (this is not
  /// the first block).
  #[inline]
  pub unsafe fn prev_neighbor(self) -> Self {
    unsafe { Self::from_footer(self.as_ptr().sub(FOOTER_SIZE)) }
  }

  #[inline]
  pub unsafe fn links(self) -> *mut FreeLinks {
    unsafe { self.data().cast::<FreeLinks>().as_ptr() }
  }
}
