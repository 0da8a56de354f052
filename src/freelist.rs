use std::iter;

use crate::block::{Block, FreeLinks};

/// Unordered, doubly linked list of free blocks. The links live inside the
/// data area of each free block (see [`FreeLinks`]), so the list itself only
/// owns the head.
///
/// ```text
///   head
///    |
///    v
///  +------+  next  +------+  next  +------+
///  | Free | -----> | Free | -----> | Free | --> None
///  |      | <----- |      | <----- |      |
///  +------+  prev  +------+  prev  +------+
/// ```
///
/// Membership and the free flag move together: [`FreeList::insert`] marks a
/// block free and [`FreeList::remove`] marks it used.
pub(crate) struct FreeList {
  head: Option<Block>,
  len: usize,
}

impl FreeList {
  pub const fn new() -> Self {
    Self { head: None, len: 0 }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  #[cfg(test)]
  pub fn head(&self) -> Option<Block> {
    self.head
  }

  /// Pushes `block` to the front and flags it free in header and footer.
  ///
  /// # Safety
  ///
  /// `block` must be a valid block that is not already in the list.
  pub unsafe fn insert(
    &mut self,
    block: Block,
  ) {
    unsafe {
      block.links().write(FreeLinks {
        next: self.head,
        prev: None,
      });
      if let Some(head) = self.head {
        (*head.links()).prev = Some(block);
      }
      block.set_free(true);
    }

    self.head = Some(block);
    self.len += 1;
  }

  /// Unlinks `block` from wherever it sits and flags it used in header and
  /// footer.
  ///
  /// # Safety
  ///
  /// `block` must currently be in this list.
  pub unsafe fn remove(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let FreeLinks { next, prev } = block.links().read();

      if let Some(next) = next {
        (*next.links()).prev = prev;
      }
      if let Some(prev) = prev {
        (*prev.links()).next = next;
      }
      if self.head == Some(block) {
        self.head = next;
      }

      block.set_free(false);
    }

    self.len -= 1;
  }

  /// Walks the list from the head.
  ///
  /// # Safety
  ///
  /// The list must not be modified while the iterator is alive.
  pub unsafe fn iter(&self) -> impl Iterator<Item = Block> + '_ {
    iter::successors(self.head, |block| unsafe { (*block.links()).next })
  }

  /// First block, in list order, whose usable size is at least `size`.
  pub unsafe fn first_fit(
    &self,
    size: usize,
  ) -> Option<Block> {
    unsafe { self.iter().find(|block| block.size() >= size) }
  }
}
