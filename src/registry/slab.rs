use core::mem::size_of;
use log::trace;
use crate::error::{Error, Result};
use crate::os_unix::Os;
use crate::stack::{Region, StackIdentity};
use super::list::{self, LinkStore, Links};

/// A stable handle to a slab slot.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash)]
pub struct EntryId(u32);

impl EntryId {
  pub(crate) const NIL: EntryId = EntryId(u32::MAX);

  pub(crate) fn new(index: usize) -> Self { EntryId(index as u32) }
  pub fn index(self) -> usize { self.0 as usize }
}

/// A safe stack we have seen and the unsafe stack we mapped for it.
#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub struct Entry {
  pub identity:     StackIdentity,
  pub unsafe_stack: Region,
}

impl Entry {
  /// Where the unsafe stack pointer starts for a context that has never run.
  pub fn top(&self) -> usize { self.unsafe_stack.top() }
}

#[derive(Clone,Copy)]
struct Slot {
  entry: Entry,
  links: Links,
}

impl Default for Slot {
  fn default() -> Self { Slot { entry: Entry::default(), links: Links::UNLINKED } }
}

/// Hands out registry entries from fixed-size blocks that are never given back.
pub struct Slab {
  blocks:    Vec<Box<[Slot]>>,
  per_block: usize,
  free:      Option<EntryId>,
  free_len:  usize,
}

impl Slab {
  /// `block_size` is in bytes; each block holds as many slots as fit.
  pub fn new(block_size: usize) -> Self {
    Slab {
      blocks: Vec::new(),
      per_block: (block_size / size_of::<Slot>()).max(1),
      free: None,
      free_len: 0,
    }
  }

  /// Takes an unused entry, growing by one block if none are left.
  pub fn alloc<O: Os>(&mut self, os: &O) -> Result<EntryId> {
    if self.free.is_none() {
      self.grow(os)?;
    }
    let mut head = self.free;
    let id = list::pop_front(self, &mut head).ok_or(Error::ReservationFailed)?;
    self.free = head;
    self.free_len -= 1;
    Ok(id)
  }

  /// Puts `id` back on the free list.
  pub fn free(&mut self, id: EntryId) {
    self.slot_mut(id).entry = Entry::default();
    let mut head = self.free;
    list::append(self, &mut head, id);
    self.free = head;
    self.free_len += 1;
  }

  fn grow<O: Os>(&mut self, os: &O) -> Result<()> {
    let first = self.blocks.len() * self.per_block;
    if first + self.per_block >= EntryId::NIL.index() {
      return Err(Error::ReservationFailed);
    }
    self.blocks.try_reserve(1).map_err(|_| Error::ReservationFailed)?;
    let mut block = os.reserve::<Slot>(self.per_block).map_err(|_| Error::ReservationFailed)?;
    block.resize(self.per_block, Slot::default());
    self.blocks.push(block.into_boxed_slice());

    let mut head = self.free;
    for index in first..first + self.per_block {
      list::append(self, &mut head, EntryId::new(index));
    }
    self.free = head;
    self.free_len += self.per_block;
    trace!("registry slab grew to {} blocks of {} entries", self.blocks.len(), self.per_block);
    Ok(())
  }

  pub fn get(&self, id: EntryId) -> &Entry { &self.slot(id).entry }
  pub fn get_mut(&mut self, id: EntryId) -> &mut Entry { &mut self.slot_mut(id).entry }

  /// Number of blocks reserved so far.
  pub fn blocks(&self) -> usize { self.blocks.len() }
  pub fn entries_per_block(&self) -> usize { self.per_block }
  /// Entries sitting on the free list.
  pub fn free_len(&self) -> usize { self.free_len }

  fn slot(&self, id: EntryId) -> &Slot {
    &self.blocks[id.index() / self.per_block][id.index() % self.per_block]
  }

  fn slot_mut(&mut self, id: EntryId) -> &mut Slot {
    let per_block = self.per_block;
    &mut self.blocks[id.index() / per_block][id.index() % per_block]
  }
}

impl LinkStore for Slab {
  fn links(&self, id: EntryId) -> Links { self.slot(id).links }
  fn links_mut(&mut self, id: EntryId) -> &mut Links { &mut self.slot_mut(id).links }
}
