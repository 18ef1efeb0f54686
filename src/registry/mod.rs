//! The table from safe stack identity to the unsafe stack mapped for it.
//!
//! Buckets are heads of circular lists threaded through [`Slab`] slots, so an
//! entry is always in exactly one place: a bucket or the free list. Bucket
//! counts come from a fixed ascending sequence and only ever grow.
//!
//! A `HashMap<StackIdentity, Region>` would do the same job. The hand-rolled
//! table is kept so bucket placement, growth points and allocation failure
//! behave exactly as described here: every allocation is fallible and a
//! failed growth leaves the old table in place.
use core::mem;
use log::{trace, warn};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::os_unix::Os;
use crate::stack::{Region, StackIdentity};

mod list;
mod slab;
pub use slab::{Entry, EntryId, Slab};
use list::LinkStore;

pub struct Registry {
  slab:    Slab,
  buckets: Vec<Option<EntryId>>,
  count:   usize,
  sizes:   &'static [usize],
}

impl Registry {
  pub fn new(config: &Config) -> Self {
    Registry {
      slab: Slab::new(config.block_size),
      buckets: Vec::new(),
      count: 0,
      sizes: config.table_sizes,
    }
  }

  /// Live entries.
  pub fn len(&self) -> usize { self.count }
  pub fn is_empty(&self) -> bool { self.count == 0 }
  /// Current bucket count. Zero until the first insert.
  pub fn capacity(&self) -> usize { self.buckets.len() }
  pub fn slab(&self) -> &Slab { &self.slab }

  pub fn find(&self, identity: StackIdentity) -> Option<&Entry> {
    self.find_id(identity).map(|id| self.slab.get(id))
  }

  /// Maps an unsafe stack as big as the safe one and records it.
  ///
  /// An identity that is already present keeps its entry; nothing is mapped.
  pub fn insert<O: Os>(&mut self, os: &O, identity: StackIdentity) -> Result<&Entry> {
    if identity.is_empty() {
      return Err(Error::EmptyStack);
    }
    if let Some(id) = self.find_id(identity) {
      return Ok(self.slab.get(id));
    }
    let id = self.slab.alloc(os)?;
    let base = match os.map_stack(identity.size) {
      Ok(base) => base,
      Err(source) => {
        self.slab.free(id);
        return Err(Error::MapFailed { len: identity.size, source });
      }
    };
    let unsafe_stack = Region { base, len: identity.size };
    *self.slab.get_mut(id) = Entry { identity, unsafe_stack };
    if let Err(e) = self.link(os, id) {
      let _ = os.unmap(unsafe_stack.base, unsafe_stack.len);
      self.slab.free(id);
      return Err(e);
    }
    trace!("registered {:?} -> {:?}", identity, unsafe_stack);
    Ok(self.slab.get(id))
  }

  /// Forgets `identity`, handing back the unsafe stack for the caller to unmap.
  pub fn remove(&mut self, identity: StackIdentity) -> Option<Region> {
    let id = self.find_id(identity)?;
    let index = self.index(identity);
    list::remove(&mut self.slab, &mut self.buckets[index], id);
    self.count -= 1;
    let unsafe_stack = self.slab.get(id).unsafe_stack;
    self.slab.free(id);
    Some(unsafe_stack)
  }

  /// Every live entry, bucket by bucket.
  pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
    self.buckets.iter().flat_map(move |head| {
      let mut next = *head;
      core::iter::from_fn(move || {
        let it = next?;
        let following = self.slab.links(it).next;
        next = if Some(following) == *head { None } else { Some(following) };
        Some(self.slab.get(it))
      })
    })
  }

  fn find_id(&self, identity: StackIdentity) -> Option<EntryId> {
    if identity.is_empty() || self.count == 0 {
      return None;
    }
    let first = self.buckets[self.index(identity)]?;
    let mut it = first;
    loop {
      if self.slab.get(it).identity == identity {
        return Some(it);
      }
      it = self.slab.links(it).next;
      if it == first {
        return None;
      }
    }
  }

  fn index(&self, identity: StackIdentity) -> usize {
    identity.hash() % self.buckets.len()
  }

  /// The first size in the sequence that still exceeds the live count.
  fn best_size(&self) -> usize {
    self.sizes.iter().copied()
      .find(|&size| self.count < size)
      .or_else(|| self.sizes.last().copied())
      .unwrap_or(0)
  }

  fn link<O: Os>(&mut self, os: &O, id: EntryId) -> Result<()> {
    let best = self.best_size();
    if best > self.buckets.len() {
      self.rehash(os, best);
    }
    if self.buckets.is_empty() {
      // Growth is retried later, but with no table at all there is nowhere to put this.
      return Err(Error::ReservationFailed);
    }
    self.push(id);
    Ok(())
  }

  fn push(&mut self, id: EntryId) {
    let index = self.index(self.slab.get(id).identity);
    list::push_front(&mut self.slab, &mut self.buckets[index], id);
    self.count += 1;
  }

  fn rehash<O: Os>(&mut self, os: &O, new_size: usize) {
    let mut fresh = match os.reserve::<Option<EntryId>>(new_size) {
      Ok(fresh) => fresh,
      Err(e) => {
        warn!("registry growth to {} buckets deferred: {}", new_size, e);
        return;
      }
    };
    fresh.resize(new_size, None);
    let old = mem::replace(&mut self.buckets, fresh);
    let old_count = mem::replace(&mut self.count, 0);
    for mut head in old.iter().copied() {
      while let Some(id) = list::pop_front(&mut self.slab, &mut head) {
        self.push(id);
      }
    }
    assert_eq!(old_count, self.count, "rehash lost entries");
    trace!("registry rehashed from {} to {} buckets", old.len(), new_size);
  }
}
