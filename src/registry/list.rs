//! Circular doubly linked lists threaded through slab slots by index.
//!
//! A list is just its head. Every slot carries one pair of links, so a slot
//! can sit in at most one list at a time.
use super::slab::EntryId;

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub(crate) struct Links {
  pub prev: EntryId,
  pub next: EntryId,
}

impl Links {
  pub const UNLINKED: Links = Links { prev: EntryId::NIL, next: EntryId::NIL };
}

pub(crate) trait LinkStore {
  fn links(&self, id: EntryId) -> Links;
  fn links_mut(&mut self, id: EntryId) -> &mut Links;
}

/// Inserts `item` just before `head`, i.e. at the tail.
pub(crate) fn append<S: LinkStore>(store: &mut S, head: &mut Option<EntryId>, item: EntryId) {
  match *head {
    None => {
      *store.links_mut(item) = Links { prev: item, next: item };
      *head = Some(item);
    }
    Some(first) => {
      let last = store.links(first).prev;
      *store.links_mut(item) = Links { prev: last, next: first };
      store.links_mut(last).next = item;
      store.links_mut(first).prev = item;
    }
  }
}

/// Inserts `item` and makes it the new head.
pub(crate) fn push_front<S: LinkStore>(store: &mut S, head: &mut Option<EntryId>, item: EntryId) {
  append(store, head, item);
  *head = Some(item);
}

/// Unlinks `item`, which must currently be in the list starting at `head`.
pub(crate) fn remove<S: LinkStore>(store: &mut S, head: &mut Option<EntryId>, item: EntryId) {
  let Links { prev, next } = store.links(item);
  if next == item {
    *head = None;
  } else {
    store.links_mut(prev).next = next;
    store.links_mut(next).prev = prev;
    if *head == Some(item) {
      *head = Some(next);
    }
  }
  *store.links_mut(item) = Links::UNLINKED;
}

pub(crate) fn pop_front<S: LinkStore>(store: &mut S, head: &mut Option<EntryId>) -> Option<EntryId> {
  let first = (*head)?;
  remove(store, head, first);
  Some(first)
}
