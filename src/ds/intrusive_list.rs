//! Intrusive doubly linked list threaded through records owned elsewhere.
//!
//! The list itself stores only `head`, `tail` and a length. The `prev`/`next`
//! links live inside the records, which are owned by a [`LinkStorage`]
//! (normally the object store's arena) and addressed by [`SlotId`]. One
//! storage can back several lists as long as each record sits in at most one
//! list at a time, which is how ARC threads T1/T2/B1/B2 through one store.
//!
//! ## Architecture
//!
//! ```text
//!   storage (SlotArena<Record>)
//!   ┌────────┬──────────────────────────────────────────────────┐
//!   │ SlotId │ Record { .., links: Links { prev, next } }       │
//!   ├────────┼──────────────────────────────────────────────────┤
//!   │ id_1   │ { links: { prev: None,       next: Some(id_2) } }│
//!   │ id_2   │ { links: { prev: Some(id_1), next: Some(id_3) } }│
//!   │ id_3   │ { links: { prev: Some(id_2), next: None } }      │
//!   └────────┴──────────────────────────────────────────────────┘
//!
//!   list: head ─► [id_1] ◄──► [id_2] ◄──► [id_3] ◄── tail
//! ```
//!
//! ## Operations
//! - `push_front(id)` / `push_back(id)`: attach an unlinked record
//! - `unlink(id)`: detach; the record stays in storage
//! - `move_to_front(id)` / `move_to_back(id)`: detach + attach
//! - `pop_back()` / `pop_front()`: detach the tail/head and return its id
//!
//! ## Performance
//! - every operation above: O(1)
//! - `iter` / `iter_rev`: O(n)
//!
//! `debug_validate_invariants()` is available in debug/test builds.

use crate::ds::slot_arena::{SlotArena, SlotId};

/// Prev/next links embedded in a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    pub prev: Option<SlotId>,
    pub next: Option<SlotId>,
}

/// A record that carries one pair of list links.
pub trait Linked {
    fn links(&self) -> &Links;
    fn links_mut(&mut self) -> &mut Links;
}

/// Storage that resolves a [`SlotId`] to the links of a record.
pub trait LinkStorage {
    fn links(&self, id: SlotId) -> Option<&Links>;
    fn links_mut(&mut self, id: SlotId) -> Option<&mut Links>;
}

impl<T: Linked> LinkStorage for SlotArena<T> {
    fn links(&self, id: SlotId) -> Option<&Links> {
        self.get(id).map(Linked::links)
    }

    fn links_mut(&mut self, id: SlotId) -> Option<&mut Links> {
        self.get_mut(id).map(Linked::links_mut)
    }
}

/// Head/tail/len of a list whose links live in a [`LinkStorage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrusiveList {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl IntrusiveList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of linked records.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the id at the front (newest / MRU end).
    pub fn front(&self) -> Option<SlotId> {
        self.head
    }

    /// Returns the id at the back (oldest / LRU end).
    pub fn back(&self) -> Option<SlotId> {
        self.tail
    }

    /// Returns the id following `id` towards the back.
    pub fn next_of<S: LinkStorage + ?Sized>(storage: &S, id: SlotId) -> Option<SlotId> {
        storage.links(id).and_then(|l| l.next)
    }

    /// Returns the id preceding `id` towards the front.
    pub fn prev_of<S: LinkStorage + ?Sized>(storage: &S, id: SlotId) -> Option<SlotId> {
        storage.links(id).and_then(|l| l.prev)
    }

    /// Links an unlinked record at the front.
    pub fn push_front<S: LinkStorage + ?Sized>(&mut self, storage: &mut S, id: SlotId) {
        let old_head = self.head;
        let Some(links) = storage.links_mut(id) else {
            return;
        };
        links.prev = None;
        links.next = old_head;
        match old_head {
            Some(old) => {
                if let Some(head_links) = storage.links_mut(old) {
                    head_links.prev = Some(id);
                }
            },
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Links an unlinked record at the back.
    pub fn push_back<S: LinkStorage + ?Sized>(&mut self, storage: &mut S, id: SlotId) {
        let old_tail = self.tail;
        let Some(links) = storage.links_mut(id) else {
            return;
        };
        links.next = None;
        links.prev = old_tail;
        match old_tail {
            Some(old) => {
                if let Some(tail_links) = storage.links_mut(old) {
                    tail_links.next = Some(id);
                }
            },
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Detaches `id`. The caller guarantees that `id` belongs to this list.
    pub fn unlink<S: LinkStorage + ?Sized>(&mut self, storage: &mut S, id: SlotId) {
        let Some(&Links { prev, next }) = storage.links(id) else {
            return;
        };

        match prev {
            Some(prev_id) => {
                if let Some(prev_links) = storage.links_mut(prev_id) {
                    prev_links.next = next;
                }
            },
            None => self.head = next,
        }
        match next {
            Some(next_id) => {
                if let Some(next_links) = storage.links_mut(next_id) {
                    next_links.prev = prev;
                }
            },
            None => self.tail = prev,
        }

        if let Some(links) = storage.links_mut(id) {
            *links = Links::default();
        }
        self.len -= 1;
    }

    pub fn move_to_front<S: LinkStorage + ?Sized>(&mut self, storage: &mut S, id: SlotId) {
        if self.head == Some(id) {
            return;
        }
        self.unlink(storage, id);
        self.push_front(storage, id);
    }

    pub fn move_to_back<S: LinkStorage + ?Sized>(&mut self, storage: &mut S, id: SlotId) {
        if self.tail == Some(id) {
            return;
        }
        self.unlink(storage, id);
        self.push_back(storage, id);
    }

    /// Detaches the back record and returns its id.
    pub fn pop_back<S: LinkStorage + ?Sized>(&mut self, storage: &mut S) -> Option<SlotId> {
        let id = self.tail?;
        self.unlink(storage, id);
        Some(id)
    }

    /// Detaches the front record and returns its id.
    pub fn pop_front<S: LinkStorage + ?Sized>(&mut self, storage: &mut S) -> Option<SlotId> {
        let id = self.head?;
        self.unlink(storage, id);
        Some(id)
    }

    /// Iterates ids front to back.
    pub fn iter<'a, S: LinkStorage + ?Sized>(&self, storage: &'a S) -> Iter<'a, S> {
        Iter {
            storage,
            current: self.head,
            forward: true,
        }
    }

    /// Iterates ids back to front.
    pub fn iter_rev<'a, S: LinkStorage + ?Sized>(&self, storage: &'a S) -> Iter<'a, S> {
        Iter {
            storage,
            current: self.tail,
            forward: false,
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants<S: LinkStorage + ?Sized>(&self, storage: &S) {
        if self.head.is_none() || self.tail.is_none() {
            assert!(self.head.is_none());
            assert!(self.tail.is_none());
            assert_eq!(self.len, 0);
            return;
        }

        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        let mut current = self.head;
        let mut prev = None;

        while let Some(id) = current {
            assert!(seen.insert(id));
            let links = storage.links(id).expect("linked record missing");
            assert_eq!(links.prev, prev);
            if links.next.is_none() {
                assert_eq!(self.tail, Some(id));
            }
            prev = Some(id);
            current = links.next;
            count += 1;
            assert!(count <= self.len);
        }

        assert_eq!(count, self.len);
    }
}

pub struct Iter<'a, S: LinkStorage + ?Sized> {
    storage: &'a S,
    current: Option<SlotId>,
    forward: bool,
}

impl<S: LinkStorage + ?Sized> Iterator for Iter<'_, S> {
    type Item = SlotId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let links = self.storage.links(id)?;
        self.current = if self.forward { links.next } else { links.prev };
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Node {
        value: u32,
        links: Links,
    }

    impl Linked for Node {
        fn links(&self) -> &Links {
            &self.links
        }

        fn links_mut(&mut self) -> &mut Links {
            &mut self.links
        }
    }

    fn node(value: u32) -> Node {
        Node {
            value,
            links: Links::default(),
        }
    }

    fn values(list: &IntrusiveList, arena: &SlotArena<Node>) -> Vec<u32> {
        list.iter(arena)
            .map(|id| arena.get(id).unwrap().value)
            .collect()
    }

    #[test]
    fn intrusive_list_basic_ops() {
        let mut arena = SlotArena::new();
        let mut list = IntrusiveList::new();
        let a = arena.insert(node(1));
        let b = arena.insert(node(2));
        let c = arena.insert(node(3));

        list.push_front(&mut arena, a);
        list.push_back(&mut arena, b);
        list.push_back(&mut arena, c);
        assert_eq!(list.front(), Some(a));
        assert_eq!(list.back(), Some(c));
        assert_eq!(list.len(), 3);

        list.move_to_front(&mut arena, c);
        assert_eq!(values(&list, &arena), vec![3, 1, 2]);

        list.unlink(&mut arena, a);
        assert_eq!(list.len(), 2);
        assert_eq!(arena.get(a).unwrap().links, Links::default());
        list.debug_validate_invariants(&arena);

        assert_eq!(list.pop_front(&mut arena), Some(c));
        assert_eq!(list.pop_back(&mut arena), Some(b));
        assert!(list.is_empty());
        assert_eq!(list.pop_back(&mut arena), None);
        list.debug_validate_invariants(&arena);
    }

    #[test]
    fn intrusive_list_move_to_front_back_edges() {
        let mut arena = SlotArena::new();
        let mut list = IntrusiveList::new();
        let ids: Vec<_> = (1..=3).map(|v| arena.insert(node(v))).collect();
        for &id in &ids {
            list.push_back(&mut arena, id);
        }

        list.move_to_front(&mut arena, ids[0]);
        assert_eq!(values(&list, &arena), vec![1, 2, 3]);

        list.move_to_back(&mut arena, ids[0]);
        assert_eq!(values(&list, &arena), vec![2, 3, 1]);

        list.move_to_back(&mut arena, ids[0]);
        assert_eq!(values(&list, &arena), vec![2, 3, 1]);
        list.debug_validate_invariants(&arena);
    }

    #[test]
    fn intrusive_list_reverse_iteration_and_neighbours() {
        let mut arena = SlotArena::new();
        let mut list = IntrusiveList::new();
        let ids: Vec<_> = (1..=4).map(|v| arena.insert(node(v))).collect();
        for &id in &ids {
            list.push_front(&mut arena, id);
        }

        let rev: Vec<_> = list
            .iter_rev(&arena)
            .map(|id| arena.get(id).unwrap().value)
            .collect();
        assert_eq!(rev, vec![1, 2, 3, 4]);
        assert_eq!(IntrusiveList::next_of(&arena, ids[2]), Some(ids[1]));
        assert_eq!(IntrusiveList::prev_of(&arena, ids[2]), Some(ids[3]));
        assert_eq!(IntrusiveList::prev_of(&arena, ids[3]), None);
    }

    #[test]
    fn two_lists_share_one_storage() {
        let mut arena = SlotArena::new();
        let mut hot = IntrusiveList::new();
        let mut cold = IntrusiveList::new();
        let ids: Vec<_> = (0..6).map(|v| arena.insert(node(v))).collect();
        for &id in &ids {
            if arena.get(id).unwrap().value % 2 == 0 {
                hot.push_back(&mut arena, id);
            } else {
                cold.push_back(&mut arena, id);
            }
        }
        assert_eq!(values(&hot, &arena), vec![0, 2, 4]);
        assert_eq!(values(&cold, &arena), vec![1, 3, 5]);

        cold.unlink(&mut arena, ids[3]);
        hot.push_front(&mut arena, ids[3]);
        assert_eq!(values(&hot, &arena), vec![3, 0, 2, 4]);
        assert_eq!(values(&cold, &arena), vec![1, 5]);
        hot.debug_validate_invariants(&arena);
        cold.debug_validate_invariants(&arena);
    }
}
