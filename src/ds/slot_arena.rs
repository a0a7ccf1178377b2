//! Slab of records addressed by stable [`SlotId`] handles.
//!
//! Free slots form an intrusive stack threaded through the vacant entries,
//! so a freed index is the next one handed out. A handle is therefore only
//! meaningful while the record it was issued for is present; owners that
//! keep handles across removals validate them (see the object store and the
//! segment manager).
//!
//! ```text
//!   entries: [ Occupied(a) | Vacant(next: -) | Occupied(c) | Vacant(next: 1) ]
//!   free_head: 3 ──► 1 ──► end
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
enum Entry<T> {
    Occupied(T),
    Vacant { next_free: Option<usize> },
}

#[derive(Debug)]
pub struct SlotArena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        self.len += 1;
        match self.free_head {
            Some(idx) => {
                if let Entry::Vacant { next_free } = self.entries[idx] {
                    self.free_head = next_free;
                }
                self.entries[idx] = Entry::Occupied(value);
                SlotId(idx)
            },
            None => {
                self.entries.push(Entry::Occupied(value));
                SlotId(self.entries.len() - 1)
            },
        }
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let entry = self.entries.get_mut(id.0)?;
        if matches!(entry, Entry::Vacant { .. }) {
            return None;
        }
        let vacant = Entry::Vacant {
            next_free: self.free_head,
        };
        let Entry::Occupied(value) = std::mem::replace(entry, vacant) else {
            return None;
        };
        self.free_head = Some(id.0);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.entries.get(id.0) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.entries.get_mut(id.0) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| match entry {
                Entry::Occupied(value) => Some((SlotId(idx), value)),
                Entry::Vacant { .. } => None,
            })
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
