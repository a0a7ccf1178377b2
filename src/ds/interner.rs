//! String keys to dense [`ObjId`]s.
//!
//! Traces that name objects by string (URLs, block paths) are interned once
//! so every policy works on plain `u64` ids. Ids are assigned in first-seen
//! order starting at 0.

use rustc_hash::FxHashMap;

use crate::request::ObjId;

#[derive(Debug, Default)]
pub struct KeyInterner {
    ids: FxHashMap<Box<str>, ObjId>,
    keys: Vec<Box<str>>,
}

impl KeyInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `key`, assigning the next one on first sight.
    pub fn intern(&mut self, key: &str) -> ObjId {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = self.keys.len() as ObjId;
        let owned: Box<str> = key.into();
        self.keys.push(owned.clone());
        self.ids.insert(owned, id);
        id
    }

    pub fn get(&self, key: &str) -> Option<ObjId> {
        self.ids.get(key).copied()
    }

    pub fn resolve(&self, id: ObjId) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.keys.get(idx))
            .map(|key| &**key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
