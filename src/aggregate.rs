//! Folds the pairs collected from the map workers into per-key groups.

use std::collections::HashMap;

use crate::record_types::{KeyGroup, Record};

/// The key groups of a job, in the order their keys were first seen. Keys are unique; a hash
/// index points from a key to its position so inserting does not scan the groups.
#[derive(Default)]
pub struct Aggregate {
    groups: Vec<KeyGroup>,
    index: HashMap<String, usize>,
    pairs: usize,
}

impl Aggregate {
    pub fn new() -> Aggregate {
        Aggregate::default()
    }

    /// Appends the pair's value to the group of its key, creating the group at the end if the
    /// key is new.
    pub fn insert(&mut self, r: Record) {
        self.pairs += 1;
        match self.index.get(&r.key) {
            Some(&pos) => self.groups[pos].values.push(r.value),
            None => {
                self.index.insert(r.key.clone(), self.groups.len());
                let mut g = KeyGroup::new(r.key);
                g.values.push(r.value);
                self.groups.push(g);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&KeyGroup> {
        self.index.get(key).map(|&pos| &self.groups[pos])
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of pairs inserted so far.
    pub fn pairs(&self) -> usize {
        self.pairs
    }

    /// Groups in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyGroup> {
        self.groups.iter()
    }

    pub fn into_groups(self) -> Vec<KeyGroup> {
        self.groups
    }
}

impl Extend<Record> for Aggregate {
    fn extend<I: IntoIterator<Item = Record>>(&mut self, iter: I) {
        for r in iter {
            self.insert(r);
        }
    }
}
