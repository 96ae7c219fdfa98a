use std::collections::HashSet;

use crate::entity::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Add,
    Delete,
}

/// Keys the user has ticked. Lives independently of whichever collection
/// snapshot is current, so a key can stay selected while its entity is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    keys: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, key: &str) {
        if !self.keys.remove(key) {
            self.keys.insert(key.to_string());
        }
    }

    pub fn set_many<I, S>(&mut self, keys: I, mode: SetMode)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            match mode {
                SetMode::Add => {
                    self.keys.insert(key.to_string());
                }
                SetMode::Delete => {
                    self.keys.remove(key);
                }
            }
        }
    }

    /// True when every key in `keys` is selected. Drives the tri-state "all" box.
    pub fn is_superset<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter().all(|k| self.keys.contains(k.as_ref()))
    }

    /// Bulk toggle for a group: removes exactly `keys` if all are selected,
    /// otherwise adds exactly `keys`. Never clears unrelated selections.
    pub fn toggle_all(&mut self, keys: &[String]) {
        let mode = if self.is_superset(keys) {
            SetMode::Delete
        } else {
            SetMode::Add
        };
        self.set_many(keys, mode);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Selected keys sorted, for stable display and dispatch order.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Selected keys the snapshot no longer contains ("player left the server").
    pub fn absent_from(&self, collection: &Collection) -> Vec<String> {
        let mut absent: Vec<String> = self
            .keys
            .iter()
            .filter(|k| !collection.contains(k))
            .cloned()
            .collect();
        absent.sort();
        absent
    }

    /// Drops every absent key; returns how many went.
    pub fn retain_present(&mut self, collection: &Collection) -> usize {
        let before = self.keys.len();
        self.keys.retain(|k| collection.contains(k));
        before - self.keys.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for SelectionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().map(|k| k.as_ref().to_string()).collect(),
        }
    }
}
