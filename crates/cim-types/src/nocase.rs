//! Insertion-ordered map with case-insensitive string keys.
//!
//! CIM element names (properties, qualifiers, keybindings, parameters) compare
//! case-insensitively but preserve the spelling they were created with.

use std::fmt;

#[derive(Clone)]
pub struct NocaseMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> NocaseMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Insert a value, replacing (in place) any entry whose key matches
    /// case-insensitively. Returns the previous value.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: V) -> Option<V> {
        let key = key.into();
        match self.position(&key) {
            Some(idx) => {
                let (old_key, old_value) = &mut self.entries[idx];
                *old_key = key;
                Some(std::mem::replace(old_value, value))
            }
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.position(key).map(|idx| &self.entries[idx].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.position(key).map(move |idx| &mut self.entries[idx].1)
    }

    /// Key with its original spelling.
    pub fn get_key_value(&self, key: &str) -> Option<(&str, &V)> {
        self.position(key)
            .map(|idx| (self.entries[idx].0.as_str(), &self.entries[idx].1))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl<V> Default for NocaseMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality ignores key case and insertion order.
impl<V: PartialEq> PartialEq for NocaseMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |ov| ov == v))
    }
}

impl<V: fmt::Debug> fmt::Debug for NocaseMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for NocaseMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = NocaseMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for NocaseMap<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<V> IntoIterator for NocaseMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup_preserves_order() {
        let mut map = NocaseMap::new();
        map.insert("Name", 1);
        map.insert("CreationClassName", 2);
        assert_eq!(map.get("name"), Some(&1));
        assert_eq!(map.insert("NAME", 3), Some(1));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["NAME", "CreationClassName"]);
        assert_eq!(map.remove("creationclassname"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn equality_ignores_order_and_case() {
        let a: NocaseMap<i32> = [("A", 1), ("b", 2)].into_iter().collect();
        let b: NocaseMap<i32> = [("B", 2), ("a", 1)].into_iter().collect();
        assert_eq!(a, b);
        let c: NocaseMap<i32> = [("A", 1)].into_iter().collect();
        assert_ne!(a, c);
    }
}
