//! A small ordered string dictionary for tags and stream properties.

use encore_common::UStr;

/// A sorted flat multimap from tag keys to values.
///
/// Keys keep insertion cheap by staying in a sorted `Vec`; lookups are
/// binary searches. Duplicate keys are permitted (multi-valued tags).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<(UStr, UStr)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Dictionary {
            entries: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<UStr>, value: impl Into<UStr>) {
        let key = key.into();
        let pos = self
            .entries
            .partition_point(|(k, _)| k.as_str() <= key.as_str());
        self.entries.insert(pos, (key, value.into()));
    }

    /// Appends without re-sorting; valid when the source is already ordered.
    pub fn push_sorted(&mut self, key: UStr, value: UStr) {
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &str) -> Option<&UStr> {
        let pos = self.entries.partition_point(|(k, _)| k.as_str() < key);
        match self.entries.get(pos) {
            Some((k, v)) if k.as_str() == key => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a UStr> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UStr, &UStr)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(UStr, UStr)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (UStr, UStr)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = &'a (UStr, UStr);
    type IntoIter = std::slice::Iter<'a, (UStr, UStr)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_keys_ordered() {
        let mut dict = Dictionary::new();
        dict.insert("title", "B side");
        dict.insert("artist", "Someone");
        dict.insert("album", "Somewhere");

        let keys: Vec<&str> = dict.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["album", "artist", "title"]);
        assert_eq!(dict.get("artist").unwrap().as_str(), "Someone");
        assert!(dict.get("missing").is_none());
    }

    #[test]
    fn duplicate_keys_are_kept() {
        let mut dict = Dictionary::new();
        dict.insert("genre", "Jazz");
        dict.insert("genre", "Fusion");

        let values: Vec<&str> = dict.get_all("genre").map(|v| v.as_str()).collect();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&"Jazz"));
        assert!(values.contains(&"Fusion"));
    }
}
