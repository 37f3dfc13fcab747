//! Ordered multimap registries for pluggable factories.
//!
//! Each plugin kind (stream scheme, demuxer extension, decoder codec id,
//! output, filter, resampler) keeps one registry. Registration order is
//! preserved; resolution tries each matching factory in turn and keeps the
//! last error when all of them fail.

use crate::error::{Error, Result};

/// An insertion-ordered multimap from keys to factories.
pub struct Registry<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Registry {
            entries: Vec::new(),
        }
    }
}

impl<K, V> Registry<K, V> {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, key: K, value: V) {
        self.entries.push((key, value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.entries.iter()
    }
}

impl<V> Registry<&'static str, V> {
    /// All factories registered for `key`, matched case-insensitively.
    pub fn find<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a V> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).next().is_some()
    }
}

impl<V> Registry<u32, V> {
    pub fn find(&self, key: u32) -> impl Iterator<Item = &V> + '_ {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: u32) -> bool {
        self.find(key).next().is_some()
    }
}

/// Tries each factory in registration order; the first success wins.
///
/// Raises `protocol_not_supported` via `missing` when no factory matched,
/// and the last factory's error when all of them failed.
pub fn try_each<'a, V: 'a, T>(
    factories: impl Iterator<Item = &'a V>,
    missing: impl FnOnce() -> Error,
    mut create: impl FnMut(&'a V) -> Result<T>,
) -> Result<T> {
    let mut last_error = None;
    for factory in factories {
        match create(factory) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| missing()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn string_keys_match_case_insensitively() {
        let mut reg: Registry<&'static str, u32> = Registry::new();
        reg.register("m4a", 1);
        reg.register("M4A", 2);
        reg.register("wav", 3);

        let found: Vec<u32> = reg.find("m4A").copied().collect();
        assert_eq!(found, vec![1, 2]);
        assert!(reg.contains("WAV"));
        assert!(!reg.contains("ogg"));
    }

    #[test]
    fn try_each_keeps_registration_order_and_last_error() {
        let mut reg: Registry<u32, &'static str> = Registry::new();
        reg.register(7, "first");
        reg.register(7, "second");

        // First factory fails, second succeeds.
        let result = try_each(
            reg.find(7),
            || Error::protocol_not_supported("none"),
            |&name| {
                if name == "first" {
                    Err(Error::failure("first refused"))
                } else {
                    Ok(name)
                }
            },
        );
        assert_eq!(result.unwrap(), "second");

        // No factory registered at all.
        let result: Result<&'static str> = try_each(
            reg.find(9),
            || Error::protocol_not_supported("none"),
            |&name| Ok(name),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ProtocolNotSupported);

        // Every factory fails; the last error is propagated.
        let result: Result<()> = try_each(
            reg.find(7),
            || Error::protocol_not_supported("none"),
            |&name| Err(Error::failure(name)),
        );
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert_eq!(err.message(), "second");
    }
}
