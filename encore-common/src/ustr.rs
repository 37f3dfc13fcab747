//! Immutable refcounted UTF-8 strings with process-wide interning.
//!
//! [`UStr`] is cheap to clone and hash (the CRC32C of its bytes is computed
//! once, at construction). [`UStr::intern`] deduplicates through a global
//! table, so two interns of the same bytes share one allocation and compare
//! by pointer. [`UStrBuf`] is the mutable counterpart; `promote` validates
//! UTF-8 and freezes it into a `UStr`.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

static INTERN_TABLE: Lazy<Mutex<HashMap<u32, Vec<Weak<Repr>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

struct Repr {
    hash: u32,
    interned: AtomicBool,
    text: Box<str>,
}

impl Drop for Repr {
    fn drop(&mut self) {
        if !self.interned.load(Ordering::Acquire) {
            return;
        }
        // The last strong reference is gone; unlink any dead table entries
        // for this bucket. A racing intern that failed to upgrade our weak
        // pointer has already linked a fresh representation.
        let mut table = INTERN_TABLE.lock().unwrap();
        if let Some(bucket) = table.get_mut(&self.hash) {
            bucket.retain(|weak| weak.strong_count() != 0);
            if bucket.is_empty() {
                table.remove(&self.hash);
            }
        }
    }
}

/// An immutable, refcounted, CRC32C-hashed UTF-8 string.
#[derive(Clone)]
pub struct UStr {
    repr: Arc<Repr>,
}

impl UStr {
    fn from_boxed(text: Box<str>) -> Self {
        let hash = crc32c::crc32c(text.as_bytes());
        UStr {
            repr: Arc::new(Repr {
                hash,
                interned: AtomicBool::new(false),
                text,
            }),
        }
    }

    pub fn new(text: impl Into<String>) -> Self {
        UStr::from_boxed(text.into().into_boxed_str())
    }

    pub fn empty() -> Self {
        UStr::new(String::new())
    }

    /// Returns the process-wide canonical `UStr` for `text`.
    ///
    /// Two interns of equal bytes return pointers to the same allocation.
    pub fn intern(text: &str) -> Self {
        let hash = crc32c::crc32c(text.as_bytes());
        let mut table = INTERN_TABLE.lock().unwrap();
        let bucket = table.entry(hash).or_default();

        for weak in bucket.iter() {
            if let Some(repr) = weak.upgrade() {
                if &*repr.text == text {
                    return UStr { repr };
                }
            }
        }

        let repr = Arc::new(Repr {
            hash,
            interned: AtomicBool::new(true),
            text: text.into(),
        });
        bucket.push(Arc::downgrade(&repr));
        UStr { repr }
    }

    pub fn as_str(&self) -> &str {
        &self.repr.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.repr.text.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.repr.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repr.text.is_empty()
    }

    /// The CRC32C of the string's bytes.
    pub fn hash_value(&self) -> u32 {
        self.repr.hash
    }

    pub fn is_interned(&self) -> bool {
        self.repr.interned.load(Ordering::Acquire)
    }

    pub fn ptr_eq(a: &UStr, b: &UStr) -> bool {
        Arc::ptr_eq(&a.repr, &b.repr)
    }

    /// Copies the string back out into a mutable builder.
    pub fn detach(&self) -> UStrBuf {
        UStrBuf {
            bytes: self.as_bytes().to_vec(),
        }
    }

    pub fn from_utf8(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(UStr::new(s)),
            Err(e) => Err(Error::invalid_unicode(e.to_string())),
        }
    }

    pub fn from_utf8_lossy(bytes: &[u8]) -> Self {
        UStr::new(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn from_encoding(bytes: &[u8], encoding: TextEncoding) -> Result<Self> {
        decode(bytes, encoding, false)
    }

    pub fn from_encoding_lossy(bytes: &[u8], encoding: TextEncoding) -> Self {
        decode(bytes, encoding, true).expect("lossy decoding is total")
    }
}

impl Deref for UStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for UStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for UStr {
    fn eq(&self, other: &Self) -> bool {
        UStr::ptr_eq(self, other)
            || (self.repr.hash == other.repr.hash && self.as_str() == other.as_str())
    }
}

impl Eq for UStr {}

impl PartialEq<str> for UStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for UStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialOrd for UStr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UStr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for UStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal strings share equal CRC32C values, so hashing the
        // precomputed value is consistent with Eq.
        state.write_u32(self.repr.hash);
    }
}

impl fmt::Display for UStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for UStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl Default for UStr {
    fn default() -> Self {
        UStr::empty()
    }
}

impl From<&str> for UStr {
    fn from(s: &str) -> Self {
        UStr::new(s)
    }
}

impl From<String> for UStr {
    fn from(s: String) -> Self {
        UStr::new(s)
    }
}

/// Source encodings accepted when constructing a `UStr` from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Be,
    Utf16Le,
    Utf32Be,
    Utf32Le,
    Cp1252,
    Latin1,
}

fn decode(bytes: &[u8], encoding: TextEncoding, lossy: bool) -> Result<UStr> {
    match encoding {
        TextEncoding::Utf8 => {
            if lossy {
                Ok(UStr::from_utf8_lossy(bytes))
            } else {
                UStr::from_utf8(bytes)
            }
        }
        TextEncoding::Utf16Be => decode_utf16(bytes, true, lossy),
        TextEncoding::Utf16Le => decode_utf16(bytes, false, lossy),
        TextEncoding::Utf32Be => decode_utf32(bytes, true, lossy),
        TextEncoding::Utf32Le => decode_utf32(bytes, false, lossy),
        TextEncoding::Cp1252 => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            Ok(UStr::new(text.into_owned()))
        }
        TextEncoding::Latin1 => Ok(UStr::new(
            bytes.iter().map(|&b| b as char).collect::<String>(),
        )),
    }
}

fn decode_utf16(bytes: &[u8], mut big_endian: bool, lossy: bool) -> Result<UStr> {
    let mut bytes = bytes;
    if bytes.len() >= 2 {
        // A byte order mark overrides the caller's endianness.
        match (bytes[0], bytes[1]) {
            (0xfe, 0xff) => {
                big_endian = true;
                bytes = &bytes[2..];
            }
            (0xff, 0xfe) => {
                big_endian = false;
                bytes = &bytes[2..];
            }
            _ => {}
        }
    }

    if bytes.len() % 2 != 0 && !lossy {
        return Err(Error::invalid_unicode("truncated UTF-16 code unit"));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    let mut out = String::with_capacity(units.len());
    for decoded in char::decode_utf16(units.into_iter()) {
        match decoded {
            Ok(c) => out.push(c),
            Err(_) if lossy => out.push(char::REPLACEMENT_CHARACTER),
            Err(_) => return Err(Error::invalid_unicode("unpaired UTF-16 surrogate")),
        }
    }
    if bytes.len() % 2 != 0 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    Ok(UStr::new(out))
}

fn decode_utf32(bytes: &[u8], mut big_endian: bool, lossy: bool) -> Result<UStr> {
    let mut bytes = bytes;
    if bytes.len() >= 4 {
        match (bytes[0], bytes[1], bytes[2], bytes[3]) {
            (0x00, 0x00, 0xfe, 0xff) => {
                big_endian = true;
                bytes = &bytes[4..];
            }
            (0xff, 0xfe, 0x00, 0x00) => {
                big_endian = false;
                bytes = &bytes[4..];
            }
            _ => {}
        }
    }

    if bytes.len() % 4 != 0 && !lossy {
        return Err(Error::invalid_unicode("truncated UTF-32 code unit"));
    }

    let mut out = String::with_capacity(bytes.len() / 4);
    for quad in bytes.chunks_exact(4) {
        let value = if big_endian {
            u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]])
        } else {
            u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]])
        };
        match char::from_u32(value) {
            Some(c) => out.push(c),
            None if lossy => out.push(char::REPLACEMENT_CHARACTER),
            None => {
                return Err(Error::invalid_unicode(format!(
                    "invalid UTF-32 code point U+{value:X}"
                )))
            }
        }
    }
    if bytes.len() % 4 != 0 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    Ok(UStr::new(out))
}

/// A growable byte buffer that promotes into a [`UStr`] once its payload is
/// known to be valid UTF-8.
#[derive(Default)]
pub struct UStrBuf {
    bytes: Vec<u8>,
}

impl UStrBuf {
    pub fn new() -> Self {
        UStrBuf::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        UStrBuf {
            bytes: Vec::with_capacity(n),
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Validates the payload as UTF-8 and freezes it into a `UStr`.
    pub fn promote(self) -> Result<UStr> {
        match String::from_utf8(self.bytes) {
            Ok(text) => Ok(UStr::new(text)),
            Err(e) => Err(Error::invalid_unicode(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_pointer_identical_strings() {
        let a = UStr::intern("gapless playback");
        let b = UStr::intern("gapless playback");
        assert!(UStr::ptr_eq(&a, &b));
        assert!(a.is_interned());

        let c = UStr::new("gapless playback");
        assert!(!UStr::ptr_eq(&a, &c));
        assert_eq!(a, c);
    }

    #[test]
    fn hash_is_crc32c_of_bytes() {
        // Castagnoli check value for the standard nine-digit vector.
        let s = UStr::new("123456789");
        assert_eq!(s.hash_value(), 0xe306_9283);
        assert_eq!(s.hash_value(), crc32c::crc32c(b"123456789"));
    }

    #[test]
    fn promote_requires_valid_utf8() {
        let mut buf = UStrBuf::new();
        buf.push_bytes(b"caf\xc3\xa9");
        let s = buf.promote().unwrap();
        assert_eq!(s.as_str(), "café");

        let mut bad = UStrBuf::new();
        bad.push_bytes(b"\xff\xfe\xfd");
        assert!(bad.promote().is_err());
    }

    #[test]
    fn utf16_handles_boms_and_surrogates() {
        // BOM overrides the declared byte order.
        let le_with_bom = [0xff, 0xfe, b'h', 0x00, b'i', 0x00];
        let s = UStr::from_encoding(&le_with_bom, TextEncoding::Utf16Be).unwrap();
        assert_eq!(s.as_str(), "hi");

        // Unpaired high surrogate.
        let bad = [0xd8, 0x00, 0x00, b'x'];
        assert!(UStr::from_encoding(&bad, TextEncoding::Utf16Be).is_err());
        let lossy = UStr::from_encoding_lossy(&bad, TextEncoding::Utf16Be);
        assert!(lossy.as_str().contains('\u{fffd}'));

        // Surrogate pair decodes to one scalar.
        let pair = [0xd8, 0x3d, 0xde, 0x00];
        let s = UStr::from_encoding(&pair, TextEncoding::Utf16Be).unwrap();
        assert_eq!(s.as_str(), "\u{1f600}");
    }

    #[test]
    fn utf32_rejects_out_of_range_and_surrogates() {
        let too_big = 0x110000u32.to_be_bytes();
        assert!(UStr::from_encoding(&too_big, TextEncoding::Utf32Be).is_err());

        let surrogate = 0xd800u32.to_be_bytes();
        assert!(UStr::from_encoding(&surrogate, TextEncoding::Utf32Be).is_err());

        let ok = 0x1f600u32.to_be_bytes();
        let s = UStr::from_encoding(&ok, TextEncoding::Utf32Be).unwrap();
        assert_eq!(s.as_str(), "\u{1f600}");
    }

    #[test]
    fn cp1252_maps_high_bytes() {
        let s = UStr::from_encoding(b"na\xefve \x93quoted\x94", TextEncoding::Cp1252).unwrap();
        assert_eq!(s.as_str(), "naïve \u{201c}quoted\u{201d}");
    }

    #[test]
    fn detach_round_trips() {
        let s = UStr::intern("detach me");
        let buf = s.detach();
        let t = buf.promote().unwrap();
        assert_eq!(s, t);
        assert!(!t.is_interned());
    }
}
