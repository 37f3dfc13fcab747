//! Endian-aware typed loads and stores over byte buffers.
//!
//! The demuxers parse packed on-disk structures field by field; the
//! [`gather!`]/[`scatter!`] macros walk such a structure in declaration
//! order with no implicit padding, exactly as it is laid out in the file.

use byteorder::ByteOrder;

use crate::error::{Error, Result};

pub use byteorder::{BigEndian as BE, LittleEndian as LE};

/// A fixed-size primitive that can be loaded from and stored to bytes in a
/// chosen byte order. Floats round-trip through their integer representation.
pub trait Scalar: Copy + Default {
    const SIZE: usize;

    fn load<E: ByteOrder>(buf: &[u8]) -> Self;
    fn store<E: ByteOrder>(self, buf: &mut [u8]);
}

macro_rules! impl_scalar {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl Scalar for $ty {
            const SIZE: usize = $size;

            #[inline]
            fn load<E: ByteOrder>(buf: &[u8]) -> Self {
                E::$read(buf)
            }

            #[inline]
            fn store<E: ByteOrder>(self, buf: &mut [u8]) {
                E::$write(buf, self)
            }
        }
    };
}

impl Scalar for u8 {
    const SIZE: usize = 1;

    #[inline]
    fn load<E: ByteOrder>(buf: &[u8]) -> Self {
        buf[0]
    }

    #[inline]
    fn store<E: ByteOrder>(self, buf: &mut [u8]) {
        buf[0] = self;
    }
}

impl Scalar for i8 {
    const SIZE: usize = 1;

    #[inline]
    fn load<E: ByteOrder>(buf: &[u8]) -> Self {
        buf[0] as i8
    }

    #[inline]
    fn store<E: ByteOrder>(self, buf: &mut [u8]) {
        buf[0] = self as u8;
    }
}

impl_scalar!(u16, 2, read_u16, write_u16);
impl_scalar!(i16, 2, read_i16, write_i16);
impl_scalar!(u32, 4, read_u32, write_u32);
impl_scalar!(i32, 4, read_i32, write_i32);
impl_scalar!(u64, 8, read_u64, write_u64);
impl_scalar!(i64, 8, read_i64, write_i64);
impl_scalar!(f32, 4, read_f32, write_f32);
impl_scalar!(f64, 8, read_f64, write_f64);

/// Loads one `T` from the front of `buf`.
#[inline]
pub fn load<T: Scalar, E: ByteOrder>(buf: &[u8]) -> T {
    T::load::<E>(buf)
}

/// Stores `value` at the front of `buf`.
#[inline]
pub fn store<T: Scalar, E: ByteOrder>(buf: &mut [u8], value: T) {
    value.store::<E>(buf);
}

/// Loads `dst.len()` consecutive values of `T` from `src`.
pub fn load_n<T: Scalar, E: ByteOrder>(src: &[u8], dst: &mut [T]) {
    for (chunk, out) in src.chunks_exact(T::SIZE).zip(dst.iter_mut()) {
        *out = T::load::<E>(chunk);
    }
}

/// Stores all values in `src` consecutively into `dst`.
pub fn store_n<T: Scalar, E: ByteOrder>(dst: &mut [u8], src: &[T]) {
    for (chunk, value) in dst.chunks_exact_mut(T::SIZE).zip(src.iter().copied()) {
        value.store::<E>(chunk);
    }
}

/// A bounds-checked cursor over an in-memory byte slice.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn get<T: Scalar, E: ByteOrder>(&mut self) -> Result<T> {
        if self.remaining() < T::SIZE {
            return Err(Error::end_of_file());
        }
        let value = T::load::<E>(&self.buf[self.pos..]);
        self.pos += T::SIZE;
        Ok(value)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::end_of_file());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::end_of_file());
        }
        self.pos += n;
        Ok(())
    }
}

/// An append-only typed writer over a growable byte buffer.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter::default()
    }

    pub fn put<T: Scalar, E: ByteOrder>(&mut self, value: T) {
        let pos = self.buf.len();
        self.buf.resize(pos + T::SIZE, 0);
        value.store::<E>(&mut self.buf[pos..]);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads a packed sequence of fields from a reader in declaration order.
///
/// ```ignore
/// gather!(reader, LE => head.magic, head.version, head.flags, head.size);
/// ```
#[macro_export]
macro_rules! gather {
    ($r:expr, $e:ty => $($field:expr),+ $(,)?) => {
        $( $field = $r.get::<_, $e>()?; )+
    };
}

/// Writes a packed sequence of fields in declaration order.
#[macro_export]
macro_rules! scatter {
    ($w:expr, $e:ty => $($field:expr),+ $(,)?) => {
        $( $w.put::<_, $e>($field); )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! check_round_trip {
        ($ty:ty, $value:expr) => {{
            let mut buf = [0u8; 8];
            let value: $ty = $value;
            store::<$ty, BE>(&mut buf, value);
            assert_eq!(load::<$ty, BE>(&buf), value);
            store::<$ty, LE>(&mut buf, value);
            assert_eq!(load::<$ty, LE>(&buf), value);
        }};
    }

    #[test]
    fn round_trips_every_scalar_in_both_orders() {
        check_round_trip!(u8, 0xa5);
        check_round_trip!(i8, -100);
        check_round_trip!(u16, 0xbeef);
        check_round_trip!(i16, -12345);
        check_round_trip!(u32, 0xdead_beef);
        check_round_trip!(i32, -123_456_789);
        check_round_trip!(u64, 0xfeed_face_dead_beef);
        check_round_trip!(i64, -9_876_543_210);
        check_round_trip!(f32, -0.5);
        check_round_trip!(f64, 1.0e300);
    }

    #[test]
    fn slice_forms_convert_in_order() {
        let values = [1u16, 2, 0x8000];
        let mut bytes = [0u8; 6];
        store_n::<u16, BE>(&mut bytes, &values);
        assert_eq!(bytes, [0, 1, 0, 2, 0x80, 0]);

        let mut out = [0u16; 3];
        load_n::<u16, BE>(&bytes, &mut out);
        assert_eq!(out, values);
    }

    #[test]
    fn gather_scatter_walk_packed_layouts() {
        struct Header {
            magic: u32,
            version: u16,
            flags: u16,
            size: u32,
        }

        let mut w = ByteWriter::new();
        scatter!(w, LE => 0x4c504d41u32, 1u16, 0u16, 640u32);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 12);

        let mut head = Header {
            magic: 0,
            version: 0,
            flags: 0,
            size: 0,
        };
        let mut r = ByteReader::new(&bytes);
        (|| -> crate::Result<()> {
            gather!(r, LE => head.magic, head.version, head.flags, head.size);
            Ok(())
        })()
        .unwrap();

        assert_eq!(head.magic, 0x4c504d41);
        assert_eq!(head.version, 1);
        assert_eq!(head.flags, 0);
        assert_eq!(head.size, 640);
    }

    #[test]
    fn reader_reports_end_of_input() {
        let mut r = ByteReader::new(&[1, 2]);
        assert!(r.get::<u32, BE>().is_err());
        assert_eq!(r.get::<u16, BE>().unwrap(), 0x0102);
        assert_eq!(r.remaining(), 0);
    }
}
