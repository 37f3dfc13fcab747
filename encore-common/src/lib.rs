//! Common infrastructure for the Encore player: error kinds, endian-aware
//! byte I/O, interned strings, seekable streams and plugin registries.

pub mod error;
pub mod io;
pub mod num;
pub mod registry;
pub mod stream;
pub mod ustr;

pub use error::{Error, ErrorKind, Result};
pub use stream::{MemoryStream, Stream};
pub use ustr::{UStr, UStrBuf};
