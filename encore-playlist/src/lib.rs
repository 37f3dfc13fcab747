//! Playlists: the ordered track model, its LZ4-compressed on-disk format,
//! and the background metadata scanner that fills it.

pub mod binary;
pub mod image_server;
pub mod playlist;
pub mod scanner;

pub use image_server::{ImageResponse, ImageServer};
pub use playlist::{PlaybackOrder, Playlist, PlaylistIndex, SortOrder};
pub use scanner::{ScanEvent, Scanner};
