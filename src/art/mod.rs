// Album art - bounded in-memory cache with async decode and stale-result suppression
// Everything that puts pixels behind an album cover goes through here

pub mod cache;  // byte-bounded LRU map of decoded covers
pub mod decode; // turns a cache key into pixels (files, embedded tags, album dirs)
pub mod loader; // async population + per-consumer staleness tracking
pub mod memory; // low-memory and periodic cleanup hooks

pub use cache::{ArtCache, CacheStats};
pub use decode::{ArtDecoder, DecodeError, FileArtDecoder};
pub use loader::{ArtLoader, OnReady};
pub use memory::{MemoryManager, TrimLevel};

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const ALBUM_KEY_PREFIX: &str = "album:";

/// Stable identity of one artwork target: a filesystem path or an album id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for the artwork of a whole album, rendered as `album:<id>`.
    pub fn album(album_id: u64) -> Self {
        Self(format!("{}{}", ALBUM_KEY_PREFIX, album_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The album id if this key was built with [`CacheKey::album`].
    pub fn album_id(&self) -> Option<u64> {
        self.0
            .strip_prefix(ALBUM_KEY_PREFIX)
            .and_then(|id| id.parse().ok())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&Path> for CacheKey {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}

/// A decoded pixel buffer as handed over by an [`ArtDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u8,
    pub pixels: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, bytes_per_pixel: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
            pixels,
        }
    }

    /// Zero-filled RGBA8 image.
    pub fn blank_rgba(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Self::new(width, height, 4, vec![0; len])
    }

    /// Memory cost of the decoded buffer: width x height x bytes-per-pixel.
    pub fn byte_size(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.bytes_per_pixel as usize)
    }
}

/// One cached cover. Immutable once built; a fresh decode replaces it wholesale.
#[derive(Debug, PartialEq, Eq)]
pub struct ArtEntry {
    image: RawImage,
    byte_size: usize,
}

impl ArtEntry {
    pub fn new(image: RawImage) -> Self {
        let byte_size = image.byte_size();
        Self { image, byte_size }
    }

    pub fn image(&self) -> &RawImage {
        &self.image
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width, self.image.height)
    }
}

impl From<RawImage> for ArtEntry {
    fn from(image: RawImage) -> Self {
        Self::new(image)
    }
}

/// What a consumer receives once its request settles.
#[derive(Debug, Clone)]
pub enum ArtOutcome {
    Ready(Arc<ArtEntry>),
    /// Nothing could be decoded; show the default cover.
    Fallback,
}

impl ArtOutcome {
    pub fn entry(&self) -> Option<&Arc<ArtEntry>> {
        match self {
            ArtOutcome::Ready(entry) => Some(entry),
            ArtOutcome::Fallback => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ArtOutcome::Fallback)
    }
}

/// Opaque identity of something that displays art (a list row, the now-playing view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerHandle(u64);

impl ConsumerHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum ArtError {
    #[error("art cache capacity must be greater than zero")]
    ZeroCapacity,
    #[error("art loader needs at least one decode worker")]
    NoWorkers,
    #[error("art loader must be created inside a tokio runtime")]
    NoRuntime,
}
