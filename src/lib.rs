// HarmoniQ Library - core of the local music player
// Album art caching is the heart of it; library scanning and lyrics sit alongside

pub mod art;      // bounded album art cache, async loader, decoders
pub mod config;   // settings and preferences
pub mod library;  // songs, albums, filesystem scanning
pub mod lyrics;   // per-song lyrics files

// Export the stuff other modules actually use
pub use art::{
    ArtCache, ArtDecoder, ArtEntry, ArtError, ArtLoader, ArtOutcome, CacheKey, ConsumerHandle,
    FileArtDecoder, MemoryManager, RawImage,
};
pub use config::Config;
pub use library::{Album, LibraryScanner, Song};
pub use lyrics::LyricsStore;
