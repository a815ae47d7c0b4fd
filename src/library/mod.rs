// Local music library - songs, albums and the scanner that finds them
// Only what the art cache and lyrics store need to address things

pub mod scanner;

pub use scanner::{LibraryScanner, ScanProgress};

use crate::art::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use xxhash_rust::xxh64::xxh64;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Mp4,
    Wav,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => AudioFormat::Mp3,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" => AudioFormat::Ogg,
            "mp4" | "m4a" | "aac" => AudioFormat::Mp4,
            "wav" => AudioFormat::Wav,
            _ => AudioFormat::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, AudioFormat::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: u64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: u64,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub track_number: Option<u32>,
}

impl Song {
    /// Missing tags fall back to the usual "Unknown ..." labels.
    pub fn new(
        path: PathBuf,
        title: Option<String>,
        artist: Option<String>,
        album: Option<String>,
        duration_ms: u64,
    ) -> Self {
        let title = title.unwrap_or_else(|| UNKNOWN_TITLE.to_string());
        let artist = artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        let album = album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

        Self {
            id: song_id(&path),
            album_id: album_id(&album, &artist),
            title,
            artist,
            album,
            path,
            duration_ms,
            track_number: None,
        }
    }

    pub fn with_track_number(mut self, track_number: Option<u32>) -> Self {
        self.track_number = track_number;
        self
    }

    /// `m:ss`
    pub fn formatted_duration(&self) -> String {
        let seconds = self.duration_ms / 1000;
        format!("{}:{:02}", seconds / 60, seconds % 60)
    }

    /// Cover embedded in (or next to) this song's file.
    pub fn art_key(&self) -> CacheKey {
        CacheKey::from(self.path.as_path())
    }

    pub fn album_art_key(&self) -> CacheKey {
        CacheKey::album(self.album_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub name: String,
    pub artist: String,
    pub song_count: usize,
    /// First song of the album, used when no album-level cover exists.
    pub representative_path: Option<PathBuf>,
}

impl Album {
    pub fn art_key(&self) -> CacheKey {
        CacheKey::album(self.id)
    }
}

/// Stable song id derived from the file path.
pub fn song_id(path: &std::path::Path) -> u64 {
    xxh64(path.to_string_lossy().as_bytes(), 0)
}

/// Stable album id: same album name + artist, same id, regardless of case.
pub fn album_id(album: &str, artist: &str) -> u64 {
    let normalized = format!(
        "{}\u{0}{}",
        album.trim().to_lowercase(),
        artist.trim().to_lowercase()
    );
    xxh64(normalized.as_bytes(), 0)
}

/// Group songs into albums, sorted by album name.
pub fn albums(songs: &[Song]) -> Vec<Album> {
    let mut grouped: BTreeMap<u64, Album> = BTreeMap::new();

    for song in songs {
        grouped
            .entry(song.album_id)
            .and_modify(|album| album.song_count += 1)
            .or_insert_with(|| Album {
                id: song.album_id,
                name: song.album.clone(),
                artist: song.artist.clone(),
                song_count: 1,
                representative_path: Some(song.path.clone()),
            });
    }

    let mut albums: Vec<Album> = grouped.into_values().collect();
    albums.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    albums
}

/// Songs of one album in track order; untagged tracks go last, by title.
pub fn songs_in_album(songs: &[Song], album_id: u64) -> Vec<Song> {
    let mut tracks: Vec<Song> = songs
        .iter()
        .filter(|song| song.album_id == album_id)
        .cloned()
        .collect();
    tracks.sort_by(|a, b| {
        a.track_number
            .unwrap_or(u32::MAX)
            .cmp(&b.track_number.unwrap_or(u32::MAX))
            .then_with(|| a.title.cmp(&b.title))
    });
    tracks
}
