// Lyrics storage - one plain text file per song, keyed by song id

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("failed to create lyrics directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write lyrics for song {song_id}: {source}")]
    Write { song_id: u64, source: io::Error },
    #[error("failed to read lyrics for song {song_id}: {source}")]
    Read { song_id: u64, source: io::Error },
    #[error("failed to delete lyrics for song {song_id}: {source}")]
    Delete { song_id: u64, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct LyricsStore {
    dir: PathBuf,
}

impl LyricsStore {
    /// Open the store, creating its directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LyricsError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| LyricsError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            info!(dir = %dir.display(), "created lyrics directory");
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, song_id: u64) -> PathBuf {
        self.dir.join(format!("{}.txt", song_id))
    }

    /// Store lyrics for a song, replacing any previous text.
    pub fn save(&self, song_id: u64, lyrics: &str) -> Result<(), LyricsError> {
        fs::write(self.path_for(song_id), lyrics)
            .map_err(|source| LyricsError::Write { song_id, source })?;
        debug!(song_id, "saved lyrics");
        Ok(())
    }

    /// Lyrics for a song, or an empty string when none are stored.
    pub fn load(&self, song_id: u64) -> Result<String, LyricsError> {
        match fs::read_to_string(self.path_for(song_id)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(LyricsError::Read { song_id, source }),
        }
    }

    /// Returns whether there was anything to delete.
    pub fn delete(&self, song_id: u64) -> Result<bool, LyricsError> {
        match fs::remove_file(self.path_for(song_id)) {
            Ok(()) => {
                debug!(song_id, "deleted lyrics");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LyricsError::Delete { song_id, source }),
        }
    }

    /// True only for a non-empty lyrics file.
    pub fn has(&self, song_id: u64) -> bool {
        fs::metadata(self.path_for(song_id))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }
}
