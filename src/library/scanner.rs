use super::{AudioFormat, Song};
use anyhow::Result;
use id3::TagLike;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// Anything bigger is not a song
const MAX_FILE_SIZE: u64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct LibraryScanner {
    supported_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ScanProgress {
    Started { total_directories: usize },
    DirectoryStarted { path: PathBuf },
    SongFound { progress: usize },
    DirectoryCompleted { path: PathBuf, songs_found: usize },
    Completed { total_songs: usize },
    Error { path: PathBuf, error: String },
}

/// Tag fields we care about, whatever container they came from.
#[derive(Debug, Default)]
struct SongTags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    track_number: Option<u32>,
    duration_ms: Option<u64>,
}

impl LibraryScanner {
    pub fn new() -> Self {
        Self {
            supported_extensions: ["mp3", "flac", "ogg", "oga", "mp4", "m4a", "aac", "wav"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Scan every existing directory, songs sorted by title.
    pub fn scan(&self, paths: &[PathBuf]) -> Vec<Song> {
        let mut songs: Vec<Song> = paths
            .iter()
            .filter(|path| path.exists())
            .flat_map(|path| self.scan_directory(path))
            .collect();

        sort_by_title(&mut songs);
        info!(songs = songs.len(), directories = paths.len(), "library scan complete");
        songs
    }

    pub fn scan_directory<P: AsRef<Path>>(&self, path: P) -> Vec<Song> {
        self.candidate_files(path.as_ref())
            .filter_map(|file| match self.song_from_file(&file) {
                Ok(song) => Some(song),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "skipping unreadable file");
                    None
                }
            })
            .collect()
    }

    /// Same as [`LibraryScanner::scan`] but reports progress over a channel
    /// and yields periodically so a UI loop stays responsive.
    pub async fn scan_incremental(
        &self,
        paths: &[PathBuf],
        progress_tx: mpsc::Sender<ScanProgress>,
    ) -> Vec<Song> {
        let mut all_songs = Vec::new();

        let _ = progress_tx
            .send(ScanProgress::Started {
                total_directories: paths.len(),
            })
            .await;

        for path in paths {
            if !path.exists() {
                let _ = progress_tx
                    .send(ScanProgress::Error {
                        path: path.clone(),
                        error: "Directory does not exist".to_string(),
                    })
                    .await;
                continue;
            }

            let _ = progress_tx
                .send(ScanProgress::DirectoryStarted { path: path.clone() })
                .await;

            let mut songs_found = 0;
            for file in self.candidate_files(path) {
                match self.song_from_file(&file) {
                    Ok(song) => {
                        all_songs.push(song);
                        songs_found += 1;

                        let _ = progress_tx
                            .send(ScanProgress::SongFound {
                                progress: all_songs.len(),
                            })
                            .await;

                        if all_songs.len() % 10 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    Err(e) => {
                        let _ = progress_tx
                            .send(ScanProgress::Error {
                                path: file,
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
            }

            let _ = progress_tx
                .send(ScanProgress::DirectoryCompleted {
                    path: path.clone(),
                    songs_found,
                })
                .await;
        }

        sort_by_title(&mut all_songs);
        let _ = progress_tx
            .send(ScanProgress::Completed {
                total_songs: all_songs.len(),
            })
            .await;

        all_songs
    }

    /// Visible, non-empty, sanely sized files with a known audio extension.
    fn candidate_files<'a>(&'a self, root: &Path) -> impl Iterator<Item = PathBuf> + 'a {
        WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                !entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with('.'))
            })
            .filter(|entry| {
                entry
                    .metadata()
                    .map(|meta| meta.len() > 0 && meta.len() <= MAX_FILE_SIZE)
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .filter(move |path| self.is_supported_file(path))
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    fn song_from_file(&self, path: &Path) -> Result<Song> {
        // Surface permission problems instead of silently producing a tagless song
        fs::metadata(path)?;

        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(AudioFormat::from_extension)
            .unwrap_or(AudioFormat::Unknown);

        let tags = match format {
            AudioFormat::Mp3 => read_id3_tags(path),
            AudioFormat::Mp4 => read_mp4_tags(path),
            _ => None,
        }
        .unwrap_or_default();

        // Untagged files are still songs; name them after the file
        let title = tags.title.or_else(|| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(|s| s.to_string())
        });

        debug!(path = %path.display(), ?format, "found song");

        Ok(Song::new(
            path.to_path_buf(),
            title,
            tags.artist,
            tags.album,
            tags.duration_ms.unwrap_or(0),
        )
        .with_track_number(tags.track_number))
    }
}

impl Default for LibraryScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_by_title(songs: &mut [Song]) {
    songs.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
}

fn read_id3_tags(path: &Path) -> Option<SongTags> {
    let tag = id3::Tag::read_from_path(path).ok()?;
    Some(SongTags {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        track_number: tag.track(),
        duration_ms: tag.duration().map(|d| d as u64),
    })
}

fn read_mp4_tags(path: &Path) -> Option<SongTags> {
    let tag = mp4ameta::Tag::read_from_path(path).ok()?;
    Some(SongTags {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        track_number: tag.track_number().map(|t| t as u32),
        duration_ms: tag.duration().map(|d| d.as_millis() as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tagged_mp3(path: &Path, title: &str, album: &str, track: u32) {
        fs::write(path, b"").unwrap();
        let mut tag = id3::Tag::new();
        tag.set_title(title);
        tag.set_artist("The Testers");
        tag.set_album(album);
        tag.set_track(track);
        tag.write_to_path(path, id3::Version::Id3v24).unwrap();
    }

    #[test]
    fn test_skips_hidden_empty_and_unsupported_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("song.mp3"), b"no tags in here").unwrap();
        fs::write(dir.path().join("empty.mp3"), b"").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"data").unwrap();
        fs::write(dir.path().join("notes.txt"), b"data").unwrap();

        let songs = LibraryScanner::new().scan_directory(dir.path());

        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title, "song");
        assert_eq!(songs[0].artist, crate::library::UNKNOWN_ARTIST);
    }

    #[test]
    fn test_reads_id3_tags_and_sorts_by_title() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("disc1");
        fs::create_dir_all(&nested).unwrap();
        write_tagged_mp3(&dir.path().join("b.mp3"), "Zulu", "Alphabet", 2);
        write_tagged_mp3(&nested.join("a.mp3"), "alpha", "Alphabet", 1);

        let songs = LibraryScanner::new().scan(&[dir.path().to_path_buf()]);

        let titles: Vec<_> = songs.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["alpha", "Zulu"]);
        assert_eq!(songs[0].album, "Alphabet");
        assert_eq!(songs[0].artist, "The Testers");
        assert_eq!(songs[0].track_number, Some(1));
        assert_eq!(songs[0].album_id, songs[1].album_id);
    }

    #[test]
    fn test_missing_directories_are_ignored() {
        let songs = LibraryScanner::new().scan(&[PathBuf::from("/definitely/not/here")]);
        assert!(songs.is_empty());
    }

    #[tokio::test]
    async fn test_incremental_scan_reports_progress() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.mp3"), b"x").unwrap();
        fs::write(dir.path().join("two.flac"), b"x").unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let scanner = LibraryScanner::new();
        let paths = vec![dir.path().to_path_buf(), PathBuf::from("/missing/dir")];
        let songs = scanner.scan_incremental(&paths, tx).await;
        assert_eq!(songs.len(), 2);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(ScanProgress::Started { total_directories: 2 })));
        assert!(matches!(events.last(), Some(ScanProgress::Completed { total_songs: 2 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanProgress::Error { path, .. } if path == Path::new("/missing/dir"))));
        assert_eq!(
            events.iter().filter(|e| matches!(e, ScanProgress::SongFound { .. })).count(),
            2
        );
    }
}
