use super::{CacheKey, RawImage};
use crate::config::ArtConfig;
use crate::library::AudioFormat;
use id3::TagLike;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Turns a cache key into pixels. May be slow, may fail; the loader only ever
/// calls it from a decode worker.
pub trait ArtDecoder: Send + Sync {
    fn decode(&self, key: &CacheKey) -> Option<RawImage>;
}

impl<F> ArtDecoder for F
where
    F: Fn(&CacheKey) -> Option<RawImage> + Send + Sync,
{
    fn decode(&self, key: &CacheKey) -> Option<RawImage> {
        self(key)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("id3 tag unreadable: {0}")]
    Id3(#[from] id3::Error),
    #[error("mp4 tag unreadable: {0}")]
    Mp4(#[from] mp4ameta::Error),
    #[error("no artwork found for {0}")]
    NoArtwork(String),
}

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];
const COVER_STEMS: [&str; 4] = ["cover", "folder", "front", "album"];

/// Reads artwork from the local filesystem.
///
/// Keys are resolved in this order: `album:<id>` keys look for `<id>.<ext>`
/// in the album art directory, directories are searched for a cover image,
/// image files are read directly and audio files have their embedded
/// artwork extracted from ID3 or MP4 tags.
#[derive(Debug, Clone)]
pub struct FileArtDecoder {
    album_art_dir: Option<PathBuf>,
    max_edge: u32,
}

impl FileArtDecoder {
    /// `max_edge` bounds the longer side of decoded covers; 0 keeps full size.
    pub fn new(max_edge: u32) -> Self {
        Self {
            album_art_dir: None,
            max_edge,
        }
    }

    pub fn with_album_art_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.album_art_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &ArtConfig) -> Self {
        let decoder = Self::new(config.max_edge);
        match &config.album_art_dir {
            Some(dir) => decoder.with_album_art_dir(dir),
            None => decoder,
        }
    }

    pub fn try_decode(&self, key: &CacheKey) -> Result<RawImage, DecodeError> {
        let bytes = self.load_bytes(key)?;
        self.decode_bytes(&bytes)
    }

    /// Decode an encoded image into RGBA8, downscaling past `max_edge`.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<RawImage, DecodeError> {
        let img = image::load_from_memory(bytes)?;

        let img = if self.max_edge > 0 && (img.width() > self.max_edge || img.height() > self.max_edge) {
            img.thumbnail(self.max_edge, self.max_edge)
        } else {
            img
        };

        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(RawImage::new(width, height, 4, rgba.into_raw()))
    }

    fn load_bytes(&self, key: &CacheKey) -> Result<Vec<u8>, DecodeError> {
        if let Some(album_id) = key.album_id() {
            return self.album_art_bytes(album_id, key);
        }

        let path = Path::new(key.as_str());
        if path.is_dir() {
            return cover_in_directory(path)
                .ok_or_else(|| DecodeError::NoArtwork(key.to_string()))
                .and_then(|cover| Ok(fs::read(cover)?));
        }

        if is_image_file(path) {
            return Ok(fs::read(path)?);
        }

        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(AudioFormat::from_extension)
            .unwrap_or(AudioFormat::Unknown);

        embedded_artwork(path, &format)?.ok_or_else(|| DecodeError::NoArtwork(key.to_string()))
    }

    fn album_art_bytes(&self, album_id: u64, key: &CacheKey) -> Result<Vec<u8>, DecodeError> {
        let dir = self
            .album_art_dir
            .as_ref()
            .ok_or_else(|| DecodeError::NoArtwork(key.to_string()))?;

        let found = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", album_id, ext)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| DecodeError::NoArtwork(key.to_string()))?;

        Ok(fs::read(found)?)
    }
}

impl Default for FileArtDecoder {
    fn default() -> Self {
        Self::new(ArtConfig::default().max_edge)
    }
}

impl ArtDecoder for FileArtDecoder {
    fn decode(&self, key: &CacheKey) -> Option<RawImage> {
        match self.try_decode(key) {
            Ok(image) => {
                debug!(key = %key, width = image.width, height = image.height, "decoded album art");
                Some(image)
            }
            Err(DecodeError::NoArtwork(_)) => {
                debug!(key = %key, "no album art available");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to decode album art");
                None
            }
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// First `cover.jpg` / `folder.png` style image inside `dir`.
fn cover_in_directory(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image_file(path))
        .filter(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(|stem| COVER_STEMS.contains(&stem.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();

    // read_dir order is platform dependent
    candidates.sort();
    candidates.into_iter().next()
}

fn embedded_artwork(path: &Path, format: &AudioFormat) -> Result<Option<Vec<u8>>, DecodeError> {
    match format {
        AudioFormat::Mp3 => {
            let tag = id3::Tag::read_from_path(path)?;
            let picture = tag
                .pictures()
                .find(|p| p.picture_type == id3::frame::PictureType::CoverFront)
                .or_else(|| tag.pictures().next());
            Ok(picture.map(|p| p.data.clone()))
        }
        AudioFormat::Mp4 => {
            let tag = mp4ameta::Tag::read_from_path(path)?;
            Ok(tag.artwork().map(|img| img.data.to_vec()))
        }
        _ => Ok(None),
    }
}
