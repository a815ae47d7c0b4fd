// HarmoniQ - local music library tools
// Scans the library, warms the album art cache, manages lyrics

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harmoniq::{
    art::{ArtCache, ArtLoader, ArtOutcome, CacheKey, ConsumerHandle, FileArtDecoder},
    config::Config,
    library::{self, scanner::ScanProgress, Album, LibraryScanner},
    lyrics::LyricsStore,
};
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "harmoniq")]
#[command(about = "Local music library with a bounded album art cache")]
struct Args {
    /// Also log to stderr
    #[arg(long, global = true)]
    dev: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the library and warm the album art cache
    Scan {
        /// Directories to scan (defaults to the configured ones)
        dirs: Vec<PathBuf>,
        /// Print cache statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode the artwork behind one key (a path or album:<id>)
    Art { key: String },
    /// Show, set or delete lyrics for a song (numeric id or file path)
    Lyrics {
        #[command(subcommand)]
        action: LyricsAction,
    },
}

#[derive(Subcommand)]
enum LyricsAction {
    Show { song: String },
    Set { song: String, text: String },
    Delete { song: String },
}

fn init_logging(dev: bool) -> Result<WorkerGuard> {
    let log_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harmoniq")
        .join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "harmoniq.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,harmoniq=debug"));

    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter);

    if dev {
        let subscriber = builder
            .with_writer(file_writer.and(std::io::stderr))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_writer(file_writer).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn build_loader(config: &Config) -> Result<ArtLoader> {
    let cache = Arc::new(ArtCache::new(config.art.capacity_bytes)?);
    let decoder = Arc::new(FileArtDecoder::from_config(&config.art));
    Ok(ArtLoader::new(cache, decoder, config.art.workers)?)
}

/// Numeric ids are used as-is, anything else is treated as a song path.
fn parse_song_id(song: &str) -> u64 {
    song.parse()
        .unwrap_or_else(|_| library::song_id(std::path::Path::new(song)))
}

/// Request every album's cover and wait for all of them.
/// Returns (loaded, fallback) counts.
async fn warm_album_art(loader: &mut ArtLoader, albums: &[Album], has_album_dir: bool) -> (usize, usize) {
    let ready = Rc::new(Cell::new(0usize));
    let fallback = Rc::new(Cell::new(0usize));

    for (index, album) in albums.iter().enumerate() {
        // album-level art needs the album art dir; otherwise use what the first song embeds
        let key = match (has_album_dir, &album.representative_path) {
            (false, Some(path)) => CacheKey::from(path.as_path()),
            _ => album.art_key(),
        };

        let (ready, fallback) = (Rc::clone(&ready), Rc::clone(&fallback));
        loader.request(ConsumerHandle::new(index as u64), key, move |outcome| match outcome {
            ArtOutcome::Ready(_) => ready.set(ready.get() + 1),
            ArtOutcome::Fallback => fallback.set(fallback.get() + 1),
        });
    }

    loader.settle().await;
    (ready.get(), fallback.get())
}

async fn scan(config: &Config, dirs: Vec<PathBuf>, json: bool) -> Result<()> {
    let directories = if dirs.is_empty() {
        config.music_directories.clone()
    } else {
        dirs
    };

    let scanner = LibraryScanner::new();
    let (progress_tx, mut progress_rx) = mpsc::channel(128);

    let scan_task = {
        let scanner = scanner.clone();
        let directories = directories.clone();
        tokio::spawn(async move { scanner.scan_incremental(&directories, progress_tx).await })
    };

    while let Some(progress) = progress_rx.recv().await {
        match progress {
            ScanProgress::DirectoryStarted { path } => println!("Scanning {}", path.display()),
            ScanProgress::DirectoryCompleted { path, songs_found } => {
                println!("  {}: {} songs", path.display(), songs_found)
            }
            ScanProgress::Error { path, error } => debug!(path = %path.display(), %error, "scan error"),
            _ => {}
        }
    }

    let songs = scan_task.await?;
    let albums = library::albums(&songs);
    println!("Found {} songs in {} albums", songs.len(), albums.len());

    let mut loader = build_loader(config)?;
    let (ready, fallback) =
        warm_album_art(&mut loader, &albums, config.art.album_art_dir.is_some()).await;

    let stats = loader.cache().stats();
    info!(ready, fallback, ?stats, "album art warmed");

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Album art: {} loaded, {} using the default cover", ready, fallback);
        println!(
            "Cache: {} entries, {} / {} bytes",
            stats.entries, stats.occupied_bytes, stats.capacity_bytes
        );
    }

    Ok(())
}

async fn art(config: &Config, key: String) -> Result<()> {
    let mut loader = build_loader(config)?;
    let result: Rc<Cell<Option<(u32, u32, usize)>>> = Rc::default();

    let sink = Rc::clone(&result);
    loader.request(ConsumerHandle::new(0), key.as_str(), move |outcome| {
        sink.set(outcome.entry().map(|entry| {
            let (width, height) = entry.dimensions();
            (width, height, entry.byte_size())
        }));
    });
    loader.settle().await;

    match result.get() {
        Some((width, height, bytes)) => println!("{}: {}x{} ({} bytes decoded)", key, width, height, bytes),
        None => println!("{}: no artwork, default cover", key),
    }

    Ok(())
}

fn lyrics(config: &Config, action: LyricsAction) -> Result<()> {
    let store = LyricsStore::open(&config.lyrics_dir)?;

    match action {
        LyricsAction::Show { song } => {
            let text = store.load(parse_song_id(&song))?;
            if text.is_empty() {
                println!("No lyrics stored");
            } else {
                print!("{}", text);
            }
        }
        LyricsAction::Set { song, text } => {
            store.save(parse_song_id(&song), &text)?;
            println!("Lyrics saved");
        }
        LyricsAction::Delete { song } => {
            if store.delete(parse_song_id(&song))? {
                println!("Lyrics deleted");
            } else {
                println!("No lyrics stored");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.dev)?;

    info!("HarmoniQ starting up");

    // Load config - falls back to defaults if missing
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Scan { dirs, json } => scan(&config, dirs, json).await?,
        Command::Art { key } => art(&config, key).await?,
        Command::Lyrics { action } => lyrics(&config, action)?,
    }

    Ok(())
}
