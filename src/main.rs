//! songprint - fingerprint WAV files and identify them against a SQLite index.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use songprint::{logging, Engine, EngineConfig, NewSong, PcmDecoder, WavDecoder};

#[derive(Parser)]
#[command(name = "songprint")]
#[command(about = "Landmark audio fingerprinting and song identification")]
#[command(version)]
struct Cli {
    /// SQLite index file
    #[arg(long, global = true, default_value = "songprint.db")]
    db: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when SONGPRINT_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprints of a WAV file as JSON
    Fingerprint {
        wav: PathBuf,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add a reference song to the index
    Ingest {
        wav: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        artist: String,
        #[arg(long)]
        album: Option<String>,
        /// Fail instead of skipping when the song already exists
        #[arg(long)]
        strict: bool,
    },
    /// Identify a recording
    Identify { wav: PathBuf },
    /// Delete a song and its fingerprints
    Remove { id: i64 },
    /// Show one song with its fingerprint count
    Song { id: i64 },
    /// List songs, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Index totals
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    Ok(match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Err(err) = logging::init(&cli.log) {
        eprintln!("{err}");
    }
    let config = load_config(cli.config.as_deref())?;

    if let Commands::Fingerprint { wav, output } = &cli.command {
        let buffer = WavDecoder.decode_file(wav)?;
        let engine = Engine::in_memory(config)?;
        let set = engine.fingerprint_set(&buffer)?;
        match output {
            Some(path) => std::fs::write(path, set.to_json()?)?,
            None => println!("{}", set.to_json()?),
        }
        return Ok(());
    }

    let engine = Engine::open_sqlite(config, &cli.db)?;
    match cli.command {
        Commands::Fingerprint { .. } => {}
        Commands::Ingest {
            wav,
            title,
            artist,
            album,
            strict,
        } => {
            let buffer = WavDecoder.decode_file(&wav)?;
            let mut song =
                NewSong::new(title, artist).duration_seconds(buffer.duration_secs().ceil() as u32);
            if let Some(album) = album {
                song = song.album(album);
            }
            match engine.ingest_audio(&song, buffer, !strict)? {
                Some(report) => print_json(&report)?,
                None => warn!(
                    title = %song.title,
                    artist = %song.artist,
                    "Song already indexed; skipped"
                ),
            }
        }
        Commands::Identify { wav } => {
            let buffer = WavDecoder.decode_file(&wav)?;
            match engine.identify(buffer)? {
                Some(result) => {
                    let song = engine.index().song(result.song_id)?;
                    print_json(&serde_json::json!({ "match": result, "song": song }))?;
                }
                None => print_json(&serde_json::json!({ "match": null }))?,
            }
        }
        Commands::Remove { id } => {
            let removed = engine.remove(id)?;
            print_json(&serde_json::json!({ "id": id, "removed": removed }))?;
        }
        Commands::Song { id } => print_json(&engine.index().song_metadata(id)?)?,
        Commands::List { limit, offset } => print_json(&engine.index().list_songs(limit, offset)?)?,
        Commands::Stats => print_json(&engine.index().stats()?)?,
    }
    Ok(())
}
