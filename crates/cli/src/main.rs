//! Command-line client for Cadence.

mod api_client;

use anyhow::{Context, Result};
use api_client::{
    ApiClient, GcJobResponse, PlaylistEntry, PlaylistView, TriggerGcRequest, UpdateSongRequest,
    UploadRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use cadence_core::{DEFAULT_OFFLINE_CAPACITY_BYTES, MediaType, RangeSpec, SongId};
use cadence_offline::{
    AudioStream, CacheLookup, OfflineCache, RemoteError, RemoteLibrary, SongSnapshot,
};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const NO_SERVER: &str = "no server configured; pass --server or run `cadencectl config set-server <url>`";

#[derive(Parser)]
#[command(name = "cadencectl")]
#[command(about = "Command-line client for the Cadence audio library")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientConfigArgs {
    /// Client config file path
    #[arg(long, env = "CADENCE_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL (overrides client config)
    #[arg(long, env = "CADENCE_SERVER")]
    server: Option<String>,

    #[command(flatten)]
    client: ClientConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Upload an audio file
    Upload {
        /// Audio file to upload
        file: PathBuf,
        /// Song title (default: file name without extension)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        /// Content type (default: guessed from the file extension)
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        duration_ms: Option<u64>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// List songs in the catalog
    List {
        /// Case-insensitive match on title or artist
        #[arg(short, long)]
        query: Option<String>,
        /// Sort order (created_desc, title_asc)
        #[arg(long)]
        sort: Option<String>,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show one song
    Info {
        song_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Correct a song's title, artist or duration
    Edit {
        song_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        duration_ms: Option<u64>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Delete a song
    Delete {
        song_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Download a song (to stdout unless -o is given)
    Download {
        song_id: String,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Byte range, inclusive: `0-1023`, `1024-` or `-500`
        #[arg(long)]
        range: Option<String>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Playlist commands
    Playlist {
        #[command(subcommand)]
        command: PlaylistCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Offline cache commands
    Offline {
        #[command(subcommand)]
        command: OfflineCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Reconciliation job commands
    Gc {
        #[command(subcommand)]
        command: GcCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// Create a playlist
    Create { name: String },
    /// List playlists
    List,
    /// Show a playlist with its entries
    Show { playlist_id: String },
    /// Rename a playlist
    Rename { playlist_id: String, name: String },
    /// Append a song
    Add {
        playlist_id: String,
        song_id: String,
    },
    /// Remove the entry at a position
    Remove { playlist_id: String, position: u64 },
    /// Drop entries whose song was deleted
    Prune { playlist_id: String },
    /// Delete a playlist
    Delete { playlist_id: String },
}

#[derive(Subcommand)]
enum OfflineCommands {
    /// Make a song available offline
    Save { song_id: String },
    /// Read a song from the offline cache (to stdout unless -o is given)
    Get {
        song_id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Evict a song from the offline cache
    Remove { song_id: String },
    /// Show offline cache contents
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check cached songs against the server and refresh changed ones
    Reconcile,
}

#[derive(Subcommand)]
enum GcCommands {
    /// Run a reconciliation job
    Run {
        /// Job type (blob_tombstones, storage_sweep)
        #[arg(short, long, default_value = "blob_tombstones")]
        job_type: String,
        /// Wait for job completion
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// List recent jobs
    List {
        /// Maximum number of jobs to return
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one job
    Status { job_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective client configuration
    Show,
    /// Save the default server URL
    SetServer { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout may carry audio
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Upload {
            file,
            title,
            artist,
            content_type,
            duration_ms,
            api,
        } => {
            handle_upload_command(&file, title, artist, content_type, duration_ms, &api).await
        }
        Commands::List {
            query,
            sort,
            json,
            api,
        } => handle_list_command(query, sort, json, &api).await,
        Commands::Info { song_id, api } => {
            let client = get_api_client(&api).await?;
            print_song(&client.get_song(&song_id).await?);
            Ok(())
        }
        Commands::Edit {
            song_id,
            title,
            artist,
            duration_ms,
            api,
        } => {
            let update = UpdateSongRequest {
                title,
                artist,
                duration_ms,
            };
            handle_edit_command(&song_id, update, &api).await
        }
        Commands::Delete { song_id, api } => handle_delete_command(&song_id, &api).await,
        Commands::Download {
            song_id,
            output,
            range,
            api,
        } => handle_download_command(&song_id, output, range, &api).await,
        Commands::Playlist { command, api } => handle_playlist_command(command, &api).await,
        Commands::Offline { command, api } => handle_offline_command(command, &api).await,
        Commands::Gc { command, api } => handle_gc_command(command, &api).await,
        Commands::Config { command, client } => handle_config_command(command, &client).await,
    }
}

async fn resolve_server(api: &ApiArgs) -> Result<Option<String>> {
    if let Some(server) = &api.server {
        return Ok(Some(server.clone()));
    }
    let config_path = client_config_path(api.client.client_config.as_deref())?;
    let config = load_client_config(&config_path).await?;
    Ok(config.server)
}

async fn get_api_client(api: &ApiArgs) -> Result<ApiClient> {
    let server = resolve_server(api)
        .await?
        .ok_or_else(|| anyhow::anyhow!(NO_SERVER))?;
    let base_url = normalize_base_url(&server)?;
    tracing::debug!(server = %base_url, "Using API server");
    ApiClient::new(&base_url)
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

async fn handle_upload_command(
    file: &Path,
    title: Option<String>,
    artist: Option<String>,
    content_type: Option<String>,
    duration_ms: Option<u64>,
    api: &ApiArgs,
) -> Result<()> {
    let client = get_api_client(api).await?;
    let content_type = match content_type {
        Some(content_type) => content_type,
        None => guess_content_type(file)?,
    };
    let title = title.or_else(|| {
        file.file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
    });

    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let size = handle.metadata().await?.len();
    let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(handle));

    let song = client
        .upload_song(
            body,
            size,
            &UploadRequest {
                content_type,
                title,
                artist,
                duration_ms,
            },
        )
        .await?;

    println!("Uploaded {} ({})", song.id, format_bytes(song.content_length));
    print_song(&song);
    Ok(())
}

/// Content type for a file, from its extension.
fn guess_content_type(file: &Path) -> Result<String> {
    file.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| MediaType::from_extension(ext))
        .map(|media| media.as_str().to_string())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "cannot guess the content type of {}; pass --content-type",
                file.display()
            )
        })
}

async fn handle_list_command(
    query: Option<String>,
    sort: Option<String>,
    json: bool,
    api: &ApiArgs,
) -> Result<()> {
    let client = get_api_client(api).await?;
    let songs = client
        .list_songs(query.as_deref(), sort.as_deref())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&songs)?);
        return Ok(());
    }
    if songs.is_empty() {
        println!("No songs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:<24} {:>8} {:>12}",
        "ID", "Title", "Artist", "Length", "Size"
    );
    println!("{}", "-".repeat(116));
    for song in songs {
        println!(
            "{:<38} {:<30} {:<24} {:>8} {:>12}",
            song.id,
            truncate(&song.title, 30),
            truncate(&song.artist, 24),
            format_duration(song.duration_ms),
            format_bytes(song.content_length)
        );
    }
    Ok(())
}

async fn handle_edit_command(song_id: &str, update: UpdateSongRequest, api: &ApiArgs) -> Result<()> {
    if update.title.is_none() && update.artist.is_none() && update.duration_ms.is_none() {
        anyhow::bail!("nothing to change; pass --title, --artist or --duration-ms");
    }
    let client = get_api_client(api).await?;
    let song = client.update_song(song_id, &update).await?;
    println!("Updated {}", song.id);
    print_song(&song);
    Ok(())
}

async fn handle_delete_command(song_id: &str, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let response = client.delete_song(song_id).await?;
    match response.outcome.as_str() {
        "blob_cleanup_deferred" => println!(
            "Deleted song {} (audio cleanup deferred to the blob_tombstones job)",
            response.song_id
        ),
        _ => println!("Deleted song {}", response.song_id),
    }
    Ok(())
}

async fn handle_download_command(
    song_id: &str,
    output: Option<PathBuf>,
    range: Option<String>,
    api: &ApiArgs,
) -> Result<()> {
    if let Some(range) = &range {
        RangeSpec::parse_header(&format!("bytes={range}")).context("invalid --range")?;
    }

    let client = get_api_client(api).await?;
    let response = client.open_audio(song_id, range.as_deref()).await?;
    let stream = response.bytes_stream();

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            let written = copy_stream(stream, &mut file).await?;
            eprintln!("Wrote {} to {}", format_bytes(written), path.display());
        }
        None => {
            copy_stream(stream, &mut tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

async fn copy_stream<S, E, W>(stream: S, writer: &mut W) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download interrupted")?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

async fn handle_playlist_command(command: PlaylistCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        PlaylistCommands::Create { name } => {
            let playlist = client.create_playlist(&name).await?;
            println!("Playlist created: {} ({})", playlist.name, playlist.id);
        }
        PlaylistCommands::List => {
            let playlists = client.list_playlists().await?;
            if playlists.is_empty() {
                println!("No playlists found.");
            } else {
                println!("{:<38} {:<30} Updated", "ID", "Name");
                println!("{}", "-".repeat(90));
                for playlist in playlists {
                    println!(
                        "{:<38} {:<30} {}",
                        playlist.id,
                        truncate(&playlist.name, 30),
                        playlist.updated_at
                    );
                }
            }
        }
        PlaylistCommands::Show { playlist_id } => {
            print_playlist(&client.get_playlist(&playlist_id).await?);
        }
        PlaylistCommands::Rename { playlist_id, name } => {
            let playlist = client.rename_playlist(&playlist_id, &name).await?;
            println!("Playlist renamed to {}", playlist.name);
        }
        PlaylistCommands::Add {
            playlist_id,
            song_id,
        } => {
            let view = client.add_to_playlist(&playlist_id, &song_id).await?;
            print_playlist(&view);
        }
        PlaylistCommands::Remove {
            playlist_id,
            position,
        } => {
            let view = client.remove_from_playlist(&playlist_id, position).await?;
            print_playlist(&view);
        }
        PlaylistCommands::Prune { playlist_id } => {
            let response = client.prune_playlist(&playlist_id).await?;
            println!("Removed {} dangling entries", response.removed);
        }
        PlaylistCommands::Delete { playlist_id } => {
            client.delete_playlist(&playlist_id).await?;
            println!("Playlist deleted: {playlist_id}");
        }
    }

    Ok(())
}

fn print_playlist(view: &PlaylistView) {
    println!("{} ({})", view.playlist.name, view.playlist.id);
    if view.entries.is_empty() {
        println!("  (empty)");
    }
    for entry in &view.entries {
        match entry {
            PlaylistEntry::Song { position, song } => {
                println!("  {position:>3}. {} - {} [{}]", song.title, song.artist, song.id);
            }
            PlaylistEntry::Dangling { position, song_id } => {
                println!("  {position:>3}. <deleted song {song_id}>");
            }
        }
    }
}

/// Stands in for the server when none is configured, so cached songs stay
/// playable.
struct Disconnected;

#[async_trait]
impl RemoteLibrary for Disconnected {
    async fn fetch_song(&self, _id: SongId) -> std::result::Result<SongSnapshot, RemoteError> {
        Err(RemoteError::Unavailable(NO_SERVER.to_string()))
    }

    async fn fetch_audio(&self, _id: SongId) -> std::result::Result<AudioStream, RemoteError> {
        Err(RemoteError::Unavailable(NO_SERVER.to_string()))
    }

    async fn list_catalog(&self) -> std::result::Result<Vec<SongSnapshot>, RemoteError> {
        Err(RemoteError::Unavailable(NO_SERVER.to_string()))
    }
}

async fn open_offline_cache(api: &ApiArgs) -> Result<OfflineCache> {
    let config_path = client_config_path(api.client.client_config.as_deref())?;
    let config = load_client_config(&config_path).await?;
    let dir = offline_dir(&config)?;

    let remote: Arc<dyn RemoteLibrary> = match api.server.as_ref().or(config.server.as_ref()) {
        Some(server) => Arc::new(ApiClient::new(&normalize_base_url(server)?)?),
        None => Arc::new(Disconnected),
    };

    OfflineCache::open(&dir, config.offline.capacity_bytes, remote)
        .await
        .with_context(|| format!("failed to open offline cache at {}", dir.display()))
}

fn parse_song_id(song_id: &str) -> Result<SongId> {
    SongId::parse(song_id).with_context(|| format!("invalid song id: {song_id}"))
}

async fn handle_offline_command(command: OfflineCommands, api: &ApiArgs) -> Result<()> {
    let cache = open_offline_cache(api).await?;

    match command {
        OfflineCommands::Save { song_id } => {
            let song = cache.save(parse_song_id(&song_id)?).await?;
            println!(
                "Saved {} - {} ({}) for offline use",
                song.title,
                song.artist,
                format_bytes(song.content_length)
            );
        }
        OfflineCommands::Get { song_id, output } => {
            let song_id = parse_song_id(&song_id)?;
            let CacheLookup::Hit(song) = cache.get(song_id).await? else {
                anyhow::bail!(
                    "song {song_id} is not available offline; run `cadencectl offline save {song_id}`"
                );
            };
            if song.stale {
                eprintln!("Note: the server has a newer version of this song");
            }
            let data = song.read().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Wrote {} to {}", format_bytes(data.len() as u64), path.display());
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        OfflineCommands::Remove { song_id } => {
            let song_id = parse_song_id(&song_id)?;
            cache.remove(song_id).await?;
            println!("Removed {song_id} from the offline cache");
        }
        OfflineCommands::Status { json } => {
            let status = cache.status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            println!(
                "Offline cache: {} ({} of {} used)",
                cache.dir().display(),
                format_bytes(status.used),
                format_bytes(status.capacity)
            );
            if status.entries.is_empty() {
                println!("No songs cached.");
            } else {
                println!(
                    "{:<38} {:<10} {:>12} {}",
                    "ID", "State", "Size", "Song"
                );
                println!("{}", "-".repeat(100));
                for entry in status.entries {
                    println!(
                        "{:<38} {:<10} {:>12} {} - {}{}",
                        entry.song_id,
                        entry.state,
                        format_bytes(entry.size),
                        entry.title,
                        entry.artist,
                        if entry.pinned { " (pinned)" } else { "" }
                    );
                }
            }
        }
        OfflineCommands::Reconcile => {
            let report = cache.reconcile().await?;
            println!("Reconciliation complete:");
            println!("  Checked: {}", report.checked);
            println!("  Marked stale: {}", report.marked_stale);
            println!("  Refreshed: {}", report.refreshed);
            println!("  Evicted: {}", report.evicted);
            println!("  Failed: {}", report.failed);
        }
    }

    Ok(())
}

async fn handle_gc_command(command: GcCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        GcCommands::Run { job_type, wait } => {
            let response = client.trigger_gc(TriggerGcRequest { job_type }).await?;
            println!("GC job queued: {}", response.job_id);

            if wait {
                loop {
                    let job = client.get_gc_job(&response.job_id).await?;
                    match job.state.as_str() {
                        "queued" | "running" => {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                        "finished" => {
                            println!("GC completed.");
                            if let Some(stats) = job.stats {
                                println!("Stats:");
                                println!("  Items processed: {}", stats.items_processed);
                                println!("  Items deleted: {}", stats.items_deleted);
                                println!("  Bytes reclaimed: {}", stats.bytes_reclaimed);
                                println!("  Errors: {}", stats.errors);
                            }
                            break;
                        }
                        "failed" => {
                            anyhow::bail!("GC failed");
                        }
                        other => {
                            anyhow::bail!("unknown GC state: {other}");
                        }
                    }
                }
            }
        }
        GcCommands::List { limit } => {
            let jobs = client.list_gc_jobs(limit).await?;
            if jobs.is_empty() {
                println!("No GC jobs found.");
            } else {
                println!("{:<38} {:<16} {:<10} Started", "ID", "Type", "State");
                println!("{}", "-".repeat(90));
                for job in jobs {
                    println!(
                        "{:<38} {:<16} {:<10} {}",
                        job.job_id,
                        job.job_type,
                        job.state,
                        job.started_at.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        GcCommands::Status { job_id } => {
            let job = client.get_gc_job(&job_id).await?;
            print_gc_job(&job);
        }
    }

    Ok(())
}

fn print_gc_job(job: &GcJobResponse) {
    println!("GC Job Status");
    println!("  ID: {}", job.job_id);
    println!("  Type: {}", job.job_type);
    println!("  State: {}", job.state);
    if let Some(started) = &job.started_at {
        println!("  Started: {started}");
    }
    if let Some(finished) = &job.finished_at {
        println!("  Finished: {finished}");
    }
    if let Some(stats) = &job.stats {
        println!("  Stats:");
        println!("    Items processed: {}", stats.items_processed);
        println!("    Items deleted: {}", stats.items_deleted);
        println!("    Bytes reclaimed: {}", stats.bytes_reclaimed);
        println!("    Errors: {}", stats.errors);
    }
}

async fn handle_config_command(command: ConfigCommands, client: &ClientConfigArgs) -> Result<()> {
    let path = client_config_path(client.client_config.as_deref())?;

    match command {
        ConfigCommands::Show => {
            let config = load_client_config(&path).await?;
            println!("Config file: {}", path.display());
            println!(
                "Server: {}",
                config.server.as_deref().unwrap_or("(not set)")
            );
            println!("Offline dir: {}", offline_dir(&config)?.display());
            println!(
                "Offline capacity: {}",
                format_bytes(config.offline.capacity_bytes)
            );
        }
        ConfigCommands::SetServer { url } => {
            let url = normalize_base_url(&url)?;
            let mut config = load_client_config(&path).await?;
            config.server = Some(url.clone());
            save_client_config(&path, &config).await?;
            println!("Server set to {url}");
        }
    }
    Ok(())
}

fn print_song(song: &SongSnapshot) {
    println!("  ID: {}", song.id);
    println!("  Title: {}", song.title);
    println!("  Artist: {}", song.artist);
    println!("  Duration: {}", format_duration(song.duration_ms));
    println!("  Type: {}", song.content_type);
    println!("  Size: {}", format_bytes(song.content_length));
    println!("  SHA-256: {}", song.content_hash);
    println!("  Created: {}", song.created_at);
    println!("  Updated: {}", song.updated_at);
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) => {
            let secs = ms / 1000;
            format!("{}:{:02}", secs / 60, secs % 60)
        }
        None => "-".to_string(),
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    server: Option<String>,
    offline: OfflineSettings,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct OfflineSettings {
    /// Cache directory (default: the platform data dir)
    dir: Option<PathBuf>,
    capacity_bytes: u64,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            dir: None,
            capacity_bytes: DEFAULT_OFFLINE_CAPACITY_BYTES,
        }
    }
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("CADENCE_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!("no config directory found; set CADENCE_CLIENT_CONFIG")
    })?;
    Ok(base.join("cadence").join("client.toml"))
}

fn offline_dir(config: &ClientConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.offline.dir {
        return Ok(dir.clone());
    }
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("no data directory found; set offline.dir"))?;
    Ok(base.join("cadence").join("offline"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("CADENCE_CLIENT_").split("__"));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}

async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::future::Future;
    use std::sync::OnceLock;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    async fn with_env_lock<F, Fut, T>(action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().await;
        action().await
    }

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: env-mutating tests serialize on ENV_LOCK
            unsafe { std::env::set_var(key, value) };
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: env-mutating tests serialize on ENV_LOCK
            unsafe {
                if let Some(value) = self.prev.take() {
                    std::env::set_var(self.key, value);
                } else {
                    std::env::remove_var(self.key);
                }
            }
        }
    }

    #[test]
    fn normalize_base_url_requires_scheme() {
        assert!(normalize_base_url("example.com").is_err());
        assert_eq!(
            normalize_base_url("https://music.example.com/").unwrap(),
            "https://music.example.com"
        );
    }

    #[test]
    fn guess_content_type_from_extension() {
        assert_eq!(
            guess_content_type(Path::new("/music/Blue.MP3")).unwrap(),
            "audio/mpeg"
        );
        assert_eq!(
            guess_content_type(Path::new("track.flac")).unwrap(),
            "audio/flac"
        );
        assert!(guess_content_type(Path::new("cover.png")).is_err());
        assert!(guess_content_type(Path::new("README")).is_err());
    }

    #[test]
    fn format_helpers() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_duration(Some(181_500)), "3:01");
        assert_eq!(format_duration(None), "-");
        assert_eq!(truncate("Help Me", 30), "Help Me");
        assert_eq!(truncate("The Hissing of Summer Lawns", 10), "The Hissi…");
    }

    #[tokio::test]
    async fn client_config_roundtrip() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let path = temp.path().join("client.toml");

            let config = ClientConfig {
                server: Some("https://music.example.com".to_string()),
                offline: OfflineSettings {
                    dir: Some(temp.path().join("offline")),
                    capacity_bytes: 10 * 1024 * 1024,
                },
            };

            save_client_config(&path, &config).await.unwrap();
            let loaded = load_client_config(&path).await.unwrap();
            assert_eq!(loaded.server, config.server);
            assert_eq!(loaded.offline.dir, config.offline.dir);
            assert_eq!(loaded.offline.capacity_bytes, 10 * 1024 * 1024);
        })
        .await;
    }

    #[tokio::test]
    async fn load_client_config_missing_returns_default() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let path = temp.path().join("missing.toml");
            let config = load_client_config(&path).await.unwrap();
            assert!(config.server.is_none());
            assert_eq!(config.offline.capacity_bytes, DEFAULT_OFFLINE_CAPACITY_BYTES);
        })
        .await;
    }

    #[tokio::test]
    async fn client_config_env_overrides_file() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let path = temp.path().join("client.toml");
            tokio::fs::write(&path, "server = \"http://from-file:8080\"\n")
                .await
                .unwrap();

            let _capacity = EnvVarGuard::set("CADENCE_CLIENT_OFFLINE__CAPACITY_BYTES", "2048");
            let config = load_client_config(&path).await.unwrap();
            assert_eq!(config.server.as_deref(), Some("http://from-file:8080"));
            assert_eq!(config.offline.capacity_bytes, 2048);
        })
        .await;
    }

    #[tokio::test]
    async fn client_config_path_respects_env() {
        with_env_lock(|| async {
            let _guard = EnvVarGuard::set("CADENCE_CLIENT_CONFIG", "/tmp/cadence-client.toml");
            assert_eq!(
                client_config_path(None).unwrap(),
                PathBuf::from("/tmp/cadence-client.toml")
            );
            assert_eq!(
                client_config_path(Some("/etc/cadence.toml")).unwrap(),
                PathBuf::from("/etc/cadence.toml")
            );
        })
        .await;
    }

    #[test]
    fn offline_dir_prefers_config() {
        let config = ClientConfig {
            server: None,
            offline: OfflineSettings {
                dir: Some(PathBuf::from("/var/cache/cadence")),
                capacity_bytes: 1,
            },
        };
        assert_eq!(
            offline_dir(&config).unwrap(),
            PathBuf::from("/var/cache/cadence")
        );
    }
}
