//! uniblob CLI - Command line interface for object storage URIs.
//!
//! Every command takes `adapter://bucket/key` URIs and routes them to the
//! matching adapter (`disk`, `inmemory`, `gcs`).

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use uniblob_storage::{for_uri, DEFAULT_CHUNK_SIZE};

#[derive(Parser)]
#[command(name = "uniblob")]
#[command(about = "uniblob - One interface for disk, memory and cloud object storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an object.
    Get {
        /// Source URI.
        uri: String,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a file as an object.
    Put {
        /// Destination URI.
        uri: String,

        /// File to upload.
        file: PathBuf,
    },

    /// List keys under a URI prefix.
    Ls {
        /// Bucket or prefix URI.
        uri: String,

        /// Keys fetched per page.
        #[arg(long, default_value_t = 1000)]
        page_size: usize,
    },

    /// Delete an object.
    Rm {
        /// Object URI.
        uri: String,
    },

    /// Check whether an object exists. Exits non-zero when it does not.
    Exists {
        /// Object URI.
        uri: String,
    },

    /// Stream an object to stdout chunk by chunk.
    Cat {
        /// Object URI.
        uri: String,

        /// Chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Upload a file chunk by chunk.
    StreamPut {
        /// Destination URI.
        uri: String,

        /// File to upload.
        file: PathBuf,

        /// Chunk size in bytes.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Move an object to another key of the same adapter.
    Mv {
        /// Source URI.
        from: String,

        /// Destination URI.
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for object content.
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Get { uri, output } => cmd_get(&uri, output.as_deref()).await,

        Commands::Put { uri, file } => cmd_put(&uri, &file).await,

        Commands::Ls { uri, page_size } => cmd_ls(&uri, page_size).await,

        Commands::Rm { uri } => cmd_rm(&uri).await,

        Commands::Exists { uri } => cmd_exists(&uri).await,

        Commands::Cat { uri, chunk_size } => cmd_cat(&uri, chunk_size).await,

        Commands::StreamPut {
            uri,
            file,
            chunk_size,
        } => cmd_stream_put(&uri, &file, chunk_size).await,

        Commands::Mv { from, to } => cmd_mv(&from, &to).await,
    }
}

async fn cmd_get(uri: &str, output: Option<&Path>) -> Result<()> {
    let storage = for_uri(uri).context("Invalid URI")?;
    let object = storage.download().await.context("Failed to download object")?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &object.content)
                .await
                .context("Failed to write output file")?;
            info!("Downloaded {} bytes to {}", object.content.len(), path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&object.content).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn cmd_put(uri: &str, file: &Path) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .context("Failed to read source file")?;

    let storage = for_uri(uri).context("Invalid URI")?;
    let size = content.len();
    storage.upload(content).await.context("Failed to upload object")?;

    println!("Uploaded {} bytes to {}", size, storage.uri());
    Ok(())
}

async fn cmd_ls(uri: &str, page_size: usize) -> Result<()> {
    let storage = for_uri(uri).context("Invalid URI")?;
    let mut pages = storage.list(page_size).await.context("Failed to list keys")?;

    let mut count = 0usize;
    while let Some(page) = pages.try_next().await.context("Failed to fetch page")? {
        for key in page.keys {
            println!("{}", key);
            count += 1;
        }
    }

    info!("{} keys under {}", count, storage.uri());
    Ok(())
}

async fn cmd_rm(uri: &str) -> Result<()> {
    let storage = for_uri(uri).context("Invalid URI")?;
    storage.delete().await.context("Failed to delete object")?;

    println!("Deleted {}", storage.uri());
    Ok(())
}

async fn cmd_exists(uri: &str) -> Result<()> {
    let storage = for_uri(uri).context("Invalid URI")?;
    let exists = storage.exists().await.context("Failed to check object")?;

    println!("{}", exists);
    if !exists {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_cat(uri: &str, chunk_size: Option<usize>) -> Result<()> {
    let streamer = for_uri(uri)
        .context("Invalid URI")?
        .stream()
        .context("Cannot stream this URI")?;
    let mut chunks = streamer
        .download(chunk_size)
        .await
        .context("Failed to open object")?;

    let mut stdout = tokio::io::stdout();
    while let Some((_, chunk)) = chunks.try_next().await.context("Failed to read chunk")? {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn cmd_stream_put(uri: &str, file: &Path, chunk_size: usize) -> Result<()> {
    anyhow::ensure!(chunk_size > 0, "Chunk size must be positive");

    let storage = for_uri(uri).context("Invalid URI")?;
    let mut source = tokio::fs::File::open(file)
        .await
        .context("Failed to open source file")?;
    let mut sink = storage
        .stream()
        .context("Cannot stream this URI")?
        .open_sink()
        .await
        .context("Failed to open upload")?;

    let mut total = 0usize;
    while let Some(chunk) = read_chunk(&mut source, chunk_size).await? {
        total += chunk.len();
        sink.write(chunk).await.context("Failed to write chunk")?;
    }
    sink.finish().await.context("Failed to finish upload")?;

    println!("Streamed {} bytes to {}", total, storage.uri());
    Ok(())
}

async fn cmd_mv(from: &str, to: &str) -> Result<()> {
    let storage = for_uri(from).context("Invalid source URI")?;
    let moved = storage.move_to(to).await.context("Failed to move object")?;

    println!("Moved {} to {}", storage.uri(), moved);
    Ok(())
}

/// Fill one chunk from `source`, returning `None` at end of file.
async fn read_chunk(source: &mut tokio::fs::File, chunk_size: usize) -> Result<Option<Bytes>> {
    let mut buffer = BytesMut::with_capacity(chunk_size);
    while buffer.len() < chunk_size {
        let read = source
            .read_buf(&mut buffer)
            .await
            .context("Failed to read source file")?;
        if read == 0 {
            break;
        }
    }

    if buffer.is_empty() {
        Ok(None)
    } else {
        Ok(Some(buffer.freeze()))
    }
}
