//! Uniform object storage behind `adapter://bucket/key` URIs.
//!
//! Every backend (local disk, process memory, Google Cloud Storage) exposes
//! the same semantics through the [`StorageAdapter`] trait, and
//! [`KeyStorage`] routes a URI to the adapter its scheme names.
//!
//! # Design Principles
//! - One contract: a key written through one adapter reads, lists and
//!   deletes the same way on every other
//! - Async operations: All I/O operations are async
//! - Streaming support: Large objects move in bounded chunks
//! - Unified error semantics: Consistent error types across adapters
//!
//! ```no_run
//! # async fn demo() -> uniblob_common::Result<()> {
//! let storage = uniblob_storage::for_uri("inmemory://reports/2019-01/summary.xml")?;
//! storage.upload("<report/>").await?;
//! assert!(storage.exists().await?);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod disk;
pub mod gcs;
pub mod key_storage;
pub mod key_streamer;
pub mod memory;
pub mod registry;

pub use adapter::{
    ChunkStream, Object, ObjectRef, Page, PageStream, StorageAdapter, UploadSink,
    DEFAULT_CHUNK_SIZE,
};
pub use config::{DiskConfig, GcsConfig, StorageConfig};
pub use disk::DiskAdapter;
pub use gcs::GcsAdapter;
pub use key_storage::KeyStorage;
pub use key_streamer::KeyStreamer;
pub use memory::{MemoryAdapter, MemoryStore};
pub use registry::{AdapterKind, AdapterRegistry};

use uniblob_common::Result;

/// Open storage for `uri` through the process-wide registry.
///
/// # Errors
/// - `Error::KeyParse` for malformed URIs
/// - `Error::UnknownAdapter` when the scheme is not registered
pub fn for_uri(uri: &str) -> Result<KeyStorage> {
    KeyStorage::for_uri(AdapterRegistry::global()?, uri)
}
