//! Google Cloud Storage adapter for uniblob.
//!
//! Speaks the GCS JSON API over HTTP, so it also works against emulators:
//! - Media uploads for whole objects, resumable sessions for streamed ones
//! - Listing driven by `nextPageToken`, re-cut to the caller's page size
//! - Streamed downloads as repeated ranged GETs

pub mod adapter;
pub mod client;

pub use adapter::GcsAdapter;
pub use client::{GcsClient, GcsObject, ObjectList};
