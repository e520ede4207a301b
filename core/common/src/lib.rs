//! Common utilities and types shared across uniblob crates.
//!
//! This crate holds the pieces every layer agrees on: the error taxonomy and
//! the `adapter://bucket/key` addressing scheme.

pub mod error;
pub mod key;

pub use error::{Error, Result};
pub use key::KeyContext;
