//! # shelfstore
//!
//! Single-file key-value store used as the durability tier of persistent
//! caches.
//!
//! ## Design
//! - One append-only `.shelf` log per store, parsed with nom on open
//! - String ids, opaque byte payloads
//! - Iteration in last-write order, stable across reopens
//! - A crash mid-append only loses that append
//! - One live handle per file across processes ([`Error::Busy`] otherwise)

#![warn(missing_docs)]

mod claim;
mod config;
mod error;
pub mod parser;
mod storage;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use storage::{ShelfStore, SHELF_EXTENSION};
