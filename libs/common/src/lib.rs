//! Common library for the UCHK portal
//!
//! This crate provides shared functionality used by the portal services,
//! most importantly the durable client-side key-value storage that backs
//! the session layer, and its error types.

pub mod error;
pub mod storage;

/// Example usage of the storage module
///
/// ```rust,no_run
/// use common::storage::{FileStore, KeyValueStore};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::open("portal-state.json")?;
///     store.set("token", "abc")?;
///     println!("Stored token: {:?}", store.get("token")?);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
