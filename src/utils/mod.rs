//! Utility helpers used across the crate.
//!
//! Submodules:
//! - `keys`: key-name resolution to `enigo::Key`.

pub mod keys;

pub use keys::resolve_key;
