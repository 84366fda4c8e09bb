#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Gmacro — a block-timeline macro execution engine with humanized input,
//! screen-template conditions, and shareable macro codes.
//!
//! The crate is organized into cohesive modules; most implementation detail
//! lives under them:
//! - `model`: Block timeline data model, structural validation, and loader.
//! - `humanize`: Jitter, wobble, and curved-path synthesis.
//! - `vision`: Screen-template matching and the capture seam.
//! - `engine`: Execution scheduler, input injector, and Anti-AFK scheduler.
//! - `share`: GMAC share-code encoding and decoding.
//! - `utils`: Key-name resolution and other helpers.
//!
//! Use `gmacro::prelude::*` to bring commonly used items into scope quickly.

/// Public module: execution engine (scheduler, injector, anti-AFK).
pub mod engine;
/// Public module: humanization of timing and cursor motion.
pub mod humanize;
/// Public module: block timeline model (blocks, validation, loader).
pub mod model;
/// Public module: share-code codec.
pub mod share;
/// Public module: utilities (key resolution).
pub mod utils;
/// Public module: screen-template vision matching.
pub mod vision;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Initialize tracing (logging) with a reasonable default.
/// - Honors the `RUST_LOG` environment variable if set.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    use tracing::Level;
    use tracing_subscriber::fmt;

    // Parse RUST_LOG as a simple level (trace|debug|info|warn|error)
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| match s.to_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        })
        .unwrap_or(Level::INFO);

    // Ignore the error if the global subscriber was already set.
    let _ = fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use gmacro::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Timing helpers
    pub use std::time::Duration;
    pub use tokio::time::sleep;

    // External crates (namespaced) if callers want direct access
    pub use crate as gmacro;
    pub use enigo;
    pub use rand;

    // Frequently used internal modules
    pub use crate::{engine, humanize, model, share, utils, vision};

    // Core types most hosts need
    pub use crate::engine::{AntiAfkHandle, Engine, EnigoInjector, ExecutionEvent, RunState};
    pub use crate::model::{Block, BlockKind, Macro};
    pub use crate::vision::ImageStore;
}
