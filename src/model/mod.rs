//! Timeline model: pure, immutable-once-constructed macro data plus its
//! validator and traversal. No side effects live here.

pub mod blocks;
pub mod loader;
pub mod validate;

pub use blocks::{
    AfkAction, AntiAfkConfig, Block, BlockKind, HumanizationProfile, LoopMode, Macro, MouseButton,
    PathMode, Rect, TimeoutPolicy,
};
pub use loader::{generate_schema, load_from_path, load_from_path_async, load_from_str};
pub use validate::{BlockPath, PathSeg, Slot, StructuralError, Walk, validate, validate_resolved, walk};
