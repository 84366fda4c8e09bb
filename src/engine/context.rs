//! Per-run transient state.

use rand::rngs::StdRng;
use tokio::time::Instant;

use crate::humanize;
use crate::model::{BlockPath, HumanizationProfile};

/// State owned exclusively by one in-flight run of the scheduler. A new run
/// always builds a fresh context; it is dropped when the run finishes, is
/// aborted, or is replaced.
pub struct ExecutionContext {
    /// Active random generator for this run. Seeded from the macro profile
    /// when pinned, from the OS otherwise.
    pub rng: StdRng,

    /// Path of the block currently being dispatched (for events and logs).
    pub position: BlockPath,

    /// Pending seek destination; dispatch fast-forwards until it is reached.
    pub seek_target: Option<BlockPath>,

    /// Last cursor target the run moved to, used as the start point of
    /// synthesized curved paths.
    pub last_cursor: Option<(i32, i32)>,

    started: Instant,
}

impl ExecutionContext {
    pub fn new(profile: &HumanizationProfile) -> Self {
        Self {
            rng: humanize::rng_for(profile),
            position: BlockPath::root(),
            seek_target: None,
            last_cursor: None,
            started: Instant::now(),
        }
    }

    /// Wall-clock time since the run started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}
