//! Execution engine: the scheduler state machine, the input injector, the
//! per-run context, and the Anti-AFK idle scheduler.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{BlockPath, StructuralError};
use crate::vision::{CaptureError, ScreenCapture, VisionError};

pub mod antiafk;
pub mod context;
pub mod injector;
pub mod scheduler;

pub use antiafk::AntiAfkHandle;
pub use context::ExecutionContext;
pub use injector::{EnigoInjector, InjectionError, InputInjector, KeyDirection};
pub use scheduler::Engine;

/// Default command/matcher poll tick; bounds cancellation latency.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The injector is a singleton external resource shared by both schedulers;
/// the mutex serializes injections across them.
pub type SharedInjector = Arc<Mutex<Box<dyn InputInjector>>>;

/// The capture capability, likewise external and serialized.
pub type SharedCapture = Arc<Mutex<Box<dyn ScreenCapture>>>;

/// Lifecycle of one macro run. `Idle` is initial; `Finished` and `Aborted`
/// are terminal per run (a new run starts over from a fresh context).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
    Aborted,
}

impl RunState {
    /// True while a run owns the engine (RUNNING or PAUSED).
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

/// Events emitted by a run, consumed by the hosting UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    BlockStarted { path: BlockPath },
    BlockCompleted { path: BlockPath },
    ConditionTimeout { path: BlockPath },
    Error { kind: ErrorKind, message: String },
    Finished { elapsed: Duration },
    Aborted,
}

/// Coarse classification carried by [`ExecutionEvent::Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Injection,
    Capture,
    Vision,
    Timeout,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a macro run is already active")]
    Busy,

    #[error("no macro run is active")]
    NotRunning,

    #[error("macro failed structural validation ({} finding(s))", errors.len())]
    Invalid { errors: Vec<StructuralError> },

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("image wait timed out at {path}")]
    ConditionTimeout { path: BlockPath },

    #[error("block references image `{0}` that is not resolved")]
    MissingImage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Injection(_) => ErrorKind::Injection,
            EngineError::Capture(_) => ErrorKind::Capture,
            EngineError::Vision(_) => ErrorKind::Vision,
            EngineError::ConditionTimeout { .. } => ErrorKind::Timeout,
            EngineError::Busy
            | EngineError::NotRunning
            | EngineError::Invalid { .. }
            | EngineError::MissingImage(_) => ErrorKind::Internal,
        }
    }
}
