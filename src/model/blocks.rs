use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A complete macro: metadata plus the root sequence of blocks.
///
/// This structure is the unit produced by editors/recorders, shared via
/// share codes, and consumed by the execution engine. It is intended to be
/// (de)serialized from a JSON macro file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct Macro {
    /// Display name of the macro.
    #[serde(default)]
    pub name: String,

    /// Free-form description shown in listings.
    #[serde(default)]
    pub description: String,

    /// Macro-wide humanization defaults. Individual blocks may override
    /// these with their own profile.
    #[serde(default)]
    pub humanization: HumanizationProfile,

    /// Anti-AFK (idle injection) configuration.
    #[serde(default)]
    pub anti_afk: AntiAfkConfig,

    /// The root sequence. Execution order is the sequence order; nested
    /// sequences live inside `Loop` and `Branch` blocks.
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// One timeline entry: a stable identifier plus the actual block payload.
///
/// Identifiers must be unique across the whole macro (including nested
/// sequences); the validator enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Block {
    /// Unique identifier within the macro (editors typically use UUIDs).
    pub id: String,

    /// Optional per-block humanization override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humanize: Option<HumanizationProfile>,

    #[serde(flatten)]
    pub kind: BlockKind,
}

impl Block {
    /// Convenience constructor used by tests and programmatic builders.
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            humanize: None,
            kind,
        }
    }
}

/// The closed block vocabulary.
///
/// Use `type` to select a variant, e.g.:
/// `{ "id": "a1", "type": "delay", "ms": 250 }`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    /// Press a key down. With `hold_ms` the key is held for a humanized
    /// duration and released; without it the key stays down until a
    /// matching `KeyRelease`.
    KeyPress {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hold_ms: Option<u64>,
    },

    /// Release a previously pressed key.
    KeyRelease { key: String },

    /// Move the cursor to an absolute screen position, either directly or
    /// along a randomized curve.
    MouseMove {
        x: i32,
        y: i32,
        #[serde(default)]
        path: PathMode,
    },

    /// Click a mouse button at an absolute screen position.
    MouseClick {
        button: MouseButton,
        x: i32,
        y: i32,
    },

    /// Scroll the mouse wheel.
    MouseScroll {
        #[serde(default)]
        delta_x: i32,
        #[serde(default)]
        delta_y: i32,
    },

    /// Type literal text (unicode-aware).
    TypeText { text: String },

    /// Wait for a (humanized) duration.
    Delay { ms: u64 },

    /// Poll the screen until a reference image appears, a timeout elapses,
    /// or the run is cancelled.
    ImageWait {
        /// Name of a reference image resolved by the caller before the run.
        image: String,
        /// Screen region to search; full screen when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Rect>,
        /// Similarity threshold in [0, 1].
        #[serde(default = "default_tolerance")]
        tolerance: f64,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default)]
        on_timeout: TimeoutPolicy,
        /// Move to the match center and left-click once found.
        #[serde(default)]
        click_on_match: bool,
    },

    /// Evaluate an image condition once and descend into `then` or `else`.
    Branch {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Rect>,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
        #[serde(rename = "then")]
        then_blocks: Vec<Block>,
        #[serde(rename = "else")]
        else_blocks: Vec<Block>,
    },

    /// Re-enter a body sequence according to `mode`.
    Loop { body: Vec<Block>, mode: LoopMode },
}

/// Cursor trajectory for `MouseMove`.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    #[default]
    Linear,
    Curved,
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// What to do when an `ImageWait` exhausts its timeout.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Abort the run (default).
    #[default]
    Abort,
    /// Continue with the next sibling block.
    Skip,
    /// Re-poll for up to `attempts` additional timeout cycles, then abort.
    Retry { attempts: u32 },
}

/// Loop termination mode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoopMode {
    /// Run the body exactly `times` times (0 is a legal no-op).
    Count { times: u32 },
    /// Re-evaluate an image condition before each iteration; exit once it
    /// matches.
    Until {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Rect>,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// Run until externally stopped.
    Forever,
}

/// A rectangular region on screen.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Bounded-randomization settings applied to nominal block parameters.
///
/// All fields default to zero, i.e. no perturbation. `seed` pins the
/// generator for reproducible runs; production runs leave it unset.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct HumanizationProfile {
    /// Duration jitter as a ± fraction of the nominal value, in [0, 1].
    #[serde(default)]
    pub delay_jitter: f64,

    /// Radius (pixels) of the disc within which point targets are wobbled.
    #[serde(default)]
    pub wobble_px: f64,

    /// Curvature of synthesized cursor paths, in [0, 1]. Zero still bends
    /// slightly when a curved path is requested.
    #[serde(default)]
    pub curvature: f64,

    /// Fixed RNG seed for reproducible executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Idle-injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AntiAfkConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Nominal interval between idle actions, in seconds.
    #[serde(default = "default_afk_interval_secs")]
    pub interval_secs: u64,

    /// ± fraction of jitter applied to the interval.
    #[serde(default = "default_afk_jitter")]
    pub jitter: f64,

    #[serde(default)]
    pub action: AfkAction,
}

impl Default for AntiAfkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_afk_interval_secs(),
            jitter: default_afk_jitter(),
            action: AfkAction::default(),
        }
    }
}

/// The benign input action fired by the Anti-AFK scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AfkAction {
    /// Move the cursor one pixel and back.
    #[default]
    NudgeMouse,
    /// Tap a (harmless) key.
    TapKey { key: String },
}

fn default_tolerance() -> f64 {
    0.85
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_afk_interval_secs() -> u64 {
    900
}

fn default_afk_jitter() -> f64 {
    0.1
}
