//! Input injection.
//!
//! The engine talks to the OS through the [`InputInjector`] trait; the
//! default implementation wraps Enigo with an optional dry-run mode that
//! logs instead of simulating real input. Injection failures (input denied,
//! target window gone) are fatal to the current run and surfaced verbatim.

use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Axis, Button as EButton, Coordinate, Direction, Enigo, Settings};
use thiserror::Error;
use tracing::{info, trace};

use crate::model::MouseButton;
use crate::utils::keys::resolve_key;

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("unknown key `{0}`")]
    UnknownKey(String),

    #[error("input backend unavailable: {0}")]
    Backend(String),

    #[error("input injection failed: {0}")]
    Inject(String),
}

/// Key transition direction for [`InputInjector::key`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// Singleton external input capability. The execution scheduler and the
/// Anti-AFK scheduler share one injector behind a mutex; only one of them
/// may be mid-injection at a time.
pub trait InputInjector: Send {
    fn key(&mut self, key: &str, direction: KeyDirection) -> Result<(), InjectionError>;
    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), InjectionError>;
    fn mouse_click(&mut self, button: MouseButton, x: i32, y: i32) -> Result<(), InjectionError>;
    fn mouse_scroll(&mut self, delta_x: i32, delta_y: i32) -> Result<(), InjectionError>;
    /// Relative cursor movement, used for benign Anti-AFK nudges.
    fn mouse_nudge(&mut self, dx: i32, dy: i32) -> Result<(), InjectionError>;
    fn type_text(&mut self, text: &str) -> Result<(), InjectionError>;
}

/// Enigo-backed injector with optional dry-run mode. The Enigo handle is
/// created lazily on first real injection.
pub struct EnigoInjector {
    dry_run: bool,
    enigo: Option<Enigo>,
}

impl EnigoInjector {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enigo: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn ensure_enigo(&mut self) -> Result<&mut Enigo, InjectionError> {
        if self.enigo.is_none() {
            trace!(target: "gmacro::injector", "Initializing Enigo");
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| InjectionError::Backend(e.to_string()))?;
            self.enigo = Some(enigo);
        }
        Ok(self.enigo.as_mut().expect("Enigo must be initialized"))
    }
}

impl InputInjector for EnigoInjector {
    fn key(&mut self, key: &str, direction: KeyDirection) -> Result<(), InjectionError> {
        let resolved = resolve_key(key).ok_or_else(|| InjectionError::UnknownKey(key.into()))?;
        if self.dry_run {
            info!(target: "gmacro::injector", %key, ?direction, "DRY-RUN key");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", %key, ?direction, "key");
        let dir = match direction {
            KeyDirection::Down => Direction::Press,
            KeyDirection::Up => Direction::Release,
        };
        enigo
            .key(resolved, dir)
            .map_err(|e| InjectionError::Inject(e.to_string()))
    }

    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), InjectionError> {
        if self.dry_run {
            info!(target: "gmacro::injector", x, y, "DRY-RUN mouse_move");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", x, y, "mouse_move");
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| InjectionError::Inject(e.to_string()))
    }

    fn mouse_click(&mut self, button: MouseButton, x: i32, y: i32) -> Result<(), InjectionError> {
        if self.dry_run {
            info!(target: "gmacro::injector", ?button, x, y, "DRY-RUN mouse_click");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", ?button, x, y, "mouse_click");
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| InjectionError::Inject(e.to_string()))?;
        enigo
            .button(map_mouse_button(button), Direction::Click)
            .map_err(|e| InjectionError::Inject(e.to_string()))
    }

    fn mouse_scroll(&mut self, delta_x: i32, delta_y: i32) -> Result<(), InjectionError> {
        if self.dry_run {
            info!(target: "gmacro::injector", delta_x, delta_y, "DRY-RUN mouse_scroll");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", delta_x, delta_y, "mouse_scroll");
        if delta_x != 0 {
            enigo
                .scroll(delta_x, Axis::Horizontal)
                .map_err(|e| InjectionError::Inject(e.to_string()))?;
        }
        if delta_y != 0 {
            enigo
                .scroll(delta_y, Axis::Vertical)
                .map_err(|e| InjectionError::Inject(e.to_string()))?;
        }
        Ok(())
    }

    fn mouse_nudge(&mut self, dx: i32, dy: i32) -> Result<(), InjectionError> {
        if self.dry_run {
            info!(target: "gmacro::injector", dx, dy, "DRY-RUN mouse_nudge");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", dx, dy, "mouse_nudge");
        enigo
            .move_mouse(dx, dy, Coordinate::Rel)
            .map_err(|e| InjectionError::Inject(e.to_string()))
    }

    fn type_text(&mut self, text: &str) -> Result<(), InjectionError> {
        if self.dry_run {
            info!(target: "gmacro::injector", %text, "DRY-RUN type_text");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "gmacro::injector", %text, "type_text");
        enigo
            .text(text)
            .map_err(|e| InjectionError::Inject(e.to_string()))
    }
}

fn map_mouse_button(btn: MouseButton) -> EButton {
    match btn {
        MouseButton::Left => EButton::Left,
        MouseButton::Middle => EButton::Middle,
        MouseButton::Right => EButton::Right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_never_touches_the_backend() {
        let mut inj = EnigoInjector::new(true);
        inj.key("enter", KeyDirection::Down).unwrap();
        inj.mouse_move(10, 10).unwrap();
        inj.mouse_click(MouseButton::Left, 5, 5).unwrap();
        inj.type_text("hello").unwrap();
        assert!(inj.enigo.is_none());
    }

    #[test]
    fn unknown_key_errors_even_in_dry_run() {
        let mut inj = EnigoInjector::new(true);
        assert!(matches!(
            inj.key("definitely_not_a_key", KeyDirection::Down),
            Err(InjectionError::UnknownKey(_))
        ));
    }
}
