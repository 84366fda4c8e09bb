//! Anti-AFK idle scheduler.
//!
//! Runs as an independent background task on a jittered interval and
//! performs a benign input action (a 1px mouse nudge out and back, or a key
//! tap) whenever the host has been left idle. It always yields to an active
//! macro run: while the engine is RUNNING or PAUSED the tick is skipped,
//! since injecting concurrently with a run would corrupt its input stream.
//!
//! Injection failures here are logged and swallowed. A missed keep-alive
//! tick is recoverable; the next tick simply tries again.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::humanize;
use crate::model::{AfkAction, AntiAfkConfig, HumanizationProfile};

use super::injector::KeyDirection;
use super::{RunState, SharedInjector};

/// How long a nudge holds its displaced position before moving back.
const NUDGE_DWELL: Duration = Duration::from_millis(50);

/// How long a keep-alive key tap is held down.
const TAP_HOLD: Duration = Duration::from_millis(30);

/// Handle to a spawned Anti-AFK task. Dropping the handle does not stop the
/// task; call [`AntiAfkHandle::shutdown`] for a clean stop.
pub struct AntiAfkHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl AntiAfkHandle {
    /// Spawn the keep-alive loop. `engine_state` is the engine's run-state
    /// watch; ticks that land during an active run are skipped.
    pub fn spawn(
        config: AntiAfkConfig,
        injector: SharedInjector,
        engine_state: watch::Receiver<RunState>,
    ) -> Self {
        let token = CancellationToken::new();
        let worker = Worker {
            config,
            injector,
            engine_state,
            token: token.clone(),
            rng: StdRng::from_os_rng(),
        };
        let task = tokio::spawn(worker.run());
        Self { token, task }
    }

    /// Cancel the loop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

struct Worker {
    config: AntiAfkConfig,
    injector: SharedInjector,
    engine_state: watch::Receiver<RunState>,
    token: CancellationToken,
    rng: StdRng,
}

impl Worker {
    async fn run(mut self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        let pacing = HumanizationProfile {
            delay_jitter: self.config.jitter,
            ..HumanizationProfile::default()
        };
        info!(
            target: "gmacro::antiafk",
            interval_secs = self.config.interval_secs,
            action = ?self.config.action,
            "Anti-AFK scheduler started"
        );

        loop {
            let wait = humanize::jitter_duration(interval, &pacing, &mut self.rng);
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(wait) => {}
            }

            if self.engine_state.borrow().is_active() {
                debug!(target: "gmacro::antiafk", "Macro run active, skipping keep-alive tick");
                continue;
            }
            if let Err(err) = self.perform_action().await {
                warn!(target: "gmacro::antiafk", error = %err, "Keep-alive action failed");
            }
        }

        info!(target: "gmacro::antiafk", "Anti-AFK scheduler stopped");
    }

    async fn perform_action(&self) -> Result<(), super::InjectionError> {
        match &self.config.action {
            AfkAction::NudgeMouse => {
                debug!(target: "gmacro::antiafk", "Keep-alive mouse nudge");
                let mut injector = self.injector.lock().await;
                injector.mouse_nudge(1, 0)?;
                sleep(NUDGE_DWELL).await;
                injector.mouse_nudge(-1, 0)?;
            }
            AfkAction::TapKey { key } => {
                debug!(target: "gmacro::antiafk", %key, "Keep-alive key tap");
                let mut injector = self.injector.lock().await;
                injector.key(key, KeyDirection::Down)?;
                sleep(TAP_HOLD).await;
                injector.key(key, KeyDirection::Up)?;
            }
        }
        Ok(())
    }
}
