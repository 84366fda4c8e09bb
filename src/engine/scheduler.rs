//! Execution scheduler: a single sequential control loop that walks the
//! block tree, humanizes nominal parameters, dispatches injections, and
//! honors pause/stop/seek commands.
//!
//! Cancellation contract: commands are checked at every block boundary and
//! at poll-tick granularity inside delays and image waits, so cancellation
//! latency is bounded by one poll interval, never by the remaining timeline.
//! Pause takes effect at those same safe points, never mid-injection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::humanize;
use crate::model::{
    Block, BlockKind, BlockPath, HumanizationProfile, LoopMode, Macro, MouseButton, PathMode, Rect,
    Slot, TimeoutPolicy, validate_resolved,
};
use crate::vision::{ImageStore, ScreenCapture, find_match};

use super::context::ExecutionContext;
use super::injector::InputInjector;
use super::{
    DEFAULT_POLL_INTERVAL, EngineError, ExecutionEvent, RunState, SharedCapture, SharedInjector,
};

/// Pacing between synthesized cursor waypoints.
const WAYPOINT_PACING: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub(crate) enum Command {
    Pause,
    Resume,
    Stop,
    Seek(BlockPath),
}

/// Owner of at most one in-flight run. Construct once per host, then drive
/// it through `start`/`pause`/`resume`/`stop`/`seek`.
pub struct Engine {
    injector: SharedInjector,
    capture: SharedCapture,
    poll_interval: Duration,
    state_tx: watch::Sender<RunState>,
    control: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(injector: Box<dyn InputInjector>, capture: Box<dyn ScreenCapture>) -> Self {
        Self::with_poll_interval(injector, capture, DEFAULT_POLL_INTERVAL)
    }

    /// Override the poll tick (also the worst-case cancellation latency).
    pub fn with_poll_interval(
        injector: Box<dyn InputInjector>,
        capture: Box<dyn ScreenCapture>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            injector: Arc::new(tokio::sync::Mutex::new(injector)),
            capture: Arc::new(tokio::sync::Mutex::new(capture)),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            state_tx: watch::Sender::new(RunState::Idle),
            control: None,
            task: None,
        }
    }

    /// Shared handle to the injector, for wiring up the Anti-AFK scheduler.
    pub fn injector(&self) -> SharedInjector {
        self.injector.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Observe run-state transitions (the Anti-AFK scheduler uses this to
    /// yield to an active run).
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Validate and launch a run. Fails fast with `Busy` while a run is
    /// active and with `Invalid` when the macro is structurally broken —
    /// in both cases the engine never enters RUNNING.
    pub fn start(
        &mut self,
        mac: Macro,
        images: ImageStore,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> Result<(), EngineError> {
        if self.state().is_active() {
            return Err(EngineError::Busy);
        }
        let errors = validate_resolved(&mac, &images.names());
        if !errors.is_empty() {
            return Err(EngineError::Invalid { errors });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.control = Some(tx);
        self.state_tx.send_replace(RunState::Running);

        let ctx = ExecutionContext::new(&mac.humanization);
        let scheduler = Scheduler {
            mac: Arc::new(mac),
            images: Arc::new(images),
            injector: self.injector.clone(),
            capture: self.capture.clone(),
            control: rx,
            events,
            state: self.state_tx.clone(),
            poll: self.poll_interval,
            ctx,
        };
        self.task = Some(tokio::spawn(scheduler.run()));
        Ok(())
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    /// Reposition the run: dispatch fast-forwards (no injections) until the
    /// addressed block is reached, then continues normally.
    pub fn seek(&self, path: BlockPath) -> Result<(), EngineError> {
        self.send(Command::Seek(path))
    }

    /// Wait for the current run task to finish (after `stop` or natural
    /// completion).
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, cmd: Command) -> Result<(), EngineError> {
        if !self.state().is_active() {
            return Err(EngineError::NotRunning);
        }
        let tx = self.control.as_ref().ok_or(EngineError::NotRunning)?;
        tx.send(cmd).map_err(|_| EngineError::NotRunning)
    }
}

/// Whether execution proceeds or the run was externally stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Outcome of one bounded poll cycle of an image wait.
enum PollOutcome {
    Matched(ConditionHit),
    TimedOut,
    Stopped,
}

/// A screen-space condition hit: center of the matched template.
#[derive(Debug, Copy, Clone)]
struct ConditionHit {
    x: i32,
    y: i32,
    score: f64,
}

struct Scheduler {
    mac: Arc<Macro>,
    images: Arc<ImageStore>,
    injector: SharedInjector,
    capture: SharedCapture,
    control: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<ExecutionEvent>,
    state: watch::Sender<RunState>,
    poll: Duration,
    ctx: ExecutionContext,
}

impl Scheduler {
    async fn run(mut self) {
        info!(
            target: "gmacro::engine",
            macro_name = %self.mac.name,
            blocks = self.mac.blocks.len(),
            "Run started"
        );

        let mac = self.mac.clone();
        let result = self
            .run_sequence(&mac.blocks, BlockPath::root(), Slot::Body)
            .await;

        match result {
            Ok(Flow::Continue) => {
                let elapsed = self.ctx.elapsed();
                info!(target: "gmacro::engine", ?elapsed, "Run finished");
                self.emit(ExecutionEvent::Finished { elapsed }).await;
                self.state.send_replace(RunState::Finished);
            }
            Ok(Flow::Stop) => {
                info!(target: "gmacro::engine", "Run aborted by stop command");
                self.emit(ExecutionEvent::Aborted).await;
                self.state.send_replace(RunState::Aborted);
            }
            Err(err) => {
                error!(target: "gmacro::engine", error = %err, "Run aborted by error");
                self.emit(ExecutionEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                })
                .await;
                self.emit(ExecutionEvent::Aborted).await;
                self.state.send_replace(RunState::Aborted);
            }
        }
    }

    /// Execute one sequence. Boxed for recursion through nested bodies.
    fn run_sequence<'a>(
        &'a mut self,
        seq: &'a [Block],
        base: BlockPath,
        slot: Slot,
    ) -> Pin<Box<dyn Future<Output = Result<Flow, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            for (index, block) in seq.iter().enumerate() {
                if self.checkpoint().await == Flow::Stop {
                    return Ok(Flow::Stop);
                }
                let path = base.child(slot, index);
                if self.run_block(block, &path).await? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        })
    }

    async fn run_block(&mut self, block: &Block, path: &BlockPath) -> Result<Flow, EngineError> {
        // Fast-forward toward a pending seek target.
        if let Some(target) = self.ctx.seek_target.clone() {
            if target == *path {
                debug!(target: "gmacro::engine", %path, "Seek target reached");
                self.ctx.seek_target = None;
            } else if target.starts_with(path) {
                match &block.kind {
                    // Descend directly into the named branch; the condition
                    // is not evaluated while scrubbing.
                    BlockKind::Branch {
                        then_blocks,
                        else_blocks,
                        ..
                    } => {
                        let slot = target.segment(path.len()).map(|s| s.slot);
                        return match slot {
                            Some(Slot::Then) => {
                                self.run_sequence(then_blocks, path.clone(), Slot::Then).await
                            }
                            Some(Slot::Else) => {
                                self.run_sequence(else_blocks, path.clone(), Slot::Else).await
                            }
                            _ => Ok(Flow::Continue),
                        };
                    }
                    // Enter the loop normally; its body blocks fast-forward
                    // individually until the target is reached.
                    BlockKind::Loop { .. } => {}
                    _ => return Ok(Flow::Continue),
                }
            } else {
                trace!(target: "gmacro::engine", %path, "Seek: skipping block");
                return Ok(Flow::Continue);
            }
        }

        self.ctx.position = path.clone();
        let profile = block
            .humanize
            .clone()
            .unwrap_or_else(|| self.mac.humanization.clone());

        self.emit(ExecutionEvent::BlockStarted { path: path.clone() })
            .await;
        trace!(target: "gmacro::engine", %path, id = %block.id, "Dispatching block");

        let flow = self.dispatch(block, path, &profile).await?;
        if flow == Flow::Stop {
            return Ok(Flow::Stop);
        }

        self.emit(ExecutionEvent::BlockCompleted { path: path.clone() })
            .await;
        Ok(Flow::Continue)
    }

    async fn dispatch(
        &mut self,
        block: &Block,
        path: &BlockPath,
        profile: &HumanizationProfile,
    ) -> Result<Flow, EngineError> {
        match &block.kind {
            BlockKind::Delay { ms } => {
                let d = humanize::jitter_duration(Duration::from_millis(*ms), profile, &mut self.ctx.rng);
                Ok(self.interruptible_sleep(d).await)
            }

            BlockKind::KeyPress { key, hold_ms } => {
                // Press + hold + release is one atomic action.
                let injector = self.injector.clone();
                let mut inj = injector.lock().await;
                inj.key(key, super::KeyDirection::Down)?;
                if let Some(ms) = hold_ms {
                    let hold = humanize::jitter_duration(
                        Duration::from_millis(*ms),
                        profile,
                        &mut self.ctx.rng,
                    );
                    sleep(hold).await;
                    inj.key(key, super::KeyDirection::Up)?;
                }
                Ok(Flow::Continue)
            }

            BlockKind::KeyRelease { key } => {
                let injector = self.injector.clone();
                let mut inj = injector.lock().await;
                inj.key(key, super::KeyDirection::Up)?;
                Ok(Flow::Continue)
            }

            BlockKind::MouseMove { x, y, path: mode } => {
                let target = humanize::wobble_point((*x, *y), profile, &mut self.ctx.rng, None);
                self.move_cursor(target, *mode, profile).await?;
                Ok(Flow::Continue)
            }

            BlockKind::MouseClick { button, x, y } => {
                let target = humanize::wobble_point((*x, *y), profile, &mut self.ctx.rng, None);
                let injector = self.injector.clone();
                let mut inj = injector.lock().await;
                inj.mouse_click(*button, target.0, target.1)?;
                drop(inj);
                self.ctx.last_cursor = Some(target);
                Ok(Flow::Continue)
            }

            BlockKind::MouseScroll { delta_x, delta_y } => {
                let injector = self.injector.clone();
                let mut inj = injector.lock().await;
                inj.mouse_scroll(*delta_x, *delta_y)?;
                Ok(Flow::Continue)
            }

            BlockKind::TypeText { text } => {
                let injector = self.injector.clone();
                let mut inj = injector.lock().await;
                inj.type_text(text)?;
                Ok(Flow::Continue)
            }

            BlockKind::ImageWait {
                image,
                region,
                tolerance,
                timeout_ms,
                on_timeout,
                click_on_match,
            } => {
                self.image_wait(
                    path,
                    image,
                    *region,
                    *tolerance,
                    Duration::from_millis(*timeout_ms),
                    *on_timeout,
                    *click_on_match,
                    profile,
                )
                .await
            }

            BlockKind::Branch {
                image,
                region,
                tolerance,
                then_blocks,
                else_blocks,
            } => {
                // Evaluated exactly once; no polling.
                let hit = self.evaluate_condition(image, *region, *tolerance).await?;
                debug!(
                    target: "gmacro::engine",
                    %path, matched = hit.is_some(),
                    "Branch condition evaluated"
                );
                if hit.is_some() {
                    self.run_sequence(then_blocks, path.clone(), Slot::Then).await
                } else {
                    self.run_sequence(else_blocks, path.clone(), Slot::Else).await
                }
            }

            BlockKind::Loop { body, mode } => match mode {
                LoopMode::Count { times } => {
                    for iteration in 0..*times {
                        trace!(target: "gmacro::engine", %path, iteration, "Loop iteration");
                        if self.run_sequence(body, path.clone(), Slot::Body).await? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                }
                LoopMode::Forever => loop {
                    if self.checkpoint().await == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                    if self.run_sequence(body, path.clone(), Slot::Body).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                },
                LoopMode::Until {
                    image,
                    region,
                    tolerance,
                } => loop {
                    if self.checkpoint().await == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                    let hit = self.evaluate_condition(image, *region, *tolerance).await?;
                    if hit.is_some() {
                        debug!(target: "gmacro::engine", %path, "Until condition met");
                        return Ok(Flow::Continue);
                    }
                    if self.run_sequence(body, path.clone(), Slot::Body).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                },
            },
        }
    }

    /// Move the cursor to `target`, either directly or along a synthesized
    /// curve. The injector stays locked for the whole gesture so the two
    /// schedulers never interleave mid-path.
    async fn move_cursor(
        &mut self,
        target: (i32, i32),
        mode: PathMode,
        profile: &HumanizationProfile,
    ) -> Result<(), EngineError> {
        let start = self.ctx.last_cursor;
        let waypoints = match (mode, start) {
            (PathMode::Curved, Some(from)) if from != target => {
                humanize::curved_path(from, target, profile, &mut self.ctx.rng)
            }
            _ => vec![target],
        };

        let injector = self.injector.clone();
        let mut inj = injector.lock().await;
        let count = waypoints.len();
        for (i, (wx, wy)) in waypoints.into_iter().enumerate() {
            inj.mouse_move(wx, wy)?;
            if i + 1 < count {
                sleep(WAYPOINT_PACING).await;
            }
        }
        drop(inj);
        self.ctx.last_cursor = Some(target);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn image_wait(
        &mut self,
        path: &BlockPath,
        image: &str,
        region: Option<Rect>,
        tolerance: f64,
        timeout: Duration,
        on_timeout: TimeoutPolicy,
        click_on_match: bool,
        profile: &HumanizationProfile,
    ) -> Result<Flow, EngineError> {
        let mut attempts_left = match on_timeout {
            TimeoutPolicy::Retry { attempts } => attempts.saturating_add(1),
            _ => 1,
        };

        loop {
            match self.poll_for_match(image, region, tolerance, timeout).await? {
                PollOutcome::Stopped => return Ok(Flow::Stop),
                PollOutcome::Matched(hit) => {
                    debug!(
                        target: "gmacro::engine",
                        %path, x = hit.x, y = hit.y, score = hit.score,
                        "Image wait matched"
                    );
                    if click_on_match {
                        let target = humanize::wobble_point(
                            (hit.x, hit.y),
                            profile,
                            &mut self.ctx.rng,
                            None,
                        );
                        self.move_cursor(target, PathMode::Curved, profile).await?;
                        let injector = self.injector.clone();
                        let mut inj = injector.lock().await;
                        inj.mouse_click(MouseButton::Left, target.0, target.1)?;
                    }
                    return Ok(Flow::Continue);
                }
                PollOutcome::TimedOut => {
                    attempts_left -= 1;
                    if attempts_left > 0 {
                        info!(
                            target: "gmacro::engine",
                            %path, attempts_left,
                            "Image wait timed out; retrying"
                        );
                        continue;
                    }
                    self.emit(ExecutionEvent::ConditionTimeout { path: path.clone() })
                        .await;
                    match on_timeout {
                        TimeoutPolicy::Skip => {
                            warn!(
                                target: "gmacro::engine",
                                %path,
                                "Image wait timed out; skipping to next block"
                            );
                            return Ok(Flow::Continue);
                        }
                        TimeoutPolicy::Abort | TimeoutPolicy::Retry { .. } => {
                            return Err(EngineError::ConditionTimeout { path: path.clone() });
                        }
                    }
                }
            }
        }
    }

    /// One bounded poll cycle: capture + match every poll tick until a hit,
    /// the timeout budget is spent, or a stop command arrives. Time spent
    /// paused does not count against the budget.
    async fn poll_for_match(
        &mut self,
        image: &str,
        region: Option<Rect>,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<PollOutcome, EngineError> {
        let mut remaining = timeout;
        loop {
            if let Some(hit) = self.evaluate_condition(image, region, tolerance).await? {
                return Ok(PollOutcome::Matched(hit));
            }
            if remaining.is_zero() {
                return Ok(PollOutcome::TimedOut);
            }
            let tick = remaining.min(self.poll);
            sleep(tick).await;
            remaining -= tick;
            if self.checkpoint().await == Flow::Stop {
                return Ok(PollOutcome::Stopped);
            }
        }
    }

    /// Single capture + template match. Capture and decode failures are
    /// fatal for the run; a below-threshold best score is simply `None`.
    async fn evaluate_condition(
        &mut self,
        image: &str,
        region: Option<Rect>,
        tolerance: f64,
    ) -> Result<Option<ConditionHit>, EngineError> {
        let images = self.images.clone();
        let template = images
            .get(image)
            .ok_or_else(|| EngineError::MissingImage(image.to_string()))?;

        let frame = {
            let capture = self.capture.clone();
            let mut cap = capture.lock().await;
            cap.capture(region)?
        };

        let hit = find_match(&frame, template, tolerance)?.map(|m| {
            let (ox, oy) = region.map(|r| (r.x, r.y)).unwrap_or((0, 0));
            ConditionHit {
                x: ox + m.x as i32 + template.width() as i32 / 2,
                y: oy + m.y as i32 + template.height() as i32 / 2,
                score: m.score,
            }
        });
        Ok(hit)
    }

    /// Sleep in poll-tick chunks so pause/stop land within one tick. Pause
    /// freezes the remaining time.
    async fn interruptible_sleep(&mut self, duration: Duration) -> Flow {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let step = remaining.min(self.poll);
            sleep(step).await;
            remaining -= step;
            if self.checkpoint().await == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Drain pending commands. The sole suspension point besides the poll
    /// loops: pause parks here until resume/stop.
    async fn checkpoint(&mut self) -> Flow {
        loop {
            match self.control.try_recv() {
                Ok(Command::Stop) => return Flow::Stop,
                Ok(Command::Pause) => {
                    if self.paused_wait().await == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Ok(Command::Resume) => {} // already running
                Ok(Command::Seek(path)) => {
                    debug!(target: "gmacro::engine", target_path = %path, "Seek requested");
                    self.ctx.seek_target = Some(path);
                }
                Err(mpsc::error::TryRecvError::Empty) => return Flow::Continue,
                // Engine handle dropped: nobody can stop us anymore, abort.
                Err(mpsc::error::TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    async fn paused_wait(&mut self) -> Flow {
        info!(target: "gmacro::engine", position = %self.ctx.position, "Run paused");
        self.state.send_replace(RunState::Paused);
        loop {
            match self.control.recv().await {
                Some(Command::Resume) => {
                    info!(target: "gmacro::engine", "Run resumed");
                    self.state.send_replace(RunState::Running);
                    return Flow::Continue;
                }
                Some(Command::Stop) | None => return Flow::Stop,
                Some(Command::Pause) => {} // already paused
                Some(Command::Seek(path)) => {
                    debug!(target: "gmacro::engine", target_path = %path, "Seek requested while paused");
                    self.ctx.seek_target = Some(path);
                }
            }
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if self.events.send(event).await.is_err() {
            trace!(target: "gmacro::engine", "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ErrorKind, KeyDirection};
    use crate::engine::injector::InjectionError;
    use crate::model::{Block, TimeoutPolicy};
    use crate::vision::{FrameCapture, ImageStore, NullCapture};
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Key(String, KeyDirection),
        Click(MouseButton, i32, i32),
        Text(String),
    }

    #[derive(Clone, Default)]
    struct RecordingInjector {
        calls: Arc<StdMutex<Vec<Call>>>,
    }

    impl RecordingInjector {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Text(t) => Some(t),
                    _ => None,
                })
                .collect()
        }
    }

    impl InputInjector for RecordingInjector {
        fn key(&mut self, key: &str, direction: KeyDirection) -> Result<(), InjectionError> {
            self.calls.lock().unwrap().push(Call::Key(key.into(), direction));
            Ok(())
        }

        fn mouse_move(&mut self, _x: i32, _y: i32) -> Result<(), InjectionError> {
            Ok(())
        }

        fn mouse_click(&mut self, button: MouseButton, x: i32, y: i32) -> Result<(), InjectionError> {
            self.calls.lock().unwrap().push(Call::Click(button, x, y));
            Ok(())
        }

        fn mouse_scroll(&mut self, _dx: i32, _dy: i32) -> Result<(), InjectionError> {
            Ok(())
        }

        fn mouse_nudge(&mut self, _dx: i32, _dy: i32) -> Result<(), InjectionError> {
            Ok(())
        }

        fn type_text(&mut self, text: &str) -> Result<(), InjectionError> {
            self.calls.lock().unwrap().push(Call::Text(text.into()));
            Ok(())
        }
    }

    struct FailingInjector;

    impl InputInjector for FailingInjector {
        fn key(&mut self, _: &str, _: KeyDirection) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
        fn mouse_move(&mut self, _: i32, _: i32) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
        fn mouse_click(&mut self, _: MouseButton, _: i32, _: i32) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
        fn mouse_scroll(&mut self, _: i32, _: i32) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
        fn mouse_nudge(&mut self, _: i32, _: i32) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
        fn type_text(&mut self, _: &str) -> Result<(), InjectionError> {
            Err(InjectionError::Inject("input denied".into()))
        }
    }

    fn macro_of(blocks: Vec<Block>) -> Macro {
        Macro {
            name: "test".into(),
            blocks,
            ..Macro::default()
        }
    }

    fn text_block(id: &str, text: &str) -> Block {
        Block::new(id, BlockKind::TypeText { text: text.into() })
    }

    /// A dark frame with a white 6x6 patch at (20, 12); template matches it.
    fn patch_frame() -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(64, 48, Rgba([10, 10, 10, 255]));
        for y in 12..18 {
            for x in 20..26 {
                frame.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        frame
    }

    fn dark_frame() -> RgbaImage {
        RgbaImage::from_pixel(64, 48, Rgba([10, 10, 10, 255]))
    }

    fn white_template_store() -> ImageStore {
        let mut store = ImageStore::new();
        store.insert(
            "mark",
            RgbaImage::from_pixel(6, 6, Rgba([255, 255, 255, 255])),
        );
        store
    }

    fn engine_with(
        injector: impl InputInjector + 'static,
        capture: impl crate::vision::ScreenCapture + 'static,
    ) -> Engine {
        Engine::with_poll_interval(
            Box::new(injector),
            Box::new(capture),
            Duration::from_millis(5),
        )
    }

    async fn run_to_end(engine: &mut Engine, mac: Macro, images: ImageStore) -> Vec<ExecutionEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        engine.start(mac, images, tx).unwrap();
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        engine.join().await;
        events
    }

    #[tokio::test]
    async fn count_loop_runs_body_exactly_n_times() {
        for times in [0u32, 1, 5] {
            let injector = RecordingInjector::default();
            let mut engine = engine_with(injector.clone(), NullCapture);
            let mac = macro_of(vec![Block::new(
                "loop",
                BlockKind::Loop {
                    body: vec![text_block("body", "x")],
                    mode: LoopMode::Count { times },
                },
            )]);
            let events = run_to_end(&mut engine, mac, ImageStore::new()).await;
            assert_eq!(injector.texts().len() as u32, times, "times = {times}");
            assert!(matches!(events.last(), Some(ExecutionEvent::Finished { .. })));
            assert_eq!(engine.state(), RunState::Finished);
        }
    }

    #[tokio::test]
    async fn stop_during_image_wait_aborts_within_poll_latency() {
        let mut engine = engine_with(RecordingInjector::default(), FrameCapture::new(dark_frame()));
        let mac = macro_of(vec![Block::new(
            "wait",
            BlockKind::ImageWait {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                timeout_ms: 10_000,
                on_timeout: TimeoutPolicy::Abort,
                click_on_match: false,
            },
        )]);
        let (tx, mut rx) = mpsc::channel(64);
        engine.start(mac, white_template_store(), tx).unwrap();
        sleep(Duration::from_millis(30)).await;

        let stopped_at = Instant::now();
        engine.stop().unwrap();
        loop {
            match rx.recv().await {
                Some(ExecutionEvent::Aborted) => break,
                Some(_) => {}
                None => panic!("run ended without an abort event"),
            }
        }
        assert!(
            stopped_at.elapsed() <= Duration::from_millis(150),
            "abort latency {:?}",
            stopped_at.elapsed()
        );
        engine.join().await;
        assert_eq!(engine.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn branch_takes_then_on_match() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), FrameCapture::new(patch_frame()));
        let mac = macro_of(vec![Block::new(
            "branch",
            BlockKind::Branch {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                then_blocks: vec![text_block("t", "then")],
                else_blocks: vec![text_block("e", "else")],
            },
        )]);
        run_to_end(&mut engine, mac, white_template_store()).await;
        assert_eq!(injector.texts(), vec!["then"]);
    }

    #[tokio::test]
    async fn branch_takes_else_below_tolerance() {
        // Only half the patch is present: similarity ~0.5 against 0.9.
        let mut frame = dark_frame();
        for y in 12..18 {
            for x in 20..23 {
                frame.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), FrameCapture::new(frame));
        let mac = macro_of(vec![Block::new(
            "branch",
            BlockKind::Branch {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                then_blocks: vec![text_block("t", "then")],
                else_blocks: vec![text_block("e", "else")],
            },
        )]);
        run_to_end(&mut engine, mac, white_template_store()).await;
        assert_eq!(injector.texts(), vec!["else"]);
    }

    #[tokio::test]
    async fn second_start_fails_with_busy() {
        let mut engine = engine_with(RecordingInjector::default(), NullCapture);
        let (tx, _rx) = mpsc::channel(16);
        engine
            .start(
                macro_of(vec![Block::new("d", BlockKind::Delay { ms: 500 })]),
                ImageStore::new(),
                tx,
            )
            .unwrap();

        let (tx2, _rx2) = mpsc::channel(16);
        let err = engine
            .start(
                macro_of(vec![text_block("t", "x")]),
                ImageStore::new(),
                tx2,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy));

        engine.stop().unwrap();
        engine.join().await;
    }

    #[tokio::test]
    async fn invalid_macro_never_starts() {
        let mut engine = engine_with(RecordingInjector::default(), NullCapture);
        let (tx, _rx) = mpsc::channel(16);
        let err = engine
            .start(macro_of(vec![]), ImageStore::new(), tx)
            .unwrap_err();
        assert!(matches!(err, EngineError::Invalid { .. }));
        assert_eq!(engine.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn skip_policy_continues_after_timeout() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), FrameCapture::new(dark_frame()));
        let mac = macro_of(vec![
            Block::new(
                "wait",
                BlockKind::ImageWait {
                    image: "mark".into(),
                    region: None,
                    tolerance: 0.9,
                    timeout_ms: 20,
                    on_timeout: TimeoutPolicy::Skip,
                    click_on_match: false,
                },
            ),
            text_block("after", "after"),
        ]);
        let events = run_to_end(&mut engine, mac, white_template_store()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::ConditionTimeout { .. })));
        assert!(matches!(events.last(), Some(ExecutionEvent::Finished { .. })));
        assert_eq!(injector.texts(), vec!["after"]);
    }

    #[tokio::test]
    async fn abort_policy_surfaces_timeout_error() {
        let mut engine = engine_with(RecordingInjector::default(), FrameCapture::new(dark_frame()));
        let mac = macro_of(vec![Block::new(
            "wait",
            BlockKind::ImageWait {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                timeout_ms: 20,
                on_timeout: TimeoutPolicy::Abort,
                click_on_match: false,
            },
        )]);
        let events = run_to_end(&mut engine, mac, white_template_store()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::ConditionTimeout { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::Error { kind: ErrorKind::Timeout, .. })));
        assert_eq!(events.last(), Some(&ExecutionEvent::Aborted));
        assert_eq!(engine.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn retry_policy_escalates_to_abort() {
        let mut engine = engine_with(RecordingInjector::default(), FrameCapture::new(dark_frame()));
        let mac = macro_of(vec![Block::new(
            "wait",
            BlockKind::ImageWait {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                timeout_ms: 15,
                on_timeout: TimeoutPolicy::Retry { attempts: 1 },
                click_on_match: false,
            },
        )]);
        let events = run_to_end(&mut engine, mac, white_template_store()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::Error { kind: ErrorKind::Timeout, .. })));
        assert_eq!(engine.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), NullCapture);
        let mac = macro_of(vec![
            Block::new("d", BlockKind::Delay { ms: 100 }),
            text_block("done", "done"),
        ]);
        let (tx, mut rx) = mpsc::channel(64);
        engine.start(mac, ImageStore::new(), tx).unwrap();

        sleep(Duration::from_millis(20)).await;
        engine.pause().unwrap();
        let mut states = engine.subscribe();
        while *states.borrow() != RunState::Paused {
            states.changed().await.unwrap();
        }
        assert!(injector.texts().is_empty());

        engine.resume().unwrap();
        let mut finished = false;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, ExecutionEvent::Finished { .. }) {
                finished = true;
            }
        }
        assert!(finished);
        assert_eq!(injector.texts(), vec!["done"]);
        engine.join().await;
    }

    #[tokio::test]
    async fn injector_failure_is_fatal() {
        let mut engine = engine_with(FailingInjector, NullCapture);
        let mac = macro_of(vec![text_block("t", "x")]);
        let events = run_to_end(&mut engine, mac, ImageStore::new()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::Error { kind: ErrorKind::Injection, .. })));
        assert_eq!(events.last(), Some(&ExecutionEvent::Aborted));
    }

    #[tokio::test]
    async fn until_loop_exits_once_condition_matches() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), FrameCapture::new(patch_frame()));
        let mac = macro_of(vec![Block::new(
            "loop",
            BlockKind::Loop {
                body: vec![text_block("body", "x")],
                mode: LoopMode::Until {
                    image: "mark".into(),
                    region: None,
                    tolerance: 0.9,
                },
            },
        )]);
        let events = run_to_end(&mut engine, mac, white_template_store()).await;
        // Condition holds on the first evaluation: the body never runs.
        assert!(injector.texts().is_empty());
        assert!(matches!(events.last(), Some(ExecutionEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn forever_loop_runs_until_stopped() {
        let mut engine = engine_with(RecordingInjector::default(), NullCapture);
        let mac = macro_of(vec![Block::new(
            "loop",
            BlockKind::Loop {
                body: vec![Block::new("d", BlockKind::Delay { ms: 10 })],
                mode: LoopMode::Forever,
            },
        )]);
        let (tx, mut rx) = mpsc::channel(1024);
        engine.start(mac, ImageStore::new(), tx).unwrap();
        sleep(Duration::from_millis(40)).await;
        engine.stop().unwrap();
        let mut aborted = false;
        while let Some(ev) = rx.recv().await {
            if ev == ExecutionEvent::Aborted {
                aborted = true;
            }
        }
        assert!(aborted);
        engine.join().await;
    }

    #[tokio::test]
    async fn image_wait_clicks_match_center() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), FrameCapture::new(patch_frame()));
        let mac = macro_of(vec![Block::new(
            "wait",
            BlockKind::ImageWait {
                image: "mark".into(),
                region: None,
                tolerance: 0.9,
                timeout_ms: 1000,
                on_timeout: TimeoutPolicy::Abort,
                click_on_match: true,
            },
        )]);
        run_to_end(&mut engine, mac, white_template_store()).await;
        // Patch spans (20,12)..(26,18); its center is (23, 15).
        assert!(injector
            .calls()
            .contains(&Call::Click(MouseButton::Left, 23, 15)));
    }

    #[tokio::test]
    async fn seek_fast_forwards_to_target() {
        let injector = RecordingInjector::default();
        let mut engine = engine_with(injector.clone(), NullCapture);
        let mac = macro_of(vec![
            Block::new("d", BlockKind::Delay { ms: 200 }),
            text_block("a", "a"),
            text_block("b", "b"),
        ]);
        let (tx, mut rx) = mpsc::channel(64);
        engine.start(mac, ImageStore::new(), tx).unwrap();
        engine
            .seek(BlockPath::root().child(Slot::Body, 2))
            .unwrap();
        while rx.recv().await.is_some() {}
        engine.join().await;
        assert_eq!(injector.texts(), vec!["b"]);
        assert_eq!(engine.state(), RunState::Finished);
    }
}
