//! Rate-limited pointer actuation.
//!
//! Motions are queued and drained strictly FIFO by one background worker that
//! talks to the surface; a second, low-frequency task re-asserts the last known
//! position while the queue is idle. Both hold the actuation lock across every
//! surface call, so a ping never lands between a queued move and the click after it. The synchronous-looking [`MotionExecutor::move_to`]
//! and [`MotionExecutor::click`] enqueue a batch and wait for its last entry to drain.
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::PointerConfig;
use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::executor::coordinator::RelativePosition;
use crate::executor::input::{MouseButton, Pointer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// One waypoint in surface space.
    Move { x: f64, y: f64 },
    /// A click followed by a pause before the next entry is drained.
    Click { button: MouseButton, pause: Duration },
}

struct MotionEntry {
    motion: Motion,
    ack: Option<Arc<BatchAck>>,
    last_in_batch: bool,
}

/// Completion signal for one enqueued batch. Dropping every entry of a batch
/// without finishing it drops the sender, which waiters read as failure.
struct BatchAck {
    failed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<bool>>>,
}

impl BatchAck {
    fn new() -> (Arc<Self>, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let ack = Arc::new(Self {
            failed: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (ack, rx)
    }

    fn record(&self, ok: bool) {
        if !ok {
            self.failed.store(true, Ordering::Release);
        }
    }

    fn finish(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(!self.failed.load(Ordering::Acquire));
        }
    }
}

/// Pointer bookkeeping. Owned by the executor; every access goes through its lock.
pub struct MouseState {
    position: (f64, f64),
    queue: VecDeque<MotionEntry>,
    width: u32,
    height: u32,
}

impl MouseState {
    fn in_bounds(&self, x: f64, y: f64) -> bool {
        x.is_finite()
            && y.is_finite()
            && x >= 0.0
            && y >= 0.0
            && x <= (self.width - 1) as f64
            && y <= (self.height - 1) as f64
    }

    /// Where the pointer will be once the queue has drained.
    fn planned_position(&self) -> (f64, f64) {
        self.queue
            .iter()
            .rev()
            .find_map(|entry| match entry.motion {
                Motion::Move { x, y } => Some((x, y)),
                Motion::Click { .. } => None,
            })
            .unwrap_or(self.position)
    }
}

#[derive(Debug, Clone)]
struct Timing {
    step: Duration,
    click_settle: Duration,
    double_click_gap: Duration,
    idle_poll: Duration,
    keepalive: Option<Duration>,
    smooth_steps: u32,
    tolerance: f64,
    sync_position: bool,
}

impl Timing {
    fn from_config(cfg: &PointerConfig) -> SteadyhandResult<Self> {
        if !(cfg.movement_speed > 0.0) {
            return Err(SteadyhandError::Config(
                "pointer.movement_speed must be > 0".into(),
            ));
        }
        let step = Duration::from_secs_f64(
            Duration::from_millis(cfg.step_interval_ms).as_secs_f64() / cfg.movement_speed,
        );
        Ok(Self {
            step,
            click_settle: Duration::from_millis(cfg.click_settle_ms),
            double_click_gap: Duration::from_millis(cfg.double_click_gap_ms),
            idle_poll: Duration::from_millis(cfg.idle_poll_ms.max(1)),
            keepalive: (cfg.keepalive_ms > 0).then(|| Duration::from_millis(cfg.keepalive_ms)),
            smooth_steps: cfg.smooth_steps.max(1),
            tolerance: cfg.tolerance_px,
            sync_position: cfg.sync_position,
        })
    }
}

struct Shared {
    state: Mutex<MouseState>,
    /// Serializes surface actuation between the drain and keep-alive workers.
    actuation: tokio::sync::Mutex<()>,
    surface: Arc<dyn Pointer>,
    timing: Timing,
    active: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MouseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MotionExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MotionExecutor {
    /// Build the executor and spawn its drain and keep-alive workers.
    /// Must be called from inside a tokio runtime.
    pub fn start(
        surface: Arc<dyn Pointer>,
        width: u32,
        height: u32,
        cfg: &PointerConfig,
    ) -> SteadyhandResult<Self> {
        if width == 0 || height == 0 {
            return Err(SteadyhandError::Config(format!(
                "surface must have non-zero size, got {width}x{height}"
            )));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(MouseState {
                position: (0.0, 0.0),
                queue: VecDeque::new(),
                width,
                height,
            }),
            actuation: tokio::sync::Mutex::new(()),
            surface,
            timing: Timing::from_config(cfg)?,
            active: AtomicBool::new(true),
        });

        let mut workers = vec![tokio::spawn(drain_loop(shared.clone()))];
        if let Some(period) = shared.timing.keepalive {
            workers.push(tokio::spawn(keepalive_loop(shared.clone(), period)));
        }
        tracing::info!(width, height, "motion executor started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.shared.state();
        (state.width, state.height)
    }

    /// False once [`Self::stop`] has been called.
    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state().queue.is_empty()
    }

    /// Clamp a point onto the surface rectangle.
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        let (w, h) = self.size();
        let cx = if x.is_finite() { x.clamp(0.0, (w - 1) as f64) } else { 0.0 };
        let cy = if y.is_finite() { y.clamp(0.0, (h - 1) as f64) } else { 0.0 };
        (cx, cy)
    }

    pub fn resize(&self, width: u32, height: u32) -> SteadyhandResult<()> {
        if width == 0 || height == 0 {
            return Err(SteadyhandError::Config(format!(
                "surface must have non-zero size, got {width}x{height}"
            )));
        }
        let mut state = self.shared.state();
        state.width = width;
        state.height = height;
        tracing::debug!(width, height, "motion bounds resized");
        Ok(())
    }

    /// Queue a move. Returns false only when the target is off the surface
    /// or the executor has been stopped.
    pub fn enqueue_move(&self, x: f64, y: f64, smooth: bool) -> bool {
        self.push_move(x, y, smooth, None)
    }

    pub fn enqueue_click(&self, button: MouseButton, double: bool) -> bool {
        self.push_click(button, double, None)
    }

    /// Move and wait for the motion to drain. True when every waypoint was
    /// actuated and the pointer ended up within tolerance of the target.
    pub async fn move_to(&self, x: f64, y: f64, smooth: bool) -> bool {
        let (ack, rx) = BatchAck::new();
        if !self.push_move(x, y, smooth, Some(ack)) {
            return false;
        }
        if !rx.await.unwrap_or(false) {
            return false;
        }
        let (px, py) = self.get_position().await;
        let landed = (px - x).hypot(py - y) <= self.shared.timing.tolerance;
        if !landed {
            tracing::warn!(x, y, px, py, "pointer did not land within tolerance");
        }
        landed
    }

    /// Click and wait for it to drain.
    pub async fn click(&self, button: MouseButton, double: bool) -> bool {
        let (ack, rx) = BatchAck::new();
        if !self.push_click(button, double, Some(ack)) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Current position, reconciled with the surface when sync is enabled.
    pub async fn get_position(&self) -> (f64, f64) {
        let internal = self.shared.state().position;
        if !self.shared.timing.sync_position {
            return internal;
        }
        let Some((ex, ey)) = guarded("position", self.shared.surface.position())
            .await
            .flatten()
        else {
            return internal;
        };

        let external = (ex as f64, ey as f64);
        let mut state = self.shared.state();
        let (ix, iy) = state.position;
        if (ix - external.0).hypot(iy - external.1) > self.shared.timing.tolerance {
            tracing::debug!(ix, iy, ex, ey, "pointer drifted; adopting surface position");
            state.position = external;
        }
        state.position
    }

    /// Put the pointer in the middle of the surface.
    pub async fn initialize(&self) -> bool {
        let (w, h) = self.size();
        let (cx, cy) = RelativePosition::Center.resolve(w - 1, h - 1);
        self.move_to(cx as f64, cy as f64, false).await
    }

    /// Stop both workers and wait at most `timeout` for each. Queued motions are
    /// discarded and their waiters see failure. True when both exited in time.
    pub async fn stop(&self, timeout: Duration) -> bool {
        {
            // Pushes check the flag under the same lock, so nothing is queued after this.
            let _state = self.shared.state();
            self.shared.active.store(false, Ordering::Release);
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };

        let mut clean = true;
        for mut handle in handles {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                tracing::warn!(?timeout, "motion worker did not stop in time; aborting");
                handle.abort();
                clean = false;
            }
        }

        let dropped = {
            let mut state = self.shared.state();
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        tracing::info!(dropped, clean, "motion executor stopped");
        clean
    }

    fn push_move(&self, x: f64, y: f64, smooth: bool, ack: Option<Arc<BatchAck>>) -> bool {
        let mut state = self.shared.state();
        if !self.shared.active.load(Ordering::Acquire) {
            return false;
        }
        if !state.in_bounds(x, y) {
            tracing::warn!(x, y, width = state.width, height = state.height, "move target out of bounds");
            return false;
        }

        let waypoints = if smooth {
            smooth_path(state.planned_position(), (x, y), self.shared.timing.smooth_steps)
        } else {
            vec![(x, y)]
        };
        let last = waypoints.len() - 1;
        for (i, (wx, wy)) in waypoints.into_iter().enumerate() {
            state.queue.push_back(MotionEntry {
                motion: Motion::Move { x: wx, y: wy },
                ack: ack.clone(),
                last_in_batch: i == last,
            });
        }
        true
    }

    fn push_click(&self, button: MouseButton, double: bool, ack: Option<Arc<BatchAck>>) -> bool {
        let timing = &self.shared.timing;
        let mut state = self.shared.state();
        if !self.shared.active.load(Ordering::Acquire) {
            return false;
        }
        if double {
            state.queue.push_back(MotionEntry {
                motion: Motion::Click {
                    button,
                    pause: timing.double_click_gap,
                },
                ack: ack.clone(),
                last_in_batch: false,
            });
        }
        state.queue.push_back(MotionEntry {
            motion: Motion::Click {
                button,
                pause: timing.click_settle,
            },
            ack,
            last_in_batch: true,
        });
        true
    }
}

impl Drop for MotionExecutor {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
    }
}

/// Smoothstep-eased path from `from` to `to`. The last waypoint is exactly `to`.
pub fn smooth_path(from: (f64, f64), to: (f64, f64), steps: u32) -> Vec<(f64, f64)> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| {
            if i == steps {
                return to;
            }
            let t = i as f64 / steps as f64;
            let eased = t * t * (3.0 - 2.0 * t);
            (
                from.0 + (to.0 - from.0) * eased,
                from.1 + (to.1 - from.1) * eased,
            )
        })
        .collect()
}

/// Await a surface call, turning a panic into a logged failure.
async fn guarded<T, F>(what: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(out) => Some(out),
        Err(_) => {
            tracing::error!(primitive = what, "surface primitive panicked");
            None
        }
    }
}

async fn drain_loop(shared: Arc<Shared>) {
    tracing::debug!("motion drain worker running");
    while shared.active.load(Ordering::Acquire) {
        let actuation = shared.actuation.lock().await;
        let next = shared.state().queue.pop_front();
        let Some(entry) = next else {
            drop(actuation);
            tokio::time::sleep(shared.timing.idle_poll).await;
            continue;
        };

        let (ok, pause) = match entry.motion {
            Motion::Move { x, y } => {
                let (px, py) = (x.round() as i32, y.round() as i32);
                let ok = guarded("move", shared.surface.move_to(px, py))
                    .await
                    .unwrap_or(false);
                if ok {
                    shared.state().position = (x, y);
                } else {
                    tracing::warn!(x = px, y = py, "surface move failed");
                }
                (ok, shared.timing.step)
            }
            Motion::Click { button, pause } => {
                let ok = guarded("click", shared.surface.click(button))
                    .await
                    .unwrap_or(false);
                if !ok {
                    tracing::warn!(?button, "surface click failed");
                }
                (ok, pause)
            }
        };
        drop(actuation);
        tokio::time::sleep(pause).await;

        if let Some(ack) = entry.ack {
            ack.record(ok);
            if entry.last_in_batch {
                ack.finish();
            }
        }
    }
    tracing::debug!("motion drain worker exited");
}

async fn keepalive_loop(shared: Arc<Shared>, period: Duration) {
    let mut last_ping = Instant::now();
    while shared.active.load(Ordering::Acquire) {
        tokio::time::sleep(shared.timing.idle_poll).await;
        if last_ping.elapsed() < period {
            continue;
        }
        last_ping = Instant::now();

        // Position is read only after the drain worker has let go of the surface.
        let _actuation = shared.actuation.lock().await;
        let idle_at = {
            let state = shared.state();
            state.queue.is_empty().then_some(state.position)
        };
        if let Some((x, y)) = idle_at {
            let ok = guarded("keepalive", shared.surface.move_to(x.round() as i32, y.round() as i32))
                .await
                .unwrap_or(false);
            if !ok {
                tracing::debug!("keep-alive ping failed");
            }
        }
    }
}
