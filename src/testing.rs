//! In-memory surfaces and oracles shared by the unit tests.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::config::PointerConfig;
use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::executor::input::{Clickable, MouseButton, Movable, PositionSource, Typeable};
use crate::llm::oracle::Oracle;
use crate::perception::screenshot::SnapshotProvider;
use crate::perception::types::Snapshot;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replies in order, then repeats the fallback (or errors when there is none).
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Mutex<Option<String>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Arc<Self> {
        let oracle = Self::default();
        lock(&oracle.replies).extend(replies.into_iter().map(|r| Ok(r.into())));
        Arc::new(oracle)
    }

    pub fn push_reply(&self, reply: &str) {
        lock(&self.replies).push_back(Ok(reply.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        lock(&self.replies).push_back(Err(message.to_string()));
    }

    pub fn set_fallback(&self, reply: &str) {
        *lock(&self.fallback) = Some(reply.to_string());
    }

    pub fn calls(&self) -> usize {
        lock(&self.queries).len()
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn ask(&self, query: &str, _snapshot: &Snapshot) -> SteadyhandResult<String> {
        lock(&self.queries).push(query.to_string());
        let next = lock(&self.replies).pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(SteadyhandError::Oracle(message)),
            None => lock(&self.fallback)
                .clone()
                .ok_or_else(|| SteadyhandError::Oracle("script exhausted".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Move(i32, i32),
    Click(MouseButton),
    Type(String),
}

/// A pointer surface that records what succeeded.
pub struct RecordingSurface {
    ops: Mutex<Vec<SurfaceOp>>,
    position: Mutex<(i32, i32)>,
    fail_moves: AtomicBool,
    fail_clicks: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            position: Mutex::new((0, 0)),
            fail_moves: AtomicBool::new(false),
            fail_clicks: AtomicBool::new(false),
        })
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        lock(&self.ops).clone()
    }

    pub fn moves(&self) -> Vec<(i32, i32)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SurfaceOp::Move(x, y) => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> Vec<MouseButton> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SurfaceOp::Click(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn typed(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SurfaceOp::Type(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_clicks(&self, fail: bool) {
        self.fail_clicks.store(fail, Ordering::SeqCst);
    }

    /// Move the pointer behind the executor's back.
    pub fn set_position(&self, x: i32, y: i32) {
        *lock(&self.position) = (x, y);
    }
}

#[async_trait]
impl Movable for RecordingSurface {
    async fn move_to(&self, x: i32, y: i32) -> bool {
        if self.fail_moves.load(Ordering::SeqCst) {
            return false;
        }
        *lock(&self.position) = (x, y);
        lock(&self.ops).push(SurfaceOp::Move(x, y));
        true
    }
}

#[async_trait]
impl Clickable for RecordingSurface {
    async fn click(&self, button: MouseButton) -> bool {
        if self.fail_clicks.load(Ordering::SeqCst) {
            return false;
        }
        lock(&self.ops).push(SurfaceOp::Click(button));
        true
    }
}

#[async_trait]
impl PositionSource for RecordingSurface {
    async fn position(&self) -> Option<(i32, i32)> {
        Some(*lock(&self.position))
    }
}

#[async_trait]
impl Typeable for RecordingSurface {
    async fn type_text(&self, text: &str) -> bool {
        lock(&self.ops).push(SurfaceOp::Type(text.to_string()));
        true
    }
}

/// Always hands back a blank frame of the configured size.
pub struct StaticSnapshots {
    width: u32,
    height: u32,
    captures: AtomicUsize,
}

impl StaticSnapshots {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            captures: AtomicUsize::new(0),
        })
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshots {
    async fn capture(&self) -> SteadyhandResult<Snapshot> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Snapshot::blank(self.width, self.height))
    }
}

pub fn fast_pointer_config() -> PointerConfig {
    PointerConfig {
        step_interval_ms: 1,
        click_settle_ms: 1,
        double_click_gap_ms: 1,
        idle_poll_ms: 1,
        keepalive_ms: 0,
        ..PointerConfig::default()
    }
}
