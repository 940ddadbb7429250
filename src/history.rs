// ============================================================================
// HISTORY — bounded snapshot undo/redo with debounced coalescing
// ============================================================================
//
// `present` always mirrors the live canvas state. A push moves the old
// present into `past` (evicting the oldest entry past 50), captures the new
// live state as present, and clears `future`. Snapshots are cheap: cloning a
// `Layer` clones its `MaskBuffer`, which only bumps chunk refcounts, so
// unchanged pixels are shared across the whole history (structural sharing).
//
// Rapid input never pushes per event. Freehand strokes push once, on
// pointer-up or after 500 ms of inactivity; viewport changes debounce at
// 1000 ms; discrete actions push immediately. The debounce is an explicit
// pending-entry deadline flushed by the engine's `tick`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::layer::{now_millis, Layer, LayerId};
use crate::viewport::Viewport;

pub const MAX_HISTORY: usize = 50;
pub const STROKE_DEBOUNCE: Duration = Duration::from_millis(500);
pub const VIEWPORT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// What kind of user action produced a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Draw,
    Erase,
    LayerAdd,
    LayerDelete,
    LayerReorder,
    LayerRename,
    LayerColor,
    ViewportChange,
}

impl ActionKind {
    /// Debounce window for coalescable actions; `None` pushes immediately.
    fn debounce(&self) -> Option<Duration> {
        match self {
            ActionKind::Draw | ActionKind::Erase => Some(STROKE_DEBOUNCE),
            ActionKind::ViewportChange => Some(VIEWPORT_DEBOUNCE),
            _ => None,
        }
    }
}

/// Immutable snapshot of everything undo must restore.
#[derive(Clone)]
pub struct Snapshot {
    pub layers: Vec<Layer>,
    pub active: Option<LayerId>,
    pub viewport: Viewport,
    pub action: ActionKind,
    pub timestamp: u64,
}

impl Snapshot {
    pub fn new(layers: Vec<Layer>, active: Option<LayerId>, viewport: Viewport, action: ActionKind) -> Self {
        Self { layers, active, viewport, action, timestamp: now_millis() }
    }

    /// The state an empty document starts from.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None, Viewport::default(), ActionKind::LayerAdd)
    }
}

/// A coalescable action waiting for its debounce deadline.
struct PendingEntry {
    kind: ActionKind,
    deadline: Instant,
}

pub struct HistoryManager {
    past: VecDeque<Snapshot>,
    present: Snapshot,
    future: Vec<Snapshot>,
    pending: Option<PendingEntry>,
}

impl HistoryManager {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            past: VecDeque::new(),
            present: initial,
            future: Vec::new(),
            pending: None,
        }
    }

    /// Push: the old present moves into `past` (evicting the oldest entry at
    /// the 50-entry cap), `snapshot` becomes present, and any redo branch is
    /// discarded. A pending coalesced entry is left armed — callers commit it
    /// via `take_pending` before pushing, never implicitly.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.past.len() == MAX_HISTORY {
            self.past.pop_front();
            crate::log_info!("history: evicted oldest entry (cap {})", MAX_HISTORY);
        }
        let prev = std::mem::replace(&mut self.present, snapshot);
        self.past.push_back(prev);
        self.future.clear();
    }

    /// Move present into `future` and pop the most recent past entry into
    /// present. Returns the new present for the engine to restore, or `None`
    /// when there is nothing to undo.
    pub fn undo(&mut self) -> Option<&Snapshot> {
        let prev = self.past.pop_back()?;
        let cur = std::mem::replace(&mut self.present, prev);
        self.future.push(cur);
        Some(&self.present)
    }

    /// Symmetric to `undo`.
    pub fn redo(&mut self) -> Option<&Snapshot> {
        let next = self.future.pop()?;
        let cur = std::mem::replace(&mut self.present, next);
        self.past.push_back(cur);
        Some(&self.present)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    pub fn present(&self) -> &Snapshot {
        &self.present
    }

    /// Reset to a fresh document state (new image loaded).
    pub fn clear(&mut self, initial: Snapshot) {
        self.past.clear();
        self.future.clear();
        self.pending = None;
        self.present = initial;
    }

    // ---- coalescing ---------------------------------------------------------

    /// Note activity for a coalescable action: starts or refreshes the
    /// pending entry's deadline. Returns the kind of a *different* pending
    /// category that must be flushed by the caller first, if any.
    pub fn touch_pending(&mut self, kind: ActionKind, now: Instant) -> Option<ActionKind> {
        let Some(window) = kind.debounce() else {
            return None;
        };
        match &mut self.pending {
            Some(p) if p.kind == kind => {
                p.deadline = now + window;
                None
            }
            Some(p) => {
                // Category switch: the old pending entry commits first
                let stale = p.kind;
                self.pending = Some(PendingEntry { kind, deadline: now + window });
                Some(stale)
            }
            None => {
                self.pending = Some(PendingEntry { kind, deadline: now + window });
                None
            }
        }
    }

    /// The pending action whose deadline has passed, if any. The caller
    /// snapshots live state and pushes it under the returned kind.
    pub fn take_due_pending(&mut self, now: Instant) -> Option<ActionKind> {
        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            self.pending.take().map(|p| p.kind)
        } else {
            None
        }
    }

    /// Unconditionally take the pending action (explicit commit, e.g.
    /// pointer-up or an incoming discrete action).
    pub fn take_pending(&mut self) -> Option<ActionKind> {
        self.pending.take().map(|p| p.kind)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
