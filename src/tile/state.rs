//! Per-tile production state machine.
//!
//! ```text
//!              claim               finish (still DRAWING)
//!   INVALID ───────────► DRAWING ──────────────────────────► VALID
//!      ▲                  │   ▲                                │
//!      │       invalidate │   │ finish (was REDRAW):           │
//!      │                  ▼   │ render once more               │
//!      │                 REDRAW                                │
//!      │                                                       │
//!      └──────────────────────── invalidate ───────────────────┘
//! ```
//!
//! All transitions are compare-and-swap on a single atomic byte. At most one
//! producer can hold a tile in `DRAWING`/`REDRAW`, and an invalidation that
//! arrives mid-production is turned into one more production pass instead of
//! being dropped.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum TileState {
    /// No valid image and nobody is producing one
    Invalid = 0,
    /// A producer is computing the image
    Drawing = 1,
    /// A producer is computing the image, but it is already stale
    Redraw = 2,
    /// The image reflects the current content
    Valid = 3,
}

impl TileState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TileState::Invalid,
            1 => TileState::Drawing,
            2 => TileState::Redraw,
            _ => TileState::Valid,
        }
    }

    /// `true` while a producer owns the tile.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TileState::Drawing | TileState::Redraw)
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileState::Invalid => "INVALID",
            TileState::Drawing => "DRAWING",
            TileState::Redraw => "REDRAW",
            TileState::Valid => "VALID",
        };
        f.write_str(name)
    }
}

/// What a producer must do after publishing an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The tile is now `VALID`; production is over.
    Settled,
    /// The tile was invalidated mid-production and is back in `DRAWING`;
    /// the same producer must render it again.
    RenderAgain,
    /// The tile is no longer owned by this producer (it was reset).
    Abandoned,
}

// =============================================================================
// AtomicTileState
// =============================================================================

/// Atomically updatable [`TileState`].
pub struct AtomicTileState {
    inner: AtomicU8,
}

impl AtomicTileState {
    pub const fn new(state: TileState) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> TileState {
        TileState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Set `new` only if the state is currently `current`.
    ///
    /// On failure returns the state that was actually observed.
    pub fn compare_and_set(&self, current: TileState, new: TileState) -> Result<(), TileState> {
        self.inner
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TileState::from_u8)
    }

    /// `INVALID → DRAWING`. Succeeds for exactly one caller.
    pub fn try_claim(&self) -> bool {
        self.compare_and_set(TileState::Invalid, TileState::Drawing)
            .is_ok()
    }

    /// Request a fresh image.
    ///
    /// `DRAWING` escalates to `REDRAW`; `VALID` and `INVALID` become `INVALID`.
    /// Returns the resulting state.
    pub fn invalidate(&self) -> TileState {
        let mut current = self.load();
        loop {
            let next = match current {
                TileState::Drawing | TileState::Redraw => TileState::Redraw,
                TileState::Valid | TileState::Invalid => TileState::Invalid,
            };
            if next == current {
                return current;
            }
            match self.compare_and_set(current, next) {
                Ok(()) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Called by the producer after it published an image.
    pub fn finish(&self) -> Completion {
        let mut current = self.load();
        loop {
            let (next, outcome) = match current {
                TileState::Drawing => (TileState::Valid, Completion::Settled),
                TileState::Redraw => (TileState::Drawing, Completion::RenderAgain),
                TileState::Invalid | TileState::Valid => return Completion::Abandoned,
            };
            match self.compare_and_set(current, next) {
                Ok(()) => return outcome,
                Err(observed) => current = observed,
            }
        }
    }

    /// Give the tile back after a failed production so it can be retried.
    ///
    /// Returns `false` if the caller did not own the tile.
    pub fn abandon(&self) -> bool {
        let mut current = self.load();
        loop {
            if !current.is_in_flight() {
                return false;
            }
            match self.compare_and_set(current, TileState::Invalid) {
                Ok(()) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for AtomicTileState {
    fn default() -> Self {
        Self::new(TileState::Invalid)
    }
}

impl fmt::Debug for AtomicTileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicTileState").field(&self.load()).finish()
    }
}
