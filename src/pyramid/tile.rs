use std::fmt;

use crate::tile::{AtomicTileState, TileAddress, TilePosition, TileState, ZoomLevel};

/// One entry of the pyramid: an address and its production state.
///
/// The image itself lives in the [`TileStore`](crate::cache::TileStore);
/// a `Tile` only records whether that image is current. `generation` is the
/// registry generation the tile was created in, so work started before a
/// reload can be told apart from work on the reloaded pyramid.
pub struct Tile {
    address: TileAddress,
    state: AtomicTileState,
    generation: u64,
}

impl Tile {
    pub(crate) fn new(address: TileAddress, generation: u64) -> Self {
        Self {
            address,
            state: AtomicTileState::default(),
            generation,
        }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn level(&self) -> ZoomLevel {
        self.address.level
    }

    pub fn position(&self) -> TilePosition {
        self.address.position
    }

    /// The tile's state machine. Transitions are the only way to mutate it.
    pub fn state(&self) -> &AtomicTileState {
        &self.state
    }

    /// Shorthand for `self.state().load()`.
    pub fn current_state(&self) -> TileState {
        self.state.load()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("address", &self.address)
            .field("state", &self.state.load())
            .field("generation", &self.generation)
            .finish()
    }
}
