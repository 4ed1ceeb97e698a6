//! Data layouts shared between the tilefill host code and its stage programs.

pub mod config;
pub mod encoder;
pub mod monoid;
pub mod records;
pub mod scene;

pub use config::{Config, CONFIG_SIZE};
pub use monoid::{DrawMonoid, Monoid, PathMonoid};
pub use records::{
    BumpAllocators, LineSoup, Path, PathSegment, SegmentCount, Tile, TILE_HEIGHT, TILE_WIDTH,
};
pub use scene::{EncodedScene, SceneEncoder};
