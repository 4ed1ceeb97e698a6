//! A compute-centric 2D renderer: nine GPU stages that turn an encoded scene
//! of filled paths into pixels, binned through 16×16 tiles.
//!
//! The [`Dispatcher`] owns the compiled stage programs and drives a frame:
//!
//! 1. `pathtag_reduce`, `pathtag_scan`: prefix sums over path tags.
//! 2. `draw_reduce`, `draw_leaf`: prefix sums over draw tags; per-draw info.
//! 3. `path_count`: walk each line across tiles, counting segments and
//!    accumulating backdrop.
//! 4. `backdrop`: prefix sum of backdrop along each tile row of a path.
//! 5. `coarse`: per-tile command lists, allocating segment slots.
//! 6. `path_tiling`: clip each line to its tiles.
//! 7. `fine`: per-pixel nonzero winding and compositing.

pub mod buffers;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod stage;
pub mod wgpu_device;

#[cfg(test)]
mod mock;

pub use buffers::{BufferKind, BufferSet, BufferSizes, BufferSizing};
pub use device::{Device, DeviceError};
pub use dispatcher::{Dispatcher, DispatcherOptions, FrameInputs, FrameReport, ProgramSources};
pub use error::{Error, ErrorScope};
pub use stage::{workgroup_count, Stage};
pub use wgpu_device::WgpuDevice;

pub use tilefill_types as types;

/// Threads per workgroup of every stage but `fine`.
pub const WG_SIZE: u32 = 256;

/// Words of command list reserved for each tile.
pub const PTCL_TILE_CAPACITY: u32 = 256;

/// Tile crossings budgeted per line when sizing the segment buffers.
///
/// A line crossing more tiles than this overflows unless others cross
/// fewer; overflow fails the frame.
pub const SEGMENTS_PER_LINE: u32 = 4;

/// Largest workgroup count along one dispatch dimension.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65535;
