//! Records stored in the pipeline buffers.
//!
//! Each struct matches the WGSL declaration of the same name byte for byte,
//! including the implicit padding WGSL inserts before `vec2`/`vec4` members.

use bytemuck::{Pod, Zeroable};

/// Tile width in pixels.
pub const TILE_WIDTH: u32 = 16;
/// Tile height in pixels.
pub const TILE_HEIGHT: u32 = 16;

/// A flattened line in scene (pixel) space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LineSoup {
    pub path_ix: u32,
    pub _padding: u32,
    pub p0: [f32; 2],
    pub p1: [f32; 2],
}

impl LineSoup {
    pub fn new(path_ix: u32, p0: [f32; 2], p1: [f32; 2]) -> LineSoup {
        LineSoup {
            path_ix,
            _padding: 0,
            p0,
            p1,
        }
    }
}

/// Per-path tile allocation: a half-open bounding box in tile units and the
/// index of the path's first [`Tile`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Path {
    /// `[x0, y0, x1, y1)` in tiles.
    pub bbox: [u32; 4],
    pub tiles: u32,
    pub _padding: [u32; 3],
}

impl Path {
    pub fn new(bbox: [u32; 4], tiles: u32) -> Path {
        Path {
            bbox,
            tiles,
            _padding: [0; 3],
        }
    }

    /// Number of tiles covered by the bounding box.
    pub fn tile_count(&self) -> u64 {
        let [x0, y0, x1, y1] = self.bbox;
        x1.saturating_sub(x0) as u64 * y1.saturating_sub(y0) as u64
    }
}

/// Sum of every path's own tile count: the size of the tile array, which
/// is unrelated to the size of the global tile grid. `None` if the sum
/// doesn't fit in a `u64`.
pub fn total_path_tiles(paths: &[Path]) -> Option<u64> {
    paths
        .iter()
        .try_fold(0u64, |total, path| total.checked_add(path.tile_count()))
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Tile {
    pub backdrop: i32,
    /// A segment count until coarse allocates the tile's segments, then the
    /// bitwise complement of the first segment index.
    pub segment_count_or_ix: u32,
}

impl Tile {
    /// The segment index, if coarse has replaced the count with one.
    pub fn segment_index(&self) -> Option<u32> {
        if self.segment_count_or_ix & 0x8000_0000 != 0 {
            Some(!self.segment_count_or_ix)
        } else {
            None
        }
    }
}

/// One crossing of a line with a tile, recorded by the path count stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SegmentCount {
    pub line_ix: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    /// Slot of this segment within the tile's run of segments.
    pub seg_within_slice: u32,
}

/// A line clipped to a tile, in tile-relative coordinates.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PathSegment {
    pub point0: [f32; 2],
    pub point1: [f32; 2],
    /// Tile-relative y where the line crosses the tile's left edge, or a
    /// large value if it doesn't.
    pub y_edge: f32,
    /// Winding change applied below `y_edge`.
    pub edge_winding: i32,
}

/// Atomic counters shared across the path count, coarse and path tiling
/// stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BumpAllocators {
    /// Bitwise or of the `BUMP_FAILED_*` flags.
    pub failed: u32,
    pub seg_counts: u32,
    pub segments: u32,
    pub ptcl: u32,
}

pub const BUMP_FAILED_PATH_COUNT: u32 = 1;
pub const BUMP_FAILED_COARSE: u32 = 2;
pub const BUMP_FAILED_PATH_TILING: u32 = 4;

/// Per-tile command list opcodes.
pub mod cmd {
    pub const END: u32 = 0;
    /// `[FILL, seg_ix, n_segs, backdrop]`
    pub const FILL: u32 = 1;
    /// `[SOLID]`, full coverage.
    pub const SOLID: u32 = 3;
    /// `[COLOR, drawobj_ix]`, composite the draw object's info colour.
    pub const COLOR: u32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn sizes_match_wgsl_layout() {
        assert_eq!(size_of::<LineSoup>(), 24);
        assert_eq!(size_of::<Path>(), 32);
        assert_eq!(size_of::<Tile>(), 8);
        assert_eq!(size_of::<SegmentCount>(), 16);
        assert_eq!(size_of::<PathSegment>(), 24);
        assert_eq!(size_of::<BumpAllocators>(), 16);
    }

    #[test]
    fn path_tile_count_handles_empty_boxes() {
        assert_eq!(Path::new([2, 3, 6, 5], 0).tile_count(), 8);
        assert_eq!(Path::new([4, 3, 4, 9], 0).tile_count(), 0);
        assert_eq!(Path::new([5, 3, 4, 9], 0).tile_count(), 0);
        let paths = [Path::new([0, 0, 2, 2], 0), Path::new([1, 1, 4, 2], 4)];
        assert_eq!(total_path_tiles(&paths), Some(7));
    }

    #[test]
    fn huge_boxes_count_without_wrapping() {
        let path = Path::new([0, 0, 65536, 32768], 0);
        assert_eq!(path.tile_count(), 1 << 31);
        assert_eq!(total_path_tiles(&[path, path]), Some(1 << 32));
        let full = Path::new([0, 0, u32::MAX, u32::MAX], 0);
        assert_eq!(total_path_tiles(&[full; 5]), None);
    }

    #[test]
    fn inverted_index_is_distinguished_from_a_count() {
        let counted = Tile {
            backdrop: 0,
            segment_count_or_ix: 3,
        };
        assert_eq!(counted.segment_index(), None);
        let allocated = Tile {
            backdrop: -1,
            segment_count_or_ix: !0,
        };
        assert_eq!(allocated.segment_index(), Some(0));
        let allocated = Tile {
            backdrop: 0,
            segment_count_or_ix: !41,
        };
        assert_eq!(allocated.segment_index(), Some(41));
    }
}
