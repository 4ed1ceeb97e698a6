//! Sizing and ownership of the per-frame buffers.

use std::fmt;

use tilefill_types::records::total_path_tiles;
use tilefill_types::{
    Config, DrawMonoid, LineSoup, Path, PathMonoid, PathSegment, SegmentCount, Tile,
};
use tilefill_types::{BumpAllocators, CONFIG_SIZE};

use crate::device::BufferUsage;
use crate::error::Error;
use crate::{PTCL_TILE_CAPACITY, SEGMENTS_PER_LINE, WG_SIZE};

/// Uniform bindings are sized in 16-byte units, so the 60-byte config is
/// bound from a 64-byte buffer.
pub const CONFIG_BUFFER_SIZE: u64 = (CONFIG_SIZE as u64).next_multiple_of(16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
    Config,
    Scene,
    Lines,
    Paths,
    Reduced,
    TagMonoids,
    DrawReduced,
    DrawMonoids,
    Info,
    Tiles,
    SegCounts,
    Segments,
    Bump,
    Ptcl,
    TilePtclOffsets,
    Output,
}

impl BufferKind {
    pub const ALL: [BufferKind; 16] = [
        BufferKind::Config,
        BufferKind::Scene,
        BufferKind::Lines,
        BufferKind::Paths,
        BufferKind::Reduced,
        BufferKind::TagMonoids,
        BufferKind::DrawReduced,
        BufferKind::DrawMonoids,
        BufferKind::Info,
        BufferKind::Tiles,
        BufferKind::SegCounts,
        BufferKind::Segments,
        BufferKind::Bump,
        BufferKind::Ptcl,
        BufferKind::TilePtclOffsets,
        BufferKind::Output,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Config => "config",
            BufferKind::Scene => "scene",
            BufferKind::Lines => "lines",
            BufferKind::Paths => "paths",
            BufferKind::Reduced => "reduced",
            BufferKind::TagMonoids => "tag_monoids",
            BufferKind::DrawReduced => "draw_reduced",
            BufferKind::DrawMonoids => "draw_monoids",
            BufferKind::Info => "info",
            BufferKind::Tiles => "tiles",
            BufferKind::SegCounts => "seg_counts",
            BufferKind::Segments => "segments",
            BufferKind::Bump => "bump",
            BufferKind::Ptcl => "ptcl",
            BufferKind::TilePtclOffsets => "tile_ptcl_offsets",
            BufferKind::Output => "output",
        }
    }

    pub fn usage(self) -> BufferUsage {
        match self {
            BufferKind::Config => BufferUsage::Uniform,
            _ => BufferUsage::Storage,
        }
    }

    /// Buffers the stages accumulate into; they start every frame at zero.
    pub fn is_zero_filled(self) -> bool {
        matches!(
            self,
            BufferKind::Tiles | BufferKind::Bump | BufferKind::Ptcl | BufferKind::TilePtclOffsets
        )
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counts that size the buffers but aren't part of [`Config`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSizing {
    pub num_lines: u64,
    pub total_path_tiles: u64,
    pub scene_bytes: u64,
    pub lines_bytes: u64,
    pub paths_bytes: u64,
}

impl BufferSizing {
    pub fn for_inputs(scene: &[u32], lines: &[LineSoup], paths: &[Path]) -> BufferSizing {
        BufferSizing {
            num_lines: lines.len() as u64,
            // Saturated counts fail sizing with `InputTooLarge`.
            total_path_tiles: total_path_tiles(paths).unwrap_or(u64::MAX),
            scene_bytes: std::mem::size_of_val(scene) as u64,
            lines_bytes: std::mem::size_of_val(lines) as u64,
            paths_bytes: std::mem::size_of_val(paths) as u64,
        }
    }
}

/// Byte size of every buffer for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSizes {
    sizes: [u64; 16],
}

impl BufferSizes {
    /// Every buffer holds at least one record so that it can be bound.
    pub fn new(config: &Config, sizing: &BufferSizing) -> Result<BufferSizes, Error> {
        let tag_words = config.n_path_tag_words() as u64;
        let n_drawobj = config.n_drawobj as u64;
        let n_tiles = config.width_in_tiles as u64 * config.height_in_tiles as u64;
        let seg_slots = sizing
            .num_lines
            .checked_mul(SEGMENTS_PER_LINE as u64)
            .and_then(indexed);
        let pixels = config.target_width as u64 * config.target_height as u64;
        let wg = WG_SIZE as u64;

        let mut sizes = [0; 16];
        for kind in BufferKind::ALL {
            let size = match kind {
                BufferKind::Config => Some(CONFIG_BUFFER_SIZE),
                BufferKind::Scene => bytes(sizing.scene_bytes, 4),
                BufferKind::Lines => bytes(sizing.lines_bytes, record::<LineSoup>()),
                BufferKind::Paths => bytes(sizing.paths_bytes, record::<Path>()),
                BufferKind::Reduced => records::<PathMonoid>(tag_words.div_ceil(wg)),
                BufferKind::TagMonoids => records::<PathMonoid>(tag_words),
                BufferKind::DrawReduced => records::<DrawMonoid>(n_drawobj.div_ceil(wg)),
                BufferKind::DrawMonoids => records::<DrawMonoid>(n_drawobj),
                BufferKind::Info => records::<u32>(n_drawobj),
                BufferKind::Tiles => indexed(sizing.total_path_tiles).and_then(records::<Tile>),
                BufferKind::SegCounts => seg_slots.and_then(records::<SegmentCount>),
                BufferKind::Segments => seg_slots.and_then(records::<PathSegment>),
                BufferKind::Bump => Some(record::<BumpAllocators>()),
                BufferKind::Ptcl => n_tiles
                    .checked_mul(PTCL_TILE_CAPACITY as u64)
                    .and_then(records::<u32>),
                BufferKind::TilePtclOffsets => records::<u32>(n_tiles),
                BufferKind::Output => records::<u32>(pixels),
            };
            sizes[kind.index()] = size.ok_or(Error::InputTooLarge { buffer: kind })?;
        }
        Ok(BufferSizes { sizes })
    }

    pub fn get(&self, kind: BufferKind) -> u64 {
        self.sizes[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.sizes.iter().sum()
    }
}

fn record<T>() -> u64 {
    std::mem::size_of::<T>() as u64
}

fn records<T>(count: u64) -> Option<u64> {
    count.max(1).checked_mul(record::<T>())
}

/// Record counts the stages index with a `u32`.
fn indexed(count: u64) -> Option<u64> {
    (count <= u32::MAX as u64).then_some(count)
}

/// A caller-provided byte length, rounded up to a word and at least one
/// record long.
fn bytes(len: u64, min: u64) -> Option<u64> {
    len.max(min).checked_next_multiple_of(4)
}

/// The buffers of one frame, indexed by [`BufferKind`].
pub struct BufferSet<B> {
    buffers: Vec<B>,
    sizes: Option<BufferSizes>,
}

impl<B> BufferSet<B> {
    pub fn empty() -> BufferSet<B> {
        BufferSet {
            buffers: Vec::new(),
            sizes: None,
        }
    }

    /// `buffers` must be in [`BufferKind::ALL`] order.
    pub(crate) fn from_parts(buffers: Vec<B>, sizes: BufferSizes) -> BufferSet<B> {
        debug_assert_eq!(buffers.len(), BufferKind::ALL.len());
        BufferSet {
            buffers,
            sizes: Some(sizes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, kind: BufferKind) -> Option<&B> {
        self.buffers.get(kind.index())
    }

    pub fn sizes(&self) -> Option<&BufferSizes> {
        self.sizes.as_ref()
    }

    /// Empty the set, handing back its buffers.
    pub(crate) fn take(&mut self) -> Vec<B> {
        self.sizes = None;
        std::mem::take(&mut self.buffers)
    }
}

impl<B> fmt::Debug for BufferSet<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSet")
            .field("buffers", &self.buffers.len())
            .field("sizes", &self.sizes)
            .finish()
    }
}

impl<B> Default for BufferSet<B> {
    fn default() -> Self {
        BufferSet::empty()
    }
}
