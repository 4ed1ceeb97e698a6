//! Scan monoids for path tags and draw tags.
//!
//! These mirror the `path_monoid_from_tag` / `draw_monoid_from_tag`
//! functions in the stage programs exactly; the reduce and scan stages rely
//! on `combine` being associative with `Default` as the identity.

use bytemuck::{Pod, Zeroable};

pub trait Monoid: Default + Copy {
    /// The summary of a single input word.
    fn new(word: u32) -> Self;

    fn combine(&self, other: &Self) -> Self;
}

/// Path tag byte values; four tags are packed into each scene word.
pub mod path_tag {
    pub const LINE_TO_F32: u8 = 0x9;
    pub const QUAD_TO_F32: u8 = 0xa;
    pub const CUBIC_TO_F32: u8 = 0xb;
    pub const SEG_TYPE: u8 = 0x3;
    pub const SUBPATH_END_BIT: u8 = 0x4;
    pub const F32_BIT: u8 = 0x8;
    pub const PATH: u8 = 0x10;
    pub const TRANSFORM: u8 = 0x20;
    pub const STYLE: u8 = 0x40;
}

/// Draw tag values, one per scene word.
pub mod draw_tag {
    pub const NOP: u32 = 0;
    /// A solid fill; one word of draw data (the colour), one info record.
    pub const FILL_COLOR: u32 = 0x44;
}

/// Words in one style table entry.
pub const STYLE_SIZE_IN_WORDS: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PathMonoid {
    pub trans_ix: u32,
    /// Index of the next path segment.
    pub pathseg_ix: u32,
    /// Offset in words into the path data stream.
    pub pathseg_offset: u32,
    pub style_ix: u32,
    pub path_ix: u32,
}

impl Monoid for PathMonoid {
    fn new(tag_word: u32) -> Self {
        let bytes = |bits: u8| tag_word & (bits as u32 * 0x101_0101);
        let point_count = bytes(path_tag::SEG_TYPE);
        let pathseg_ix = ((point_count * 7) & 0x404_0404).count_ones();
        let trans_ix = bytes(path_tag::TRANSFORM).count_ones();
        let n_points = point_count + (bytes(path_tag::SUBPATH_END_BIT) >> 2);
        let mut a = n_points + (n_points & ((bytes(path_tag::F32_BIT) >> 3) * 15));
        a += a >> 8;
        a += a >> 16;
        let pathseg_offset = a & 0xff;
        let path_ix = bytes(path_tag::PATH).count_ones();
        let style_ix = bytes(path_tag::STYLE).count_ones() * STYLE_SIZE_IN_WORDS;
        PathMonoid {
            trans_ix,
            pathseg_ix,
            pathseg_offset,
            style_ix,
            path_ix,
        }
    }

    fn combine(&self, other: &Self) -> Self {
        PathMonoid {
            trans_ix: self.trans_ix + other.trans_ix,
            pathseg_ix: self.pathseg_ix + other.pathseg_ix,
            pathseg_offset: self.pathseg_offset + other.pathseg_offset,
            style_ix: self.style_ix + other.style_ix,
            path_ix: self.path_ix + other.path_ix,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawMonoid {
    /// Index of the path this draw object fills.
    pub path_ix: u32,
    pub clip_ix: u32,
    /// Offset in words into the draw data stream.
    pub scene_offset: u32,
    pub info_offset: u32,
}

impl Monoid for DrawMonoid {
    fn new(tag: u32) -> Self {
        DrawMonoid {
            path_ix: (tag != draw_tag::NOP) as u32,
            clip_ix: tag & 1,
            scene_offset: (tag >> 2) & 0x07,
            info_offset: (tag >> 6) & 0x0f,
        }
    }

    fn combine(&self, other: &Self) -> Self {
        DrawMonoid {
            path_ix: self.path_ix + other.path_ix,
            clip_ix: self.clip_ix + other.clip_ix,
            scene_offset: self.scene_offset + other.scene_offset,
            info_offset: self.info_offset + other.info_offset,
        }
    }
}

/// Exclusive prefix of `M::new` over `words`; the host-side counterpart of
/// the reduce + scan stage pairs.
pub fn exclusive_scan<M: Monoid>(words: &[u32]) -> Vec<M> {
    let mut agg = M::default();
    words
        .iter()
        .map(|&word| {
            let prefix = agg;
            agg = agg.combine(&M::new(word));
            prefix
        })
        .collect()
}

/// Per-workgroup reductions, as written by the reduce stages.
pub fn reduce_chunks<M: Monoid>(words: &[u32], chunk: usize) -> Vec<M> {
    words
        .chunks(chunk)
        .map(|c| c.iter().fold(M::default(), |m, &w| m.combine(&M::new(w))))
        .collect()
}
