//! A small scene encoder producing the inputs of one frame.
//!
//! Only closed polygons with a solid fill are supported; anything richer
//! (curves, strokes, gradients) belongs to an upstream scene builder that
//! flattens into the same streams.

use crate::config::Config;
use crate::encoder::{Encode, Encoder};
use crate::monoid::{draw_tag, path_tag};
use crate::records::{LineSoup, Path, TILE_HEIGHT, TILE_WIDTH};

const MAX_EDGE_PIECES: u32 = 1 << 16;

const IDENTITY_TRANSFORM: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// The inputs of one frame: the scene word array, the flattened lines, the
/// per-path tile allocations, and a `Config` describing them.
#[derive(Clone, Debug, Default)]
pub struct EncodedScene {
    pub config: Config,
    pub scene: Vec<u32>,
    pub lines: Vec<LineSoup>,
    pub paths: Vec<Path>,
}

#[derive(Default)]
pub struct SceneEncoder {
    path_tags: Vec<u8>,
    path_data: Encoder,
    draw_tags: Vec<u32>,
    draw_data: Vec<u32>,
    lines: Vec<LineSoup>,
    /// Pixel-space bounds of each path, `[min_x, min_y, max_x, max_y]`.
    bounds: Vec<[f32; 4]>,
}

impl SceneEncoder {
    pub fn new() -> SceneEncoder {
        SceneEncoder {
            path_tags: vec![path_tag::TRANSFORM],
            ..Default::default()
        }
    }

    pub fn path_count(&self) -> usize {
        self.bounds.len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Fill the closed polygon through `points` with `color` (`0xRRGGBBAA`).
    ///
    /// Polygons with fewer than two points are ignored. Edges longer than a
    /// tile are emitted as several lines.
    pub fn fill_polygon(&mut self, points: &[[f32; 2]], color: u32) {
        if points.len() < 2 {
            return;
        }
        let path_ix = self.bounds.len() as u32;
        let mut bounds = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];

        self.path_tags.push(path_tag::STYLE);
        points[0].encode(&mut self.path_data);
        for (i, &p0) in points.iter().enumerate() {
            let p1 = points[(i + 1) % points.len()];
            let closing = i + 1 == points.len();
            let pieces = edge_pieces(p0, p1);
            let mut a = p0;
            for k in 1..=pieces {
                let b = if k == pieces {
                    p1
                } else {
                    let t = k as f32 / pieces as f32;
                    [p0[0] + (p1[0] - p0[0]) * t, p0[1] + (p1[1] - p0[1]) * t]
                };
                let tag = if closing && k == pieces {
                    path_tag::LINE_TO_F32 | path_tag::SUBPATH_END_BIT
                } else {
                    path_tag::LINE_TO_F32
                };
                self.path_tags.push(tag);
                b.encode(&mut self.path_data);
                self.lines.push(LineSoup::new(path_ix, a, b));
                a = b;
            }

            bounds[0] = bounds[0].min(p0[0]);
            bounds[1] = bounds[1].min(p0[1]);
            bounds[2] = bounds[2].max(p0[0]);
            bounds[3] = bounds[3].max(p0[1]);
        }
        self.path_tags.push(path_tag::PATH);
        self.bounds.push(bounds);

        self.draw_tags.push(draw_tag::FILL_COLOR);
        self.draw_data.push(color);
    }

    /// Fill an axis-aligned rectangle.
    pub fn fill_rect(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, color: u32) {
        self.fill_polygon(&[[x0, y0], [x1, y0], [x1, y1], [x0, y1]], color);
    }

    /// Lay the streams out and fill in a `Config` for a `target_width` ×
    /// `target_height` render target.
    ///
    /// Regions are placed as path tags, draw tags, path data, draw data,
    /// transforms, styles; the path tags are immediately followed by the
    /// draw tags, so `draw_tag_base - path_tag_base` is the path tag word
    /// count.
    pub fn finish(self, target_width: u32, target_height: u32, base_color: u32) -> EncodedScene {
        let width_in_tiles = target_width.div_ceil(TILE_WIDTH);
        let height_in_tiles = target_height.div_ceil(TILE_HEIGHT);

        let mut tag_encoder = Encoder::new();
        self.path_tags[..].encode(&mut tag_encoder);
        let path_tag_words = tag_encoder.to_words();
        let path_data_words = self.path_data.to_words();

        let mut paths = Vec::with_capacity(self.bounds.len());
        let mut tiles = 0u64;
        for [min_x, min_y, max_x, max_y] in &self.bounds {
            let x0 = tile_floor(*min_x, TILE_WIDTH, width_in_tiles);
            let y0 = tile_floor(*min_y, TILE_HEIGHT, height_in_tiles);
            let x1 = tile_ceil(*max_x, TILE_WIDTH, width_in_tiles).max(x0);
            let y1 = tile_ceil(*max_y, TILE_HEIGHT, height_in_tiles).max(y0);
            // Offsets past the u32 index range are rejected when sizing.
            let path = Path::new([x0, y0, x1, y1], u32::try_from(tiles).unwrap_or(u32::MAX));
            tiles = tiles.saturating_add(path.tile_count());
            paths.push(path);
        }

        let mut scene = Vec::new();
        let path_tag_base = 0;
        scene.extend_from_slice(&path_tag_words);
        let draw_tag_base = scene.len() as u32;
        scene.extend_from_slice(&self.draw_tags);
        let path_data_base = scene.len() as u32;
        scene.extend_from_slice(&path_data_words);
        let draw_data_base = scene.len() as u32;
        scene.extend_from_slice(&self.draw_data);
        let transform_base = scene.len() as u32;
        scene.extend(IDENTITY_TRANSFORM.iter().map(|f| f.to_bits()));
        let style_base = scene.len() as u32;
        // One word per path; zero selects the nonzero fill rule.
        scene.extend(std::iter::repeat(0).take(paths.len()));

        let config = Config {
            width_in_tiles,
            height_in_tiles,
            target_width,
            target_height,
            n_drawobj: self.draw_tags.len() as u32,
            n_path: paths.len() as u32,
            n_clip: 0,
            path_tag_base,
            path_data_base,
            draw_tag_base,
            draw_data_base,
            transform_base,
            style_base,
            n_lines: self.lines.len() as u32,
            base_color,
        };

        EncodedScene {
            config,
            scene,
            lines: self.lines,
            paths,
        }
    }
}

/// Edges are split so that no line spans more than a tile in either
/// direction; such a line crosses at most three tiles, which keeps scenes
/// within the segment budget of the pipeline.
fn edge_pieces(p0: [f32; 2], p1: [f32; 2]) -> u32 {
    let extent = (p1[0] - p0[0]).abs().max((p1[1] - p0[1]).abs());
    ((extent / TILE_WIDTH.min(TILE_HEIGHT) as f32).ceil() as u32).clamp(1, MAX_EDGE_PIECES)
}

fn tile_floor(v: f32, tile: u32, limit: u32) -> u32 {
    ((v / tile as f32).floor().max(0.0) as u32).min(limit)
}

fn tile_ceil(v: f32, tile: u32, limit: u32) -> u32 {
    ((v / tile as f32).ceil().max(0.0) as u32).min(limit)
}
