use crate::encoder::{Decode, Encode};

/// Size in bytes of the encoded [`Config`].
pub const CONFIG_SIZE: usize = 60;

const CONFIG_FIELDS: usize = CONFIG_SIZE / 4;

/// Per-frame parameters shared by every stage program.
///
/// The field order is the wire order: each stage program declares the same
/// fifteen `u32` fields in this sequence, so reordering anything here is a
/// breaking change for all of them. Offsets are in words into the scene
/// buffer. Nothing is validated; out-of-range values are the caller's
/// responsibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub width_in_tiles: u32,
    pub height_in_tiles: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub n_drawobj: u32,
    pub n_path: u32,
    pub n_clip: u32,
    pub path_tag_base: u32,
    pub path_data_base: u32,
    pub draw_tag_base: u32,
    pub draw_data_base: u32,
    pub transform_base: u32,
    pub style_base: u32,
    pub n_lines: u32,
    /// Background colour, `0xRRGGBBAA`.
    pub base_color: u32,
}

impl Config {
    fn fields(&self) -> [u32; CONFIG_FIELDS] {
        [
            self.width_in_tiles,
            self.height_in_tiles,
            self.target_width,
            self.target_height,
            self.n_drawobj,
            self.n_path,
            self.n_clip,
            self.path_tag_base,
            self.path_data_base,
            self.draw_tag_base,
            self.draw_data_base,
            self.transform_base,
            self.style_base,
            self.n_lines,
            self.base_color,
        ]
    }

    fn from_fields(f: [u32; CONFIG_FIELDS]) -> Config {
        Config {
            width_in_tiles: f[0],
            height_in_tiles: f[1],
            target_width: f[2],
            target_height: f[3],
            n_drawobj: f[4],
            n_path: f[5],
            n_clip: f[6],
            path_tag_base: f[7],
            path_data_base: f[8],
            draw_tag_base: f[9],
            draw_data_base: f[10],
            transform_base: f[11],
            style_base: f[12],
            n_lines: f[13],
            base_color: f[14],
        }
    }

    /// The 60-byte little-endian wire form.
    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut buf = [0u8; CONFIG_SIZE];
        self.encode_to(&mut buf);
        buf
    }

    /// Number of path tag words, the element count of the path tag stages.
    pub fn n_path_tag_words(&self) -> u32 {
        self.draw_tag_base.saturating_sub(self.path_tag_base)
    }

    /// Number of tiles in the global render-target grid.
    pub fn n_tiles(&self) -> u32 {
        self.width_in_tiles.saturating_mul(self.height_in_tiles)
    }
}

impl Encode for Config {
    fn fixed_size() -> usize {
        CONFIG_SIZE
    }

    fn encode_to(&self, buf: &mut [u8]) {
        for (ix, field) in self.fields().iter().enumerate() {
            field.encode_to(&mut buf[ix * 4..ix * 4 + 4]);
        }
    }
}

impl Decode for Config {
    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < CONFIG_SIZE {
            return None;
        }
        let mut fields = [0u32; CONFIG_FIELDS];
        for (ix, field) in fields.iter_mut().enumerate() {
            *field = u32::decode(&buf[ix * 4..])?;
        }
        Some(Config::from_fields(fields))
    }
}
