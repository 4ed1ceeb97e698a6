//  Copyright 2020 The xi-editor authors.

//! Little-endian encoders for data shared with the stage programs.
//!
//! Everything here is encoded field by field, so the byte layout never
//! depends on host endianness or on struct padding.

/// Where an encoded object landed in an [`Encoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ref<T>
where
    T: ?Sized,
{
    offset: u32,
    _phantom: std::marker::PhantomData<T>,
}

#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

pub trait Encode {
    /// Size if it's a fixed-size object, otherwise 0.
    fn fixed_size() -> usize;

    /// Encoded size, for both fixed and variable sized objects.
    fn encoded_size(&self) -> usize {
        Self::fixed_size()
    }

    /// Encode into a buffer; panics if not appropriately sized.
    fn encode_to(&self, buf: &mut [u8]);

    /// Allocate a chunk and encode, returning a reference.
    fn encode(&self, encoder: &mut Encoder) -> Ref<Self> {
        let size = self.encoded_size();
        let (offset, buf) = encoder.alloc_chunk(size as u32);
        self.encode_to(buf);
        Ref::new(offset)
    }
}

/// The inverse of [`Encode`] for fixed-size objects.
pub trait Decode: Sized {
    /// Decode from the front of `buf`; `None` if it is too short.
    fn decode(buf: &[u8]) -> Option<Self>;
}

impl<T> Ref<T>
where
    T: ?Sized,
{
    fn new(offset: u32) -> Ref<T> {
        Ref {
            offset,
            _phantom: Default::default(),
        }
    }

    /// Byte offset of the object within the encoder's buffer.
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder { buf: Vec::new() }
    }

    pub fn alloc_chunk(&mut self, size: u32) -> (u32, &mut [u8]) {
        let offset = self.buf.len();
        self.buf.resize(size as usize + offset, 0);
        (offset as u32, &mut self.buf[offset..])
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// The buffer as little-endian words, zero padded to a word boundary.
    pub fn to_words(&self) -> Vec<u32> {
        self.buf
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect()
    }
}

// Only the scalars the scene streams use.

impl Encode for u8 {
    fn fixed_size() -> usize {
        1
    }

    fn encode_to(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl Encode for u32 {
    fn fixed_size() -> usize {
        4
    }

    fn encode_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl Decode for u32 {
    fn decode(buf: &[u8]) -> Option<Self> {
        let bytes = buf.get(0..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Encode for f32 {
    fn fixed_size() -> usize {
        4
    }

    fn encode_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl<T> Encode for [T; 2]
where
    T: Encode,
{
    fn fixed_size() -> usize {
        T::fixed_size() * 2
    }

    fn encode_to(&self, buf: &mut [u8]) {
        let size = T::fixed_size();
        for (i, element) in self.iter().enumerate() {
            element.encode_to(&mut buf[i * size..(i + 1) * size]);
        }
    }
}

// Elements must be fixed size.
impl<T: Encode> Encode for [T] {
    fn fixed_size() -> usize {
        0
    }

    fn encoded_size(&self) -> usize {
        self.len() * T::fixed_size()
    }

    fn encode_to(&self, buf: &mut [u8]) {
        let size = T::fixed_size();
        for (ix, val) in self.iter().enumerate() {
            val.encode_to(&mut buf[ix * size..]);
        }
    }
}
