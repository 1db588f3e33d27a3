use std::fmt;

/// Rectangular extent of a node's result plus plane/image counts and the byte
/// width of a single item.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub planes: u16,
    pub images: u16,
    pub item_size: u16,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32, planes: u16, images: u16, item_size: u16) -> Self {
        Self {
            width,
            height,
            planes,
            images,
            item_size,
        }
    }

    /// A single item of `item_size` bytes.
    pub const fn scalar(item_size: u16) -> Self {
        Self::new(1, 1, 1, 1, item_size)
    }

    /// A single-plane, single-image `width` x `height` grid.
    pub const fn grid(width: u32, height: u32, item_size: u16) -> Self {
        Self::new(width, height, 1, 1, item_size)
    }

    pub fn item_count(&self) -> usize {
        self.width as usize * self.height as usize * self.planes as usize * self.images as usize
    }

    pub fn byte_len(&self) -> usize {
        self.item_count() * self.item_size as usize
    }

    /// Fixed little-endian encoding used when hashing.
    pub fn to_bytes(&self) -> [u8; 14] {
        let mut out = [0u8; 14];
        out[0..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..10].copy_from_slice(&self.planes.to_le_bytes());
        out[10..12].copy_from_slice(&self.images.to_le_bytes());
        out[12..14].copy_from_slice(&self.item_size.to_le_bytes());
        out
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}@{}",
            self.width, self.height, self.planes, self.images, self.item_size
        )
    }
}
