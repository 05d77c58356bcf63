use serde::{Deserialize, Serialize};

/// Pixel type numbering used in NDTiff index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelType {
    Gray8 = 0,
    Gray16 = 1,
    Rgb8 = 2,
    Gray10 = 3,
    Gray12 = 4,
    Gray14 = 5,
    Gray11 = 6,
}

impl PixelType {
    pub fn from_code(code: u32) -> crate::Result<Self> {
        let t = match code {
            0 => PixelType::Gray8,
            1 => PixelType::Gray16,
            2 => PixelType::Rgb8,
            3 => PixelType::Gray10,
            4 => PixelType::Gray12,
            5 => PixelType::Gray14,
            6 => PixelType::Gray11,
            n => return Err(crate::Error::general(format!("invalid pixel type {n}"))),
        };
        Ok(t)
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Rgb8 => 4,
            _ => 2,
        }
    }

    /// Zarr data type name, if this pixel type maps onto a scalar array.
    pub fn zarr_data_type(&self) -> Option<&'static str> {
        match self {
            PixelType::Gray8 => Some("uint8"),
            PixelType::Rgb8 => None,
            _ => Some("uint16"),
        }
    }

    /// Whether frames of both types share a storage representation.
    pub(crate) fn same_storage(&self, other: PixelType) -> bool {
        self.bytes_per_pixel() == other.bytes_per_pixel()
            && self.zarr_data_type() == other.zarr_data_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Pixels {
    pub fn len(&self) -> usize {
        match self {
            Pixels::U8(v) => v.len(),
            Pixels::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single y,x image in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    height: u32,
    width: u32,
    pixel_type: PixelType,
    pixels: Pixels,
}

impl Frame {
    pub fn new_u8(height: u32, width: u32, pixels: Vec<u8>) -> crate::Result<Self> {
        Self::new(height, width, PixelType::Gray8, Pixels::U8(pixels))
    }

    pub fn new_u16(height: u32, width: u32, pixels: Vec<u16>) -> crate::Result<Self> {
        Self::new(height, width, PixelType::Gray16, Pixels::U16(pixels))
    }

    /// Build a frame, checking that the pixel buffer matches the shape and type.
    pub fn new(
        height: u32,
        width: u32,
        pixel_type: PixelType,
        pixels: Pixels,
    ) -> crate::Result<Self> {
        let expected = height as usize * width as usize;
        if pixels.len() != expected {
            return Err(crate::Error::general(format!(
                "frame of {height}x{width} needs {expected} pixels, got {}",
                pixels.len()
            )));
        }
        if !matches!(
            (&pixels, pixel_type.bytes_per_pixel()),
            (Pixels::U8(_), 1) | (Pixels::U16(_), 2)
        ) {
            return Err(crate::Error::general(format!(
                "pixel buffer does not match pixel type {pixel_type:?}"
            )));
        }
        Ok(Self {
            height,
            width,
            pixel_type,
            pixels,
        })
    }

    /// Decode little-endian pixel bytes as stored in NDTiff data files.
    pub fn from_le_bytes(
        height: u32,
        width: u32,
        pixel_type: PixelType,
        bytes: &[u8],
    ) -> crate::Result<Self> {
        let pixels = match pixel_type.bytes_per_pixel() {
            1 => Pixels::U8(bytes.to_vec()),
            2 => {
                if bytes.len() % 2 != 0 {
                    return Err(crate::Error::general("odd byte count for 16 bit frame"));
                }
                Pixels::U16(
                    bytes
                        .chunks_exact(2)
                        .map(|b| u16::from_le_bytes([b[0], b[1]]))
                        .collect(),
                )
            }
            _ => {
                return Err(crate::Error::general(format!(
                    "unsupported pixel type {pixel_type:?}"
                )));
            }
        };
        Self::new(height, width, pixel_type, pixels)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.pixels {
            Pixels::U8(v) => v.clone(),
            Pixels::U16(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn shape(&self) -> [u32; 2] {
        [self.height, self.width]
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    pub fn into_pixels(self) -> Pixels {
        self.pixels
    }

    /// Pixel value at (y, x), widened to `u16`.
    pub fn get(&self, y: u32, x: u32) -> Option<u16> {
        if y >= self.height || x >= self.width {
            return None;
        }
        let i = y as usize * self.width as usize + x as usize;
        match &self.pixels {
            Pixels::U8(v) => v.get(i).map(|&p| p as u16),
            Pixels::U16(v) => v.get(i).copied(),
        }
    }
}
