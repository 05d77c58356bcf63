//! Binary codec for `NDTiff.index` files.
//!
//! The index is a flat sequence of little-endian entries, one per image,
//! appended as images are written.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::axes::{Axis, ImageCoordinates};
use crate::frame::PixelType;

pub const INDEX_FILE_NAME: &str = "NDTiff.index";

/// Only uncompressed pixels and metadata are supported.
pub const COMPRESSION_NONE: u32 = 0;

/// Value of one axis in an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Index(u64),
    /// Labelled axes, typically channel names.
    Label(String),
}

impl From<u64> for AxisValue {
    fn from(value: u64) -> Self {
        Self::Index(value)
    }
}

impl From<&str> for AxisValue {
    fn from(value: &str) -> Self {
        Self::Label(value.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NdTiffIndexEntry {
    pub axes: BTreeMap<String, AxisValue>,
    /// Data file name, relative to the dataset directory.
    pub filename: String,
    pub pixel_offset: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub pixel_type: PixelType,
    pub pixel_compression: u32,
    pub metadata_offset: u32,
    pub metadata_length: u32,
    pub metadata_compression: u32,
}

enum ParseError {
    Truncated,
    Invalid(crate::Error),
}

impl From<crate::Error> for ParseError {
    fn from(value: crate::Error) -> Self {
        Self::Invalid(value)
    }
}

fn read_u32(bytes: &[u8], offset: &mut usize) -> Result<u32, ParseError> {
    let end = *offset + size_of::<u32>();
    let b = bytes.get(*offset..end).ok_or(ParseError::Truncated)?;
    *offset = end;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_str<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<&'a str, ParseError> {
    let len = read_u32(bytes, offset)? as usize;
    let end = *offset + len;
    let b = bytes.get(*offset..end).ok_or(ParseError::Truncated)?;
    *offset = end;
    std::str::from_utf8(b).map_err(|e| ParseError::Invalid(crate::Error::wrap(e)))
}

fn write_str(out: &mut Vec<u8>, s: &str) -> crate::Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| crate::Error::general("index string longer than u32::MAX"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

impl NdTiffIndexEntry {
    /// Parse one entry from the start of `bytes`.
    ///
    /// Returns the entry and the number of bytes it occupied.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<(Self, usize)> {
        match Self::parse(bytes) {
            Ok(parsed) => Ok(parsed),
            Err(ParseError::Truncated) => Err(crate::Error::general("truncated index entry")),
            Err(ParseError::Invalid(e)) => Err(e),
        }
    }

    fn parse(bytes: &[u8]) -> Result<(Self, usize), ParseError> {
        let mut offset: usize = 0;

        let axes: BTreeMap<String, AxisValue> =
            serde_json::from_str(read_str(bytes, &mut offset)?).map_err(crate::Error::from)?;
        let filename = read_str(bytes, &mut offset)?.to_owned();

        let pixel_offset = read_u32(bytes, &mut offset)?;
        let image_width = read_u32(bytes, &mut offset)?;
        let image_height = read_u32(bytes, &mut offset)?;
        let pixel_type = PixelType::from_code(read_u32(bytes, &mut offset)?)
            .map_err(ParseError::Invalid)?;
        let pixel_compression = read_u32(bytes, &mut offset)?;
        let metadata_offset = read_u32(bytes, &mut offset)?;
        let metadata_length = read_u32(bytes, &mut offset)?;
        let metadata_compression = read_u32(bytes, &mut offset)?;

        let entry = Self {
            axes,
            filename,
            pixel_offset,
            image_width,
            image_height,
            pixel_type,
            pixel_compression,
            metadata_offset,
            metadata_length,
            metadata_compression,
        };
        Ok((entry, offset))
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut out = Vec::new();
        write_str(&mut out, &serde_json::to_string(&self.axes)?)?;
        write_str(&mut out, &self.filename)?;
        for n in [
            self.pixel_offset,
            self.image_width,
            self.image_height,
            self.pixel_type.code(),
            self.pixel_compression,
            self.metadata_offset,
            self.metadata_length,
            self.metadata_compression,
        ] {
            out.extend_from_slice(&n.to_le_bytes());
        }
        Ok(out)
    }

    /// Number of pixel bytes this entry points at.
    pub fn pixel_length(&self) -> u64 {
        self.image_width as u64
            * self.image_height as u64
            * self.pixel_type.bytes_per_pixel() as u64
    }

    /// Axes with integer values written by [crate::writer::MicroscopeDataWriter].
    pub fn axes_for(coordinates: &ImageCoordinates) -> BTreeMap<String, AxisValue> {
        [Axis::Position, Axis::Time, Axis::Channel, Axis::Z]
            .into_iter()
            .filter_map(|a| Some((a.name().to_owned(), coordinates.get(a)?.into())))
            .collect()
    }
}

/// Parse a whole index file.
///
/// A truncated trailing entry is ignored: it belongs to an image that is
/// still being written.
pub fn parse_index(bytes: &[u8]) -> crate::Result<Vec<NdTiffIndexEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        match NdTiffIndexEntry::parse(&bytes[offset..]) {
            Ok((entry, used)) => {
                entries.push(entry);
                offset += used;
            }
            Err(ParseError::Truncated) => {
                log::warn!(
                    "ignoring {} trailing bytes of incomplete index entry",
                    bytes.len() - offset
                );
                break;
            }
            Err(ParseError::Invalid(e)) => return Err(e),
        }
    }
    Ok(entries)
}
