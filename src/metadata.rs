use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::{
    axes::{AXIS_ORDER, Axis, ImageCoordinates},
    chunk_key_encoding::NdTiffChunkKeyEncoding,
    frame::PixelType,
    index::{AxisValue, COMPRESSION_NONE, NdTiffIndexEntry},
};

/// Unstructured metadata attached to a dataset or to a single image.
pub type Metadata = serde_json::Map<String, Value>;

/// Major version written into data file headers.
pub const MAJOR_VERSION: u32 = 3;
/// Marker preceding the summary metadata in a data file header.
pub const SUMMARY_MD_HEADER: u32 = 2355492;
/// Bytes before the summary metadata JSON.
pub const HEADER_PREFIX_LEN: usize = 20;

/// Summary metadata may only hold scalar values.
pub fn check_metadata_format(metadata: &Metadata) -> crate::Result<()> {
    for (key, value) in metadata {
        log::debug!("checking metadata key {key} with value {value}");
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
            Value::Array(_) | Value::Object(_) => {
                return Err(crate::Error::invalid_metadata(
                    key.clone(),
                    "values must be strings, numbers, booleans or null",
                ));
            }
        }
    }
    Ok(())
}

/// Encode the header every data file starts with.
///
/// Layout: `"II"`, `42u16`, first IFD offset, major version, summary marker,
/// summary length, then the summary JSON. All little endian.
pub fn encode_data_file_header(summary: &Metadata) -> crate::Result<Vec<u8>> {
    let summary_bytes = serde_json::to_vec(summary)?;
    let summary_len = u32::try_from(summary_bytes.len())
        .map_err(|_| crate::Error::general("summary metadata too large"))?;
    let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + summary_bytes.len());
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    // no IFD chain
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&MAJOR_VERSION.to_le_bytes());
    out.extend_from_slice(&SUMMARY_MD_HEADER.to_le_bytes());
    out.extend_from_slice(&summary_len.to_le_bytes());
    out.extend_from_slice(&summary_bytes);
    Ok(out)
}

/// Parse the fixed-size header prefix, returning the major version and
/// the length of the summary metadata that follows it.
pub fn parse_data_file_header(bytes: &[u8]) -> crate::Result<(u32, u32)> {
    if bytes.len() < HEADER_PREFIX_LEN {
        return Err(crate::Error::general("data file header is truncated"));
    }
    if &bytes[0..2] != b"II" {
        return Err(crate::Error::general(
            "data file is not little endian (missing II marker)",
        ));
    }
    let word = |offset: usize| {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };
    let major_version = word(8);
    let marker = word(12);
    if marker != SUMMARY_MD_HEADER {
        return Err(crate::Error::general(format!(
            "summary metadata marker {marker} is not {SUMMARY_MD_HEADER}"
        )));
    }
    Ok((major_version, word(16)))
}

/// Shape and addressing of a dataset, derived from its index.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    /// Extents in [AXIS_ORDER].
    pub shape: [u64; 6],
    pub pixel_type: PixelType,
    /// Index of each image's entry.
    pub images: BTreeMap<ImageCoordinates, usize>,
    /// String labels per axis, in order of first appearance.
    pub labels: BTreeMap<Axis, Vec<String>>,
}

impl DatasetLayout {
    pub fn from_entries(entries: &[NdTiffIndexEntry]) -> crate::Result<Self> {
        let first = entries
            .first()
            .ok_or_else(|| crate::Error::general("dataset contains no images"))?;
        let pixel_type = first.pixel_type;
        if pixel_type.zarr_data_type().is_none() {
            return Err(crate::Error::general(format!(
                "unsupported pixel type {pixel_type:?}"
            )));
        }
        let (height, width) = (first.image_height, first.image_width);
        if height == 0 || width == 0 {
            return Err(crate::Error::general("images have zero size"));
        }

        let mut images = BTreeMap::new();
        let mut labels: BTreeMap<Axis, Vec<String>> = BTreeMap::new();
        let mut extents = [0u64; 4];

        for (i, entry) in entries.iter().enumerate() {
            if entry.pixel_compression != COMPRESSION_NONE
                || entry.metadata_compression != COMPRESSION_NONE
            {
                return Err(crate::Error::general(format!(
                    "compressed entry in {} is not supported",
                    entry.filename
                )));
            }
            if (entry.image_height, entry.image_width) != (height, width)
                || !entry.pixel_type.same_storage(pixel_type)
            {
                return Err(crate::Error::general(format!(
                    "image {i} is {}x{} {:?}, expected {height}x{width} {pixel_type:?}",
                    entry.image_height, entry.image_width, entry.pixel_type
                )));
            }

            let mut coordinates = ImageCoordinates::default();
            for (name, value) in &entry.axes {
                let axis = Axis::from_name(name)
                    .filter(|a| coordinates.get(*a).is_some())
                    .ok_or_else(|| crate::Error::general(format!("unsupported axis {name:?}")))?;
                let idx = match value {
                    AxisValue::Index(n) => *n,
                    AxisValue::Label(s) => {
                        let known = labels.entry(axis).or_default();
                        match known.iter().position(|k| k == s) {
                            Some(p) => p as u64,
                            None => {
                                known.push(s.clone());
                                known.len() as u64 - 1
                            }
                        }
                    }
                };
                coordinates.set(axis, idx);
            }

            for (extent, axis) in extents.iter_mut().zip(AXIS_ORDER) {
                if let Some(v) = coordinates.get(axis) {
                    *extent = (*extent).max(v + 1);
                }
            }
            if images.insert(coordinates, i).is_some() {
                return Err(crate::Error::general(format!(
                    "duplicate image at {coordinates}"
                )));
            }
        }

        let shape = [
            extents[0],
            extents[1],
            extents[2],
            extents[3],
            height as u64,
            width as u64,
        ];
        Ok(Self {
            shape,
            pixel_type,
            images,
            labels,
        })
    }

    pub fn chunk_shape(&self) -> [u64; 6] {
        [1, 1, 1, 1, self.shape[4], self.shape[5]]
    }

    /// Synthesize Zarr V3 array metadata for this layout.
    pub fn to_zarr_metadata(&self, attributes: &Metadata) -> crate::Result<Value> {
        let data_type = self.pixel_type.zarr_data_type().ok_or_else(|| {
            crate::Error::general(format!("unsupported pixel type {:?}", self.pixel_type))
        })?;
        let bytes_codec = if self.pixel_type.bytes_per_pixel() == 1 {
            json!({ "name": "bytes" })
        } else {
            json!({ "name": "bytes", "configuration": { "endian": "little" } })
        };
        let dimension_names: Vec<_> = AXIS_ORDER.iter().map(Axis::name).collect();
        Ok(json!({
            "zarr_format": 3,
            "node_type": "array",
            "shape": self.shape,
            "data_type": data_type,
            "chunk_grid": {
                "name": "regular",
                "configuration": { "chunk_shape": self.chunk_shape() },
            },
            "chunk_key_encoding": { "name": NdTiffChunkKeyEncoding::NAME },
            "fill_value": 0,
            "codecs": [bytes_codec],
            "attributes": attributes,
            "dimension_names": dimension_names,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(axes: &[(&str, AxisValue)]) -> NdTiffIndexEntry {
        NdTiffIndexEntry {
            axes: axes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            filename: "f.tif".into(),
            pixel_offset: 0,
            image_width: 3,
            image_height: 2,
            pixel_type: PixelType::Gray16,
            pixel_compression: 0,
            metadata_offset: 0,
            metadata_length: 0,
            metadata_compression: 0,
        }
    }

    #[test]
    fn nested_summary_values_are_rejected() {
        let mut md = Metadata::new();
        md.insert("Exposure".into(), json!(10.5));
        assert!(check_metadata_format(&md).is_ok());
        md.insert("ChNames".into(), json!(["DAPI"]));
        assert!(matches!(
            check_metadata_format(&md),
            Err(crate::Error::InvalidMetadata { key, .. }) if key == "ChNames"
        ));
    }

    #[test]
    fn header_prefix() {
        let mut md = Metadata::new();
        md.insert("a".into(), json!(1));
        let bytes = encode_data_file_header(&md).unwrap();
        let (version, len) = parse_data_file_header(&bytes).unwrap();
        assert_eq!(version, MAJOR_VERSION);
        assert_eq!(&bytes[HEADER_PREFIX_LEN..], br#"{"a":1}"#);
        assert_eq!(len as usize, bytes.len() - HEADER_PREFIX_LEN);

        let mut bad = bytes.clone();
        bad[12] ^= 1;
        assert!(parse_data_file_header(&bad).is_err());
    }

    #[test]
    fn layout_from_labelled_channels() {
        let entries = [
            entry(&[("channel", "GFP".into()), ("time", 0.into())]),
            entry(&[("channel", "RFP".into()), ("time", 0.into())]),
            entry(&[("channel", "GFP".into()), ("time", 4.into()), ("z", 1.into())]),
        ];
        let layout = DatasetLayout::from_entries(&entries).unwrap();
        assert_eq!(layout.shape, [1, 5, 2, 2, 2, 3]);
        assert_eq!(layout.labels[&Axis::Channel], vec!["GFP", "RFP"]);
        assert_eq!(
            layout.images[&ImageCoordinates::new(0, 4, 0, 1)],
            2,
        );

        let md = layout.to_zarr_metadata(&Metadata::new()).unwrap();
        assert_eq!(md["data_type"], "uint16");
        assert_eq!(md["chunk_grid"]["configuration"]["chunk_shape"], json!([1, 1, 1, 1, 2, 3]));
        assert_eq!(md["chunk_key_encoding"]["name"], "imutils.ndtiff");
    }

    #[test]
    fn layout_rejects_duplicates_and_unknown_axes() {
        let e = entry(&[("z", 0.into())]);
        assert!(DatasetLayout::from_entries(&[e.clone(), e]).is_err());
        assert!(DatasetLayout::from_entries(&[entry(&[("row", 0.into())])]).is_err());
        assert!(DatasetLayout::from_entries(&[]).is_err());
    }
}
