use zarrs::{
    array::{
        ChunkKeyEncoding, ChunkKeyEncodingTraits,
        chunk_key_encoding::{self as cke, api::ChunkKeyEncodingPlugin},
    },
    plugin::PluginConfigurationInvalidError,
};

use crate::axes::ImageCoordinates;

/// Chunk keys addressing one frame as `position/time/channel/z`.
///
/// Chunks span whole frames, so the y and x chunk indices are always zero
/// and are left out of the key.
#[derive(Debug, Clone, Copy)]
pub struct NdTiffChunkKeyEncoding;

impl NdTiffChunkKeyEncoding {
    pub const NAME: &'static str = "imutils.ndtiff";
}

zarrs::plugin::impl_extension_aliases!(NdTiffChunkKeyEncoding, v3: "imutils.ndtiff", ["imutils.ndtiff", "ndtiff"]);
inventory::submit! {
    ChunkKeyEncodingPlugin::new::<NdTiffChunkKeyEncoding>()
}

impl ChunkKeyEncodingTraits for NdTiffChunkKeyEncoding {
    fn create(
        metadata: &zarrs::metadata::v3::MetadataV3,
    ) -> Result<cke::api::ChunkKeyEncoding, zarrs::plugin::PluginCreateError>
    where
        Self: Sized,
    {
        let cke = match metadata.name() {
            "imutils.ndtiff" | "ndtiff" => ChunkKeyEncoding::new(Self),
            _ => {
                return Err(zarrs::plugin::PluginCreateError::NameInvalid {
                    name: metadata.name().into(),
                });
            }
        };
        if !metadata.configuration_is_none_or_empty() {
            return Err(zarrs::plugin::PluginCreateError::ConfigurationInvalid(
                PluginConfigurationInvalidError::new(
                    "NDTiff chunk key encoding does not support configuration".into(),
                ),
            ));
        }
        Ok(cke)
    }

    fn configuration(&self) -> zarrs::metadata::Configuration {
        Default::default()
    }

    fn encode(&self, chunk_grid_indices: &[u64]) -> zarrs::storage::StoreKey {
        zarrs::storage::StoreKey::new(encode_frame_key(chunk_grid_indices))
            .expect("chunk key should be valid")
    }
}

fn encode_frame_key(chunk_grid_indices: &[u64]) -> String {
    chunk_grid_indices
        .iter()
        .take(4)
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of the encoding; `None` if `key` is not a frame key.
pub fn decode_chunk_key(key: &str) -> Option<ImageCoordinates> {
    let mut parts = key.split('/').map(|p| p.parse::<u64>().ok());
    let coordinates = ImageCoordinates::new(
        parts.next()??,
        parts.next()??,
        parts.next()??,
        parts.next()??,
    );
    if parts.next().is_some() {
        return None;
    }
    Some(coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_keys() {
        let c = ImageCoordinates::new(2, 10, 1, 7);
        let key = NdTiffChunkKeyEncoding.encode(&c.chunk_indices());
        assert_eq!(key.as_str(), "2/10/1/7");
        assert_eq!(decode_chunk_key(key.as_str()), Some(c));
    }

    #[test]
    fn other_keys_are_not_frames() {
        assert_eq!(decode_chunk_key("zarr.json"), None);
        assert_eq!(decode_chunk_key("NDTiff.index"), None);
        assert_eq!(decode_chunk_key("0/0/0"), None);
        assert_eq!(decode_chunk_key("0/0/0/0/0"), None);
        assert_eq!(decode_chunk_key("0/0/x/0"), None);
    }
}
