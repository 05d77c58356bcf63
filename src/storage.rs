use bytes::Bytes;
use zarrs::storage::{
    ListableStorageTraits, MaybeBytes, MaybeBytesIterator, ReadableStorageTraits, StorageError,
    StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
    byte_range::{ByteRange, ByteRangeIterator},
};

use crate::{
    axes::{Axis, ImageCoordinates},
    chunk_key_encoding::decode_chunk_key,
    index::{INDEX_FILE_NAME, NdTiffIndexEntry, parse_index},
    metadata::{DatasetLayout, HEADER_PREFIX_LEN, Metadata, parse_data_file_header},
};

#[cfg(feature = "async")]
mod asynch;

/// Presents an NDTiff dataset directory as a single Zarr V3 array.
///
/// Requests for `zarr.json` are answered with metadata synthesized from the
/// index, and frame chunk keys are served from byte ranges of the data files.
/// Everything else is passed through to the inner store.
pub struct NdTiffStore<R> {
    inner: R,
    entries: Vec<NdTiffIndexEntry>,
    layout: DatasetLayout,
    summary_metadata: Metadata,
    zarr_json: Bytes,
}

/// How a request against the adapter is served.
enum Route {
    ZarrJson,
    Frame(StoreKey, ByteRange),
    /// A frame key inside the array bounds with no image on disk.
    Absent,
    PassThrough,
}

fn store_key(s: &str) -> crate::Result<StoreKey> {
    StoreKey::new(s).map_err(crate::Error::wrap)
}

fn header_range() -> ByteRange {
    ByteRange::FromStart(0, Some(HEADER_PREFIX_LEN as u64))
}

fn summary_range(summary_len: u32) -> ByteRange {
    ByteRange::FromStart(HEADER_PREFIX_LEN as u64, Some(summary_len as u64))
}

fn metadata_range(entry: &NdTiffIndexEntry) -> ByteRange {
    ByteRange::FromStart(
        entry.metadata_offset as u64,
        Some(entry.metadata_length as u64),
    )
}

fn parse_metadata_object(bytes: &[u8]) -> crate::Result<Metadata> {
    if bytes.is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_slice(bytes)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(crate::Error::general(format!(
            "expected metadata object, found {other}"
        ))),
    }
}

fn missing(key: &StoreKey) -> crate::Error {
    crate::Error::general(format!("dataset file {} is missing", key.as_str()))
}

impl<R> NdTiffStore<R> {
    fn assemble(
        inner: R,
        entries: Vec<NdTiffIndexEntry>,
        layout: DatasetLayout,
        summary_metadata: Metadata,
    ) -> crate::Result<Self> {
        let zarr = layout.to_zarr_metadata(&summary_metadata)?;
        let zarr_json = Bytes::from(serde_json::to_vec(&zarr)?);
        log::debug!(
            "opened NDTiff dataset with {} images, shape {:?}",
            entries.len(),
            layout.shape
        );
        Ok(Self {
            inner,
            entries,
            layout,
            summary_metadata,
            zarr_json,
        })
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn entries(&self) -> &[NdTiffIndexEntry] {
        &self.entries
    }

    pub fn summary_metadata(&self) -> &Metadata {
        &self.summary_metadata
    }

    /// Index entry of the image at `coordinates`, if one was written.
    pub fn entry(&self, coordinates: &ImageCoordinates) -> Option<&NdTiffIndexEntry> {
        self.layout
            .images
            .get(coordinates)
            .and_then(|&i| self.entries.get(i))
    }

    /// Channel labels, or `Ch0`, `Ch1`, ... for datasets with integer channels.
    pub fn channel_names(&self) -> Vec<String> {
        match self.layout.labels.get(&Axis::Channel) {
            Some(names) => names.clone(),
            None => (0..self.layout.shape[2]).map(|c| format!("Ch{c}")).collect(),
        }
    }

    fn route(&self, key: &StoreKey) -> Route {
        let s = key.as_str();
        if s == "zarr.json" {
            return Route::ZarrJson;
        }
        let Some(coordinates) = decode_chunk_key(s) else {
            return Route::PassThrough;
        };
        match self.entry(&coordinates) {
            Some(entry) => match StoreKey::new(entry.filename.as_str()) {
                Ok(k) => Route::Frame(
                    k,
                    ByteRange::FromStart(entry.pixel_offset as u64, Some(entry.pixel_length())),
                ),
                Err(_) => Route::Absent,
            },
            None => Route::Absent,
        }
    }
}

impl<R: ReadableStorageTraits> NdTiffStore<R> {
    /// Read the index and summary metadata of the dataset rooted at `inner`.
    pub fn open(inner: R) -> crate::Result<Self> {
        let index_key = store_key(INDEX_FILE_NAME)?;
        let index = inner
            .get(&index_key)?
            .ok_or_else(|| missing(&index_key))?;
        let entries = parse_index(&index)?;
        let layout = DatasetLayout::from_entries(&entries)?;

        let data_key = store_key(&entries[0].filename)?;
        let prefix = inner
            .get_partial(&data_key, header_range())?
            .ok_or_else(|| missing(&data_key))?;
        let (major_version, summary_len) = parse_data_file_header(&prefix)?;
        log::debug!(
            "data file {} has major version {major_version}",
            data_key.as_str()
        );
        let summary = inner
            .get_partial(&data_key, summary_range(summary_len))?
            .ok_or_else(|| missing(&data_key))?;
        let summary_metadata = parse_metadata_object(&summary)?;

        Self::assemble(inner, entries, layout, summary_metadata)
    }

    /// Metadata stored alongside the image at `coordinates`.
    pub fn image_metadata(&self, coordinates: &ImageCoordinates) -> crate::Result<Metadata> {
        let entry = self
            .entry(coordinates)
            .ok_or(crate::Error::ImageNotFound(*coordinates))?;
        if entry.metadata_length == 0 {
            return Ok(Metadata::new());
        }
        let key = store_key(&entry.filename)?;
        let bytes = self
            .inner
            .get_partial(&key, metadata_range(entry))?
            .ok_or_else(|| missing(&key))?;
        parse_metadata_object(&bytes)
    }
}

impl<R: ReadableStorageTraits> ReadableStorageTraits for NdTiffStore<R> {
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.route(key) {
            Route::ZarrJson => Ok(Some(self.zarr_json.len() as u64)),
            Route::Frame(_, ByteRange::FromStart(_, len)) => Ok(len),
            Route::Frame(k, _) => self.inner.size_key(&k),
            Route::Absent => Ok(None),
            Route::PassThrough => self.inner.size_key(key),
        }
    }

    fn supports_get_partial(&self) -> bool {
        false
    }

    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        match self.route(key) {
            Route::ZarrJson => Ok(Some(self.zarr_json.clone())),
            Route::Frame(k, range) => match self.inner.get_partial(&k, range)? {
                Some(b) => Ok(Some(b)),
                None => Err(StorageError::Other(format!(
                    "data file {} is missing for chunk {}",
                    k.as_str(),
                    key.as_str()
                ))),
            },
            Route::Absent => Ok(None),
            Route::PassThrough => self.inner.get(key),
        }
    }

    fn get_partial_many<'a>(
        &'a self,
        _key: &StoreKey,
        _byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial_many not supported".into(),
        ))
    }

    fn get_partial(
        &self,
        _key: &StoreKey,
        _byte_range: ByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial not supported".into(),
        ))
    }
}

impl<R: ListableStorageTraits> ListableStorageTraits for NdTiffStore<R> {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix)
    }

    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        self.inner.size_prefix(prefix)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::Frame,
        writer::{MicroscopeDataWriter, WriterOptions},
    };
    use zarrs::filesystem::FilesystemStore;

    fn dataset() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MicroscopeDataWriter::create(
            dir.path(),
            "store",
            WriterOptions::default().add_date_time(false),
        )
        .unwrap();
        let frame = Frame::new_u16(2, 2, vec![1, 2, 3, 4]).unwrap();
        writer
            .put_image(&frame, ImageCoordinates::default().time(1), Default::default())
            .unwrap();
        let path = writer.dataset_path().to_path_buf();
        writer.close().unwrap();
        (dir, path)
    }

    #[test]
    fn routes_zarr_json_frames_and_other_keys() {
        let (_dir, path) = dataset();
        let store = NdTiffStore::open(FilesystemStore::new(&path).unwrap()).unwrap();

        let md = store.get(&StoreKey::new("zarr.json").unwrap()).unwrap().unwrap();
        let md: serde_json::Value = serde_json::from_slice(&md).unwrap();
        assert_eq!(md["shape"], serde_json::json!([1, 2, 1, 1, 2, 2]));

        let frame = store.get(&StoreKey::new("0/1/0/0").unwrap()).unwrap().unwrap();
        assert_eq!(&frame[..], &[1u8, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(store.size_key(&StoreKey::new("0/1/0/0").unwrap()).unwrap(), Some(8));

        assert!(store.get(&StoreKey::new("0/0/0/0").unwrap()).unwrap().is_none());
        assert!(store.get(&StoreKey::new(INDEX_FILE_NAME).unwrap()).unwrap().is_some());
        assert_eq!(store.channel_names(), vec!["Ch0"]);
    }
}
