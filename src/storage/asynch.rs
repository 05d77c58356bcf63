use zarrs::storage::{
    AsyncListableStorageTraits, AsyncMaybeBytesIterator, AsyncReadableStorageTraits, MaybeBytes,
    StorageError, StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
    byte_range::{ByteRange, ByteRangeIterator},
};

use super::{
    NdTiffStore, Route, header_range, metadata_range, missing, parse_metadata_object, store_key,
    summary_range,
};
use crate::{
    axes::ImageCoordinates,
    index::{INDEX_FILE_NAME, parse_index},
    metadata::{DatasetLayout, Metadata, parse_data_file_header},
};

impl<R: AsyncReadableStorageTraits> NdTiffStore<R> {
    /// Async counterpart of [NdTiffStore::open].
    pub async fn open_async(inner: R) -> crate::Result<Self> {
        let index_key = store_key(INDEX_FILE_NAME)?;
        let index = inner
            .get(&index_key)
            .await?
            .ok_or_else(|| missing(&index_key))?;
        let entries = parse_index(&index)?;
        let layout = DatasetLayout::from_entries(&entries)?;

        let data_key = store_key(&entries[0].filename)?;
        let prefix = inner
            .get_partial(&data_key, header_range())
            .await?
            .ok_or_else(|| missing(&data_key))?;
        let (_, summary_len) = parse_data_file_header(&prefix)?;
        let summary = inner
            .get_partial(&data_key, summary_range(summary_len))
            .await?
            .ok_or_else(|| missing(&data_key))?;
        let summary_metadata = parse_metadata_object(&summary)?;

        Self::assemble(inner, entries, layout, summary_metadata)
    }

    pub async fn image_metadata_async(
        &self,
        coordinates: &ImageCoordinates,
    ) -> crate::Result<Metadata> {
        let entry = self
            .entry(coordinates)
            .ok_or(crate::Error::ImageNotFound(*coordinates))?;
        if entry.metadata_length == 0 {
            return Ok(Metadata::new());
        }
        let key = store_key(&entry.filename)?;
        let bytes = self
            .inner
            .get_partial(&key, metadata_range(entry))
            .await?
            .ok_or_else(|| missing(&key))?;
        parse_metadata_object(&bytes)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<R: AsyncReadableStorageTraits> AsyncReadableStorageTraits for NdTiffStore<R> {
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        match self.route(key) {
            Route::ZarrJson => Ok(Some(self.zarr_json.clone())),
            Route::Frame(k, range) => match self.inner.get_partial(&k, range).await? {
                Some(b) => Ok(Some(b)),
                None => Err(StorageError::Other(format!(
                    "data file {} is missing for chunk {}",
                    k.as_str(),
                    key.as_str()
                ))),
            },
            Route::Absent => Ok(None),
            Route::PassThrough => self.inner.get(key).await,
        }
    }

    async fn get_partial(
        &self,
        _key: &StoreKey,
        _byte_range: ByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial not supported".into(),
        ))
    }

    async fn get_partial_many<'a>(
        &'a self,
        _key: &StoreKey,
        _byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<AsyncMaybeBytesIterator<'a>, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial_many not supported".into(),
        ))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.route(key) {
            Route::ZarrJson => Ok(Some(self.zarr_json.len() as u64)),
            Route::Frame(_, ByteRange::FromStart(_, len)) => Ok(len),
            Route::Frame(k, _) => self.inner.size_key(&k).await,
            Route::Absent => Ok(None),
            Route::PassThrough => self.inner.size_key(key).await,
        }
    }

    fn supports_get_partial(&self) -> bool {
        false
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<R: AsyncListableStorageTraits> AsyncListableStorageTraits for NdTiffStore<R> {
    async fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list().await
    }

    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix).await
    }

    async fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix).await
    }

    async fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        self.inner.size_prefix(prefix).await
    }

    async fn size(&self) -> Result<u64, StorageError> {
        self.inner.size().await
    }
}
