//! Read access to NDTiff-style datasets through a lazily loaded array.
use std::{
    path::{Path, PathBuf},
    process::Child,
    sync::Arc,
};

use zarrs::{array::Array, filesystem::FilesystemStore};

use crate::{
    axes::{AXIS_ORDER, Axis, ImageCoordinates, axis_string},
    frame::{Frame, PixelType, Pixels},
    metadata::Metadata,
    storage::NdTiffStore,
    viewer::ViewerCommand,
};

pub type DatasetStore = NdTiffStore<FilesystemStore>;

/// A dataset opened for reading.
///
/// Frames are only read from disk when requested. Positions in the array
/// without an image read as zeros.
pub struct MicroscopeDataReader {
    path: PathBuf,
    store: Arc<DatasetStore>,
    array: Array<DatasetStore>,
}

impl MicroscopeDataReader {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = FilesystemStore::new(&path).map_err(crate::Error::wrap)?;
        let store = Arc::new(NdTiffStore::open(inner)?);
        let array = Array::open(store.clone(), "/").map_err(crate::Error::wrap)?;
        log::info!(
            "opened dataset {} with axes {} and shape {:?}",
            path.display(),
            axis_string(&AXIS_ORDER),
            array.shape()
        );
        Ok(Self { path, store, array })
    }

    /// The lazily loaded `zarrs` array over the whole dataset.
    pub fn lazy_array(&self) -> &Array<DatasetStore> {
        &self.array
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn axis_order(&self) -> &'static [Axis] {
        &AXIS_ORDER
    }

    pub fn axis_names(&self) -> Vec<&'static str> {
        AXIS_ORDER.iter().map(Axis::name).collect()
    }

    pub fn axis_string(&self) -> String {
        axis_string(&AXIS_ORDER)
    }

    pub fn shape(&self) -> [u64; 6] {
        self.store.layout().shape
    }

    pub fn number_of_positions(&self) -> u64 {
        self.shape()[0]
    }

    pub fn number_of_timepoints(&self) -> u64 {
        self.shape()[1]
    }

    pub fn number_of_channels(&self) -> u64 {
        self.shape()[2]
    }

    pub fn number_of_z_slices(&self) -> u64 {
        self.shape()[3]
    }

    pub fn image_height(&self) -> u64 {
        self.shape()[4]
    }

    pub fn image_width(&self) -> u64 {
        self.shape()[5]
    }

    pub fn pixel_type(&self) -> PixelType {
        self.store.layout().pixel_type
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.store.channel_names()
    }

    pub fn image_coordinates(&self) -> Vec<ImageCoordinates> {
        self.store.layout().images.keys().copied().collect()
    }

    pub fn has_image(&self, coordinates: ImageCoordinates) -> bool {
        self.store.entry(&coordinates).is_some()
    }

    pub fn dataset_path(&self) -> &Path {
        &self.path
    }

    pub fn summary_metadata(&self) -> &Metadata {
        self.store.summary_metadata()
    }

    pub fn image_metadata(&self, coordinates: ImageCoordinates) -> crate::Result<Metadata> {
        self.store.image_metadata(&coordinates)
    }

    fn frame_shape(&self) -> crate::Result<(u32, u32)> {
        let to_u32 = |n: u64| {
            u32::try_from(n).map_err(|_| crate::Error::general(format!("image extent {n} too large")))
        };
        Ok((to_u32(self.image_height())?, to_u32(self.image_width())?))
    }

    /// Read the chunk at `coordinates`, zero filled when absent.
    fn retrieve_frame(&self, coordinates: ImageCoordinates) -> crate::Result<Frame> {
        let (height, width) = self.frame_shape()?;
        let indices = coordinates.chunk_indices();
        let pixels = match self.pixel_type().bytes_per_pixel() {
            1 => {
                let v: Vec<u8> = self
                    .array
                    .retrieve_chunk(&indices)
                    .map_err(crate::Error::wrap)?;
                Pixels::U8(v)
            }
            _ => {
                let v: Vec<u16> = self
                    .array
                    .retrieve_chunk(&indices)
                    .map_err(crate::Error::wrap)?;
                Pixels::U16(v)
            }
        };
        Frame::new(height, width, self.pixel_type(), pixels)
    }

    /// Materialize the y,x image at `coordinates`.
    pub fn read_image(&self, coordinates: ImageCoordinates) -> crate::Result<Frame> {
        if !self.has_image(coordinates) {
            return Err(crate::Error::ImageNotFound(coordinates));
        }
        self.retrieve_frame(coordinates)
    }

    /// All z slices of one stack; missing slices are zero filled.
    pub fn read_stack(&self, position: u64, time: u64, channel: u64) -> crate::Result<Vec<Frame>> {
        let base = ImageCoordinates::new(position, time, channel, 0);
        if [position, time, channel]
            .iter()
            .zip(self.shape())
            .any(|(&i, extent)| i >= extent)
        {
            return Err(crate::Error::ImageNotFound(base));
        }
        (0..self.number_of_z_slices())
            .map(|z| self.retrieve_frame(base.z(z)))
            .collect()
    }

    pub fn open_in_viewer(&self) -> crate::Result<Child> {
        self.open_in(&ViewerCommand::default())
    }

    pub fn open_in(&self, viewer: &ViewerCommand) -> crate::Result<Child> {
        viewer.open(&self.path)
    }
}
