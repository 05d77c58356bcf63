//! Writer for NDTiff-style datasets.
//!
//! Pixels and per-image metadata are appended to data files, and every
//! image gets an index entry as soon as it is written, so the dataset can
//! be opened with [crate::reader::MicroscopeDataReader] while it grows.
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    axes::ImageCoordinates,
    frame::{Frame, PixelType},
    index::{COMPRESSION_NONE, INDEX_FILE_NAME, NdTiffIndexEntry},
    logging::{FilterLogger, Verbosity},
    metadata::{Metadata, check_metadata_format, encode_data_file_header},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Prefix the dataset name with `YYYY-MM-DD_HH-MM_`.
    pub add_date_time: bool,
    pub summary_metadata: Option<Metadata>,
    /// Data files roll over before exceeding this many bytes.
    pub max_file_size: u64,
    pub verbose: Verbosity,
    pub debug: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            add_date_time: true,
            summary_metadata: None,
            max_file_size: u32::MAX as u64,
            verbose: Verbosity::Trace,
            debug: false,
        }
    }
}

impl WriterOptions {
    pub fn add_date_time(mut self, add: bool) -> Self {
        self.add_date_time = add;
        self
    }

    pub fn summary_metadata(mut self, metadata: Metadata) -> Self {
        self.summary_metadata = Some(metadata);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes.min(u32::MAX as u64);
        self
    }

    pub fn verbose(mut self, verbose: Verbosity, debug: bool) -> Self {
        self.verbose = verbose;
        self.debug = debug;
        self
    }
}

/// Optional per-image additions.
#[derive(Debug, Clone, Default)]
pub struct ImageExtras {
    /// Stage position in mm.
    pub stage_xyz_pos: Option<[f64; 3]>,
    /// Timestamp in ms.
    pub timestamp_ms: Option<u64>,
    pub metadata: Option<Metadata>,
}

struct DataFile {
    name: String,
    file: BufWriter<File>,
    len: u64,
    header_len: u64,
}

pub struct MicroscopeDataWriter {
    dataset_path: PathBuf,
    dataset_name: String,
    started: Instant,
    summary_metadata: Metadata,
    all_metadata: Metadata,
    index: BufWriter<File>,
    data: DataFile,
    file_index: usize,
    max_file_size: u64,
    entries: BTreeMap<ImageCoordinates, NdTiffIndexEntry>,
    finished: bool,
    logger: FilterLogger,
}

fn data_file_name(dataset_name: &str, file_index: usize) -> String {
    if file_index == 0 {
        format!("{dataset_name}_NDTiffStack.tif")
    } else {
        format!("{dataset_name}_NDTiffStack_{file_index}.tif")
    }
}

fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let mut candidate = parent.join(name);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{name}_{n}"));
        n += 1;
    }
    candidate
}

fn basic_summary_metadata(now: &DateTime<Local>) -> Metadata {
    let mut md = Metadata::new();
    md.insert("MicroscopeDataWriter".into(), "metadata provided".into());
    md.insert("Package".into(), "imutils".into());
    md.insert("Library".into(), "imutils".into());
    md.insert("Date".into(), now.format("%d.%m.%Y").to_string().into());
    md.insert(
        "TimeCreated".into(),
        now.format("%H:%M:%S").to_string().into(),
    );
    md
}

fn to_u32(n: u64, what: &str) -> crate::Result<u32> {
    u32::try_from(n).map_err(|_| crate::Error::general(format!("{what} {n} exceeds u32 range")))
}

impl MicroscopeDataWriter {
    /// Create a new dataset directory `dataset_path/name`.
    ///
    /// An existing directory of that name is never reused; a numeric
    /// suffix is appended instead.
    pub fn create(
        dataset_path: impl AsRef<Path>,
        name: &str,
        options: WriterOptions,
    ) -> crate::Result<Self> {
        let logger = FilterLogger::new("MicroscopeDataWriter", options.verbose, options.debug);
        let now = Local::now();
        let name = if options.add_date_time {
            format!("{}_{name}", now.format("%Y-%m-%d_%H-%M"))
        } else {
            name.to_owned()
        };

        let mut summary_metadata = basic_summary_metadata(&now);
        match options.summary_metadata {
            None => {
                logger.warning("No metadata provided!");
                summary_metadata.insert(
                    "MicroscopeDataWriter".into(),
                    "no metadata provided!".into(),
                );
            }
            Some(md) => {
                check_metadata_format(&md)?;
                summary_metadata.extend(md);
            }
        }

        let parent = dataset_path.as_ref();
        fs::create_dir_all(parent)?;
        let dir = unique_dir(parent, &name);
        fs::create_dir(&dir)?;
        let dataset_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .unwrap_or(name);

        let index = BufWriter::new(File::create(dir.join(INDEX_FILE_NAME))?);
        let data = Self::open_data_file(&dir, &dataset_name, 0, &summary_metadata)?;

        let mut all_metadata = summary_metadata.clone();
        all_metadata.insert(
            "image_key".into(),
            "Str(position, time, channel, z)".into(),
        );

        logger.info(format_args!(
            "Data Writer initialized for dataset: {}",
            dir.display()
        ));
        Ok(Self {
            dataset_path: dir,
            dataset_name,
            started: Instant::now(),
            summary_metadata,
            all_metadata,
            index,
            data,
            file_index: 0,
            max_file_size: options.max_file_size,
            entries: BTreeMap::new(),
            finished: false,
            logger,
        })
    }

    fn open_data_file(
        dir: &Path,
        dataset_name: &str,
        file_index: usize,
        summary: &Metadata,
    ) -> crate::Result<DataFile> {
        let name = data_file_name(dataset_name, file_index);
        let mut file = BufWriter::new(File::create(dir.join(&name))?);
        let header = encode_data_file_header(summary)?;
        file.write_all(&header)?;
        Ok(DataFile {
            name,
            file,
            len: header.len() as u64,
            header_len: header.len() as u64,
        })
    }

    fn image_metadata(&self, extras: ImageExtras) -> Metadata {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut md = Metadata::new();
        md.insert(
            "ElapsedTimeWriter_ms".into(),
            format!("{elapsed_ms:.3}").into(),
        );
        match extras.metadata {
            None => {
                self.logger.warning("No metadata provided!");
                md.insert(
                    "MicroscopeDataWriter".into(),
                    "no metadata provided!".into(),
                );
            }
            Some(user) => md.extend(user),
        }
        if let Some([x, y, z]) = extras.stage_xyz_pos {
            md.insert("StageXPos_mm".into(), x.into());
            md.insert("StageYPos_mm".into(), y.into());
            md.insert("StageZPos_mm".into(), z.into());
        }
        if let Some(ts) = extras.timestamp_ms {
            md.insert("TimeStamp_ms".into(), ts.into());
        }
        md
    }

    /// Append one y,x image at `coordinates`.
    ///
    /// All images of a dataset share the shape and storage type of the first.
    pub fn put_image(
        &mut self,
        frame: &Frame,
        coordinates: ImageCoordinates,
        extras: ImageExtras,
    ) -> crate::Result<()> {
        if self.finished {
            return Err(crate::Error::general(
                "dataset is finished and can't be changed anymore",
            ));
        }
        if self.entries.contains_key(&coordinates) {
            return Err(crate::Error::general(format!(
                "an image already exists at {coordinates}"
            )));
        }
        if let Some(first) = self.entries.values().next() {
            if frame.shape() != [first.image_height, first.image_width]
                || !frame.pixel_type().same_storage(first.pixel_type)
            {
                return Err(crate::Error::general(format!(
                    "frame is {:?} {:?}, dataset holds {}x{} {:?}",
                    frame.shape(),
                    frame.pixel_type(),
                    first.image_height,
                    first.image_width,
                    first.pixel_type
                )));
            }
        }

        let metadata = self.image_metadata(extras);
        let pixels = frame.to_le_bytes();
        let metadata_bytes = serde_json::to_vec(&metadata)?;
        let needed = (pixels.len() + metadata_bytes.len()) as u64;

        if self.data.len + needed > self.max_file_size && self.data.len > self.data.header_len {
            self.roll_over()?;
        }
        if self.data.len + needed > u32::MAX as u64 {
            return Err(crate::Error::general("image does not fit into a data file"));
        }

        let pixel_offset = to_u32(self.data.len, "pixel offset")?;
        self.data.file.write_all(&pixels)?;
        self.data.len += pixels.len() as u64;
        let metadata_offset = to_u32(self.data.len, "metadata offset")?;
        self.data.file.write_all(&metadata_bytes)?;
        self.data.len += metadata_bytes.len() as u64;
        self.data.file.flush()?;

        let entry = NdTiffIndexEntry {
            axes: NdTiffIndexEntry::axes_for(&coordinates),
            filename: self.data.name.clone(),
            pixel_offset,
            image_width: frame.width(),
            image_height: frame.height(),
            pixel_type: frame.pixel_type(),
            pixel_compression: COMPRESSION_NONE,
            metadata_offset,
            metadata_length: to_u32(metadata_bytes.len() as u64, "metadata length")?,
            metadata_compression: COMPRESSION_NONE,
        };
        self.index.write_all(&entry.to_bytes()?)?;
        self.index.flush()?;

        self.logger
            .trace(format_args!("wrote image at {coordinates} to {}", entry.filename));
        self.all_metadata
            .insert(coordinates.metadata_key(), Value::Object(metadata));
        self.entries.insert(coordinates, entry);
        Ok(())
    }

    fn roll_over(&mut self) -> crate::Result<()> {
        self.data.file.flush()?;
        self.file_index += 1;
        self.data = Self::open_data_file(
            &self.dataset_path,
            &self.dataset_name,
            self.file_index,
            &self.summary_metadata,
        )?;
        self.logger
            .debug(format_args!("started data file {}", self.data.name));
        Ok(())
    }

    fn read_range(&self, filename: &str, offset: u32, len: u64) -> crate::Result<Vec<u8>> {
        let mut file = File::open(self.dataset_path.join(filename))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0; len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_image(&self, coordinates: ImageCoordinates) -> crate::Result<Frame> {
        let entry = self
            .entries
            .get(&coordinates)
            .ok_or(crate::Error::ImageNotFound(coordinates))?;
        let bytes = self.read_range(&entry.filename, entry.pixel_offset, entry.pixel_length())?;
        Frame::from_le_bytes(
            entry.image_height,
            entry.image_width,
            entry.pixel_type,
            &bytes,
        )
    }

    pub fn read_image_metadata(&self, coordinates: ImageCoordinates) -> crate::Result<Metadata> {
        match self.all_metadata.get(&coordinates.metadata_key()) {
            Some(Value::Object(md)) => Ok(md.clone()),
            _ => Err(crate::Error::ImageNotFound(coordinates)),
        }
    }

    pub fn has_image(&self, coordinates: ImageCoordinates) -> bool {
        self.entries.contains_key(&coordinates)
    }

    pub fn image_coordinates(&self) -> Vec<ImageCoordinates> {
        self.entries.keys().copied().collect()
    }

    pub fn summary_metadata(&self) -> &Metadata {
        &self.summary_metadata
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Number of the data file currently written to.
    pub fn file_index(&self) -> usize {
        self.file_index
    }

    fn first_entry(&self) -> Option<&NdTiffIndexEntry> {
        self.entries.values().next()
    }

    pub fn image_height(&self) -> Option<u32> {
        self.first_entry().map(|e| e.image_height)
    }

    pub fn image_width(&self) -> Option<u32> {
        self.first_entry().map(|e| e.image_width)
    }

    pub fn pixel_type(&self) -> Option<PixelType> {
        self.first_entry().map(|e| e.pixel_type)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Flush all files and write the `_Metadata.json` sidecar.
    ///
    /// Calling this more than once has no further effect.
    pub fn finish(&mut self) -> crate::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.logger.info("Finishing Data Writer");
        self.data.file.flush()?;
        self.index.flush()?;

        let path = self
            .dataset_path
            .join(format!("{}_Metadata.json", self.dataset_name));
        self.logger
            .info(format_args!("Writing metadata file: {}", path.display()));
        let mut file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut file, &self.all_metadata)?;
        file.flush()?;

        self.finished = true;
        Ok(())
    }

    pub fn close(mut self) -> crate::Result<()> {
        self.finish()?;
        self.logger.info("Closing Data Writer");
        Ok(())
    }
}

impl Drop for MicroscopeDataWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            self.logger
                .error(format_args!("could not finish dataset {}: {e}", self.dataset_name));
        }
    }
}
