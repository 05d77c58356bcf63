//! Copy datasets under cleaned or new names.
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    index::INDEX_FILE_NAME,
    reader::MicroscopeDataReader,
    writer::{ImageExtras, MicroscopeDataWriter, WriterOptions},
};

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-]").expect("pattern should be valid"));
static UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("pattern should be valid"));

/// Replace characters other than Unicode word characters and `-` with `_`, trim
/// underscores from both ends and collapse runs of them.
pub fn clean_name(name: &str) -> String {
    let replaced = DISALLOWED.replace_all(name, "_");
    UNDERSCORES
        .replace_all(replaced.trim_matches('_'), "_")
        .into_owned()
}

/// Whether `dir` directly holds a dataset index or TIFF files.
pub fn is_dataset_dir(dir: impl AsRef<Path>) -> bool {
    let dir = dir.as_ref();
    if dir.join(INDEX_FILE_NAME).is_file() {
        return true;
    }
    let Ok(read_dir) = fs::read_dir(dir) else {
        return false;
    };
    read_dir.filter_map(|e| e.ok()).any(|e| {
        e.path()
            .extension()
            .and_then(|x| x.to_str())
            .is_some_and(|x| x.eq_ignore_ascii_case("tif") || x.eq_ignore_ascii_case("tiff"))
    })
}

#[derive(Debug, Clone, Default)]
pub struct RenameOptions {
    /// Prefix new names with the current date and time.
    pub add_date_time: bool,
    /// Log per-image metadata while copying.
    pub verbose: bool,
}

#[derive(Debug, Default)]
pub struct RenameReport {
    /// Paths of the written datasets.
    pub succeeded: Vec<PathBuf>,
    /// Source datasets that could not be copied, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl RenameReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Copy every image of the dataset at `src` into a new dataset
/// `dst/name`, returning the path of the new dataset.
///
/// Without `name`, the cleaned source directory name is used.
pub fn process_dataset(
    src: &Path,
    dst: &Path,
    name: Option<&str>,
    options: &RenameOptions,
) -> crate::Result<PathBuf> {
    let source_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match name {
        Some(n) => n.to_owned(),
        None => {
            let cleaned = clean_name(&source_name);
            log::debug!("cleaned name {source_name:?} to {cleaned:?}");
            cleaned
        }
    };
    log::info!("Processing dataset: {} -> {}", src.display(), dst.join(&name).display());

    let reader = MicroscopeDataReader::open(src)?;
    log::debug!("summary metadata: {:?}", reader.summary_metadata());

    let writer_options = WriterOptions {
        add_date_time: options.add_date_time,
        summary_metadata: Some(reader.summary_metadata().clone()),
        ..Default::default()
    };
    let mut writer = MicroscopeDataWriter::create(dst, &name, writer_options)?;

    let coordinates = reader.image_coordinates();
    let total = coordinates.len();
    for (i, c) in coordinates.into_iter().enumerate() {
        let frame = reader.read_image(c)?;
        let metadata = reader.image_metadata(c)?;
        if options.verbose {
            log::debug!("image metadata for {c}: {metadata:?}");
        }
        let extras = ImageExtras {
            metadata: Some(metadata),
            ..Default::default()
        };
        writer.put_image(&frame, c, extras)?;
        log::trace!("copied image {}/{total}", i + 1);
    }

    let path = writer.dataset_path().to_path_buf();
    writer.close()?;
    log::info!("Successfully processed: {name} ({total} images)");
    Ok(path)
}

/// Copy a single dataset, or every dataset subfolder of `src`, into `dst`.
///
/// Subfolders are named `{new_name}_{clean(sub)}`, or `clean(sub)` without
/// a new name. Failures are logged and reported, not returned.
pub fn rename_datasets(
    src: &Path,
    dst: &Path,
    new_name: Option<&str>,
    options: &RenameOptions,
) -> crate::Result<RenameReport> {
    fs::create_dir_all(dst)?;
    let mut report = RenameReport::default();

    let mut record = |source: &Path, result: crate::Result<PathBuf>| match result {
        Ok(path) => report.succeeded.push(path),
        Err(e) => {
            log::error!("Error processing {}: {e}", source.display());
            report.failed.push((source.to_path_buf(), e.to_string()));
        }
    };

    if is_dataset_dir(src) {
        log::debug!("Processing single dataset: {}", src.display());
        record(src, process_dataset(src, dst, new_name, options));
        return Ok(report);
    }

    let mut folders: Vec<PathBuf> = fs::read_dir(src)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && is_dataset_dir(p))
        .collect();
    folders.sort();
    if folders.is_empty() {
        log::warn!("No datasets found in {} or its subfolders.", src.display());
        return Ok(report);
    }
    log::info!("Found {} datasets to process.", folders.len());

    let count = folders.len();
    for (i, folder) in folders.iter().enumerate() {
        let sub = clean_name(&folder.file_name().unwrap_or_default().to_string_lossy());
        let name = match new_name {
            Some(n) => format!("{n}_{sub}"),
            None => sub,
        };
        record(folder, process_dataset(folder, dst, Some(&name), options));
        log::info!("Completed {}/{count} folders", i + 1);
    }
    Ok(report)
}
