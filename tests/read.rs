use std::path::{Path, PathBuf};

use imutils::{
    Frame, ImageCoordinates, ImageExtras, MicroscopeDataReader, MicroscopeDataWriter,
    WriterOptions,
    index::{INDEX_FILE_NAME, NdTiffIndexEntry, parse_index},
    metadata::Metadata,
};
use serde_json::json;

fn options() -> WriterOptions {
    env_logger::try_init().ok();
    let mut summary = Metadata::new();
    summary.insert("Objective".into(), json!("10x"));
    summary.insert("Exposure_ms".into(), json!(25.0));
    WriterOptions::default()
        .add_date_time(false)
        .summary_metadata(summary)
}

fn frame(value: u16) -> Frame {
    let pixels = (0..12).map(|i| value * 100 + i).collect();
    Frame::new_u16(3, 4, pixels).expect("valid frame")
}

/// Two timepoints, two channels, three z slices; `(t=1, c=1, z=2)` is left out.
fn write_dataset(dir: &Path) -> PathBuf {
    let mut writer =
        MicroscopeDataWriter::create(dir, "acquisition", options()).expect("create dataset");
    for t in 0..2 {
        for c in 0..2 {
            for z in 0..3 {
                if (t, c, z) == (1, 1, 2) {
                    continue;
                }
                let mut md = Metadata::new();
                md.insert("Camera".into(), json!("cam0"));
                let extras = ImageExtras {
                    timestamp_ms: Some(1000 * t),
                    metadata: Some(md),
                    ..Default::default()
                };
                let coordinates = ImageCoordinates::default().time(t).channel(c).z(z);
                writer
                    .put_image(&frame((t * 6 + c * 3 + z) as u16), coordinates, extras)
                    .expect("put image");
            }
        }
    }
    let path = writer.dataset_path().to_path_buf();
    writer.close().expect("close dataset");
    path
}

#[test]
fn test_layout() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MicroscopeDataReader::open(write_dataset(dir.path())).expect("open dataset");

    assert_eq!(reader.shape(), [1, 2, 2, 3, 3, 4]);
    assert_eq!(reader.axis_string(), "PTCZYX");
    assert_eq!(
        reader.axis_names(),
        ["position", "time", "channel", "z", "y", "x"]
    );
    assert_eq!(reader.number_of_positions(), 1);
    assert_eq!(reader.number_of_timepoints(), 2);
    assert_eq!(reader.number_of_channels(), 2);
    assert_eq!(reader.number_of_z_slices(), 3);
    assert_eq!(reader.channel_names(), ["Ch0", "Ch1"]);
    assert_eq!(reader.image_coordinates().len(), 11);
    assert_eq!(reader.lazy_array().shape(), &[1, 2, 2, 3, 3, 4]);
}

#[test]
fn test_read_image() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MicroscopeDataReader::open(write_dataset(dir.path())).expect("open dataset");

    let c = ImageCoordinates::default().time(1).z(2);
    assert_eq!(reader.read_image(c).expect("read image"), frame(8));
    assert_eq!(
        reader.read_image(ImageCoordinates::default()).expect("read image"),
        frame(0)
    );

    let missing = ImageCoordinates::default().time(1).channel(1).z(2);
    assert!(!reader.has_image(missing));
    assert!(matches!(
        reader.read_image(missing),
        Err(imutils::Error::ImageNotFound(_))
    ));
}

#[test]
fn test_missing_frames_read_as_zero() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MicroscopeDataReader::open(write_dataset(dir.path())).expect("open dataset");

    let array = reader.lazy_array();
    let data: Vec<u16> = array
        .retrieve_array_subset(&array.subset_all())
        .expect("retrieve all data");
    assert_eq!(data.len(), 2 * 2 * 3 * 12);
    // the last frame in PTCZYX order is the missing one
    assert!(data[data.len() - 12..].iter().all(|&v| v == 0));
    assert_eq!(data[12], 100);

    let stack = reader.read_stack(0, 1, 1).expect("read stack");
    assert_eq!(stack.len(), 3);
    assert_eq!(stack[0], frame(9));
    assert_eq!(stack[2].get(0, 0), Some(0));
    assert!(reader.read_stack(0, 2, 0).is_err());
}

#[test]
fn test_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MicroscopeDataReader::open(write_dataset(dir.path())).expect("open dataset");

    let summary = reader.summary_metadata();
    assert_eq!(summary["Objective"], "10x");
    assert_eq!(summary["Package"], "imutils");

    let md = reader
        .image_metadata(ImageCoordinates::default().time(1))
        .expect("image metadata");
    assert_eq!(md["Camera"], "cam0");
    assert_eq!(md["TimeStamp_ms"], 1000);

    let sidecar = reader.dataset_path().join("acquisition_Metadata.json");
    let all: serde_json::Value =
        serde_json::from_slice(&std::fs::read(sidecar).unwrap()).unwrap();
    assert_eq!(all["0,1,0,0"]["Camera"], "cam0");
}

#[test]
fn test_open_while_writing() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        MicroscopeDataWriter::create(dir.path(), "live", options()).expect("create dataset");
    writer
        .put_image(&frame(1), ImageCoordinates::default(), ImageExtras::default())
        .expect("put image");

    let reader = MicroscopeDataReader::open(writer.dataset_path()).expect("open dataset");
    assert_eq!(reader.shape(), [1, 1, 1, 1, 3, 4]);
    assert_eq!(
        reader.read_image(ImageCoordinates::default()).expect("read image"),
        frame(1)
    );
}

#[test]
fn test_eight_bit_and_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = MicroscopeDataWriter::create(
        dir.path(),
        "bytes",
        options().max_file_size(1024),
    )
    .expect("create dataset");
    let frames: Vec<Frame> = (0..4u8)
        .map(|i| Frame::new_u8(16, 16, vec![i; 256]).unwrap())
        .collect();
    for (z, f) in frames.iter().enumerate() {
        writer
            .put_image(f, ImageCoordinates::default().z(z as u64), ImageExtras::default())
            .expect("put image");
    }
    assert!(writer.file_index() > 0);
    let path = writer.dataset_path().to_path_buf();
    writer.close().unwrap();

    let reader = MicroscopeDataReader::open(path).expect("open dataset");
    assert_eq!(reader.pixel_type(), imutils::PixelType::Gray8);
    for (z, f) in frames.iter().enumerate() {
        let c = ImageCoordinates::default().z(z as u64);
        assert_eq!(&reader.read_image(c).unwrap(), f);
    }
}

/// Append a copy of the last index entry at `(t=1, c=1, z=2)`, altered by `edit`.
fn append_entry(path: &Path, edit: impl FnOnce(&mut NdTiffIndexEntry)) {
    let index_path = path.join(INDEX_FILE_NAME);
    let mut bytes = std::fs::read(&index_path).expect("read index");
    let entries = parse_index(&bytes).expect("parse index");
    let mut entry = entries.last().expect("entries").clone();
    entry.axes = NdTiffIndexEntry::axes_for(&ImageCoordinates::default().time(1).channel(1).z(2));
    edit(&mut entry);
    bytes.extend(entry.to_bytes().expect("encode entry"));
    std::fs::write(&index_path, bytes).expect("write index");
}

#[test]
fn test_rejects_differing_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dataset(dir.path());
    append_entry(&path, |e| e.image_width += 1);
    let err = MicroscopeDataReader::open(&path).err().expect("open should fail");
    assert!(err.to_string().contains("expected 3x4"), "{err}");
}

#[test]
fn test_rejects_compressed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dataset(dir.path());
    append_entry(&path, |e| e.pixel_compression = 1);
    let err = MicroscopeDataReader::open(&path).err().expect("open should fail");
    assert!(err.to_string().contains("compressed"), "{err}");
}
