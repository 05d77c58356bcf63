use std::path::Path;

use imutils::{
    Frame, ImageCoordinates, ImageExtras, MicroscopeDataReader, MicroscopeDataWriter,
    WriterOptions,
    metadata::Metadata,
    rename::{RenameOptions, process_dataset, rename_datasets},
};
use serde_json::json;

fn write_dataset(parent: &Path, name: &str, channels: u64) {
    env_logger::try_init().ok();
    let mut summary = Metadata::new();
    summary.insert("Strain".into(), json!("N2"));
    let options = WriterOptions::default()
        .add_date_time(false)
        .summary_metadata(summary);
    let mut writer = MicroscopeDataWriter::create(parent, name, options).expect("create dataset");
    for c in 0..channels {
        let mut md = Metadata::new();
        md.insert("Channel".into(), json!(c));
        let extras = ImageExtras {
            stage_xyz_pos: Some([0.5, 1.5, 2.5]),
            metadata: Some(md),
            ..Default::default()
        };
        let frame = Frame::new_u16(2, 2, vec![c as u16; 4]).unwrap();
        writer
            .put_image(&frame, ImageCoordinates::default().channel(c), extras)
            .expect("put image");
    }
    writer.close().expect("close dataset");
}

fn options() -> RenameOptions {
    RenameOptions {
        add_date_time: false,
        verbose: true,
    }
}

#[test]
fn test_single_dataset_is_copied() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_dataset(src.path(), "raw data.2024", 2);

    let copied = process_dataset(&src.path().join("raw data.2024"), dst.path(), None, &options())
        .expect("process dataset");
    assert_eq!(copied, dst.path().join("raw_data_2024"));

    let reader = MicroscopeDataReader::open(&copied).expect("open copy");
    assert_eq!(reader.shape(), [1, 1, 2, 1, 2, 2]);
    assert_eq!(reader.summary_metadata()["Strain"], "N2");
    let c = ImageCoordinates::default().channel(1);
    assert_eq!(reader.read_image(c).unwrap().get(1, 1), Some(1));
    let md = reader.image_metadata(c).unwrap();
    assert_eq!(md["Channel"], 1);
    assert_eq!(md["StageZPos_mm"], 2.5);
}

#[test]
fn test_parent_folder_with_prefix() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_dataset(src.path(), "worm 1", 1);
    write_dataset(src.path(), "worm#2", 1);
    std::fs::create_dir(src.path().join("notes")).unwrap();

    let report =
        rename_datasets(src.path(), dst.path(), Some("exp"), &options()).expect("rename");
    assert_eq!(report.total(), 2);
    assert!(report.failed.is_empty());
    assert!(dst.path().join("exp_worm_1").is_dir());
    assert!(dst.path().join("exp_worm_2").is_dir());
}

#[test]
fn test_failures_are_reported() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_dataset(src.path(), "good", 1);
    let broken = src.path().join("broken");
    std::fs::create_dir(&broken).unwrap();
    std::fs::write(broken.join("stack.tif"), b"not a dataset").unwrap();

    let report = rename_datasets(src.path(), dst.path(), None, &options()).expect("rename");
    assert_eq!(report.succeeded, vec![dst.path().join("good")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, broken);
}

#[test]
fn test_single_dataset_with_new_name() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_dataset(src.path(), "original", 1);

    let report = rename_datasets(&src.path().join("original"), dst.path(), Some("renamed"), &options())
        .expect("rename");
    assert_eq!(report.succeeded, vec![dst.path().join("renamed")]);
}
