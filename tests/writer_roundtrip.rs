use ndarray::Array2;
use serde_json::{json, Map};
use sigfuse::descriptor::{store::parse, Descriptor};
use sigfuse::model::{Annotation, CanonicalResult};
use sigfuse::writer::{read_container, ContainerKind, StandardizedWriter, WriteOptions, WriteRequest};

fn point(label: &str, onset: f64) -> Annotation {
    Annotation {
        label: label.to_string(),
        onset,
        duration: None,
        extra: Map::new(),
    }
}

fn descriptor() -> Descriptor {
    parse(
        r#"
id = "bench_csv"
format = [".csv", ".tsv"]
transform = "tabular_time_series"
[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]
"#,
    )
    .unwrap()
}

fn result() -> CanonicalResult {
    let n = 100;
    let signals = Array2::from_shape_fn((2, n), |(c, k)| (c * 1000 + k) as f64 * 0.5);
    let mut r = CanonicalResult {
        time: Some((0..n).map(|k| k as f64 / 250.0).collect()),
        signals: Some(signals),
        sampling_frequency: Some(250.0),
        channel_names: Some(vec!["CH1".into(), "CH2".into()]),
        annotations: Some(vec![point("stim", 0.12)]),
        ..Default::default()
    };
    r.metadata.insert("modality".into(), json!("ecg"));
    r.apply_time_fallback();
    r
}

fn roundtrip(opts: WriteOptions) {
    let dir = tempfile::tempdir().unwrap();
    let r = result();
    let d = descriptor();
    let writer = StandardizedWriter::new(opts);
    let kind = writer.options().kind;

    let path = writer
        .write(&dir.path().join("rec_std"), &WriteRequest::new(&r, &d, "rec.csv"))
        .unwrap();
    assert!(path.to_string_lossy().ends_with(kind.suffix()));
    assert_eq!(ContainerKind::from_path(&path), Some(kind));

    let back = read_container(&path).unwrap();
    assert_eq!(back.signals.dim(), (2, 100));
    assert_eq!(back.signals, *r.signals.as_ref().unwrap());
    assert_eq!(back.time, *r.time.as_ref().unwrap());
    assert_eq!(back.sampling_frequency(), Some(250.0));
    assert_eq!(back.channel_names(), vec!["CH1", "CH2"]);
    assert_eq!(back.channel_units(), vec!["unknown", "unknown"]);
    assert_eq!(back.metadata["species"], json!("unknown"));
    assert_eq!(back.metadata["modality"], json!("ecg"));
    assert_eq!(back.metadata["source_format"], json!(".csv"));
    assert_eq!(back.metadata["original_file_name"], json!("rec.csv"));
    assert_eq!(back.metadata["descriptor_id"], json!("bench_csv"));
    assert_eq!(back.metadata["time_auto_generated"], json!(false));

    let ann = back.parsed_annotations();
    assert_eq!(ann.len(), 1);
    assert_eq!(ann[0].label, "stim");

    // No temporaries left next to the output.
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1, "{names:?}");
}

#[test]
fn archive_roundtrip() {
    roundtrip(WriteOptions::new(ContainerKind::Archive));
}

#[test]
fn zarr_directory_roundtrip_with_edge_chunks() {
    roundtrip(WriteOptions {
        chunks: Some((1, 32)),
        ..WriteOptions::new(ContainerKind::Zarr)
    });
}

#[test]
fn zarr_tar_roundtrip_uncompressed() {
    roundtrip(WriteOptions {
        compression_level: 0,
        ..WriteOptions::new(ContainerKind::ZarrTar)
    });
}

#[cfg(feature = "storage_hdf5")]
#[test]
fn hdf5_roundtrip() {
    roundtrip(WriteOptions::new(ContainerKind::Hdf5));
}

#[cfg(not(feature = "storage_hdf5"))]
#[test]
fn hdf5_without_feature_reports_it() {
    let dir = tempfile::tempdir().unwrap();
    let (r, d) = (result(), descriptor());
    let writer = StandardizedWriter::new(WriteOptions::new(ContainerKind::Hdf5));
    let err = writer
        .write(&dir.path().join("rec_std"), &WriteRequest::new(&r, &d, "rec.csv"))
        .unwrap_err();
    assert_eq!(err.kind(), "feature_not_enabled");
    assert!(!dir.path().join("rec_std.h5").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn explicit_annotations_and_overrides_win() {
    let dir = tempfile::tempdir().unwrap();
    let (r, d) = (result(), descriptor());
    let explicit = vec![point("a", 0.0), point("b", 0.2)];
    let mut overrides = Map::new();
    overrides.insert("species".into(), json!("rat"));
    overrides.insert("collection_id".into(), json!("42"));

    let writer = StandardizedWriter::new(WriteOptions::new(ContainerKind::Archive));
    let req = WriteRequest {
        annotations: Some(&explicit),
        overrides: Some(&overrides),
        ..WriteRequest::new(&r, &d, "rec.csv")
    };
    let path = writer.write(&dir.path().join("rec_std"), &req).unwrap();

    let back = read_container(&path).unwrap();
    let labels: Vec<String> = back.parsed_annotations().into_iter().map(|a| a.label).collect();
    assert_eq!(labels, vec!["a", "b"]);
    assert_eq!(back.metadata["species"], json!("rat"));
    assert_eq!(back.metadata["collection_id"], json!("42"));
}

#[test]
fn rewriting_replaces_the_existing_container() {
    let dir = tempfile::tempdir().unwrap();
    let d = descriptor();
    let writer = StandardizedWriter::new(WriteOptions::new(ContainerKind::Zarr));
    let base = dir.path().join("rec_std");

    let first = result();
    writer.write(&base, &WriteRequest::new(&first, &d, "rec.csv")).unwrap();

    let mut second = result();
    second.signals = Some(Array2::ones((3, 10)));
    second.time = Some((0..10).map(f64::from).collect());
    second.channel_names = None;
    let path = writer.write(&base, &WriteRequest::new(&second, &d, "rec.csv")).unwrap();

    let back = read_container(&path).unwrap();
    assert_eq!(back.signals.dim(), (3, 10));
    assert_eq!(back.channel_names(), vec!["CH1", "CH2", "CH3"]);
}

#[test]
fn unknown_path_suffix_cannot_be_read() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_container(&dir.path().join("rec.parquet")).unwrap_err();
    assert_eq!(err.kind(), "write");
}
