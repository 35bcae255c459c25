use sigfuse::descriptor::DescriptorStore;
use std::path::{Path, PathBuf};

fn shipped() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("descriptors")
}

const VALID: &str = r#"
id = "plain_csv"
format = [".CSV", "tsv"]
[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]
"#;

#[test]
fn shipped_descriptors_all_load_in_file_order() {
    let store = DescriptorStore::load_dir(&shipped()).unwrap();
    let ids: Vec<&str> = store.all().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "csv_time_series",
            "csv_mapping_425",
            "tsv_time_series",
            "json_single_trace",
            "json_signals_struct",
            "json_events",
            "wav_rate_and_samples",
        ]
    );
    let events = store.all().iter().find(|d| d.id == "json_events").unwrap();
    assert!(events.score_function.is_some());
    assert_eq!(events.mapping.annotations.as_ref().map(Vec::len), Some(2));
}

#[test]
fn broken_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a_valid.toml"), VALID).unwrap();
    std::fs::write(dir.path().join("b_syntax.toml"), "id = [").unwrap();
    std::fs::write(
        dir.path().join("c_both.toml"),
        r#"
id = "both"
format = ".csv"
[parser]
reader = "csv"
function = "read_csv"
load_method = "read"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("d_no_format.toml"),
        "id = \"x\"\nformat = \"\"\n[parser]\nreader = \"csv\"\nfunction = \"read\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a descriptor").unwrap();

    let store = DescriptorStore::load_dir(dir.path()).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.all()[0].id, "plain_csv");
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DescriptorStore::load_dir(&dir.path().join("nope")).is_err());
}

#[test]
fn lookup_by_extension_and_collection_key() {
    let store = DescriptorStore::load_dir(&shipped()).unwrap();

    let csv: Vec<&str> = store.by_extension("CSV").iter().map(|d| d.id.as_str()).collect();
    assert_eq!(csv, vec!["csv_time_series", "csv_mapping_425"]);
    assert_eq!(store.by_extension("json").len(), 3);
    assert!(store.by_extension(".mat").is_empty());

    let keyed = store.by_collection_key(425);
    assert_eq!(keyed.len(), 1);
    assert_eq!(keyed[0].id, "csv_mapping_425");
    assert!(store.by_collection_key(1).is_empty());
}

#[test]
fn format_lists_are_normalized() {
    let d = sigfuse::descriptor::store::parse(VALID).unwrap();
    assert!(d.matches_extension("csv"));
    assert!(d.matches_extension(".TSV"));
    assert_eq!(d.format.primary(), ".csv");
}
