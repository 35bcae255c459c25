use serde_json::{json, Value};
use sigfuse::descriptor::store::parse;
use sigfuse::evaluate::evaluate;
use sigfuse::model::TIME_AUTO_GENERATED;
use sigfuse::raw::{Column, ParsedFile, RawParseOutput, Table, TableColumn};
use std::path::PathBuf;

fn numeric(name: &str, values: &[f64]) -> TableColumn {
    TableColumn {
        name: name.to_string(),
        values: Column::Numeric(values.to_vec()),
    }
}

fn tabular(columns: Vec<TableColumn>) -> ParsedFile {
    ParsedFile {
        binding: "df".into(),
        output: RawParseOutput::Tabular(Table { columns }),
        path: PathBuf::from("/data/rec_01.csv"),
    }
}

fn record(fields: Value) -> ParsedFile {
    let Value::Object(fields) = fields else {
        panic!("record fixture must be an object");
    };
    ParsedFile {
        binding: "rec".into(),
        output: RawParseOutput::Record { fields },
        path: PathBuf::from("/data/rec_01.json"),
    }
}

const DECLARATIVE: &str = r#"
id = "decl"
format = ".csv"

[validation]
required_fields = ["time", "signals", "sampling_frequency"]

[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]

[mapping]
signals = { fn = "column_slice", start = 1 }
channel_names = { fn = "column_names", start = 1 }
sampling_frequency = { fn = "column", name = "missing" }

[mapping.metadata]
species = { fn = "constant", value = "mouse" }
experimenter = { fn = "field", name = "nope" }
source_file = { fn = "file_path", part = "name" }
"#;

#[test]
fn failing_field_is_null_and_time_is_synthesized() {
    let d = parse(DECLARATIVE).unwrap();
    let parsed = tabular(vec![
        numeric("time", &[0.0, 0.1, 0.2]),
        numeric("a", &[1.0, 2.0, 3.0]),
        numeric("b", &[4.0, 5.0, 6.0]),
    ]);
    let r = evaluate(&d, &parsed).unwrap();

    assert!(r.sampling_frequency.is_none());
    let signals = r.signals.as_ref().unwrap();
    assert_eq!(signals.dim(), (2, 3));
    assert_eq!(signals[[1, 2]], 6.0);
    assert_eq!(r.channel_names, Some(vec!["a".to_string(), "b".to_string()]));

    // `time` was never mapped, so it falls back to sample indices.
    assert_eq!(r.time, Some(vec![0.0, 1.0, 2.0]));
    assert_eq!(r.metadata[TIME_AUTO_GENERATED], Value::Bool(true));
    assert!(r.time_auto_generated());
}

#[test]
fn failing_metadata_entry_only_nulls_that_entry() {
    let d = parse(DECLARATIVE).unwrap();
    let parsed = tabular(vec![numeric("time", &[0.0, 1.0]), numeric("a", &[1.0, 2.0])]);
    let r = evaluate(&d, &parsed).unwrap();

    assert_eq!(r.metadata["species"], json!("mouse"));
    assert_eq!(r.metadata["experimenter"], Value::Null);
    assert_eq!(r.metadata["source_file"], json!("rec_01.csv"));
}

#[test]
fn bad_annotation_is_dropped_and_the_rest_kept() {
    let d = parse(
        r#"
id = "events"
format = ".json"

[parser]
reader = "json"
function = "read"
args = ["<filepath>"]

[mapping]
time = { fn = "column", name = "t" }
signals = { fn = "matrix", name = "data" }
sampling_frequency = { fn = "field", name = "fs" }

[[mapping.annotations]]
label = { fn = "constant", value = "first" }
onset = { fn = "index", name = "events", index = 0 }

[[mapping.annotations]]
label = { fn = "constant", value = "out_of_range" }
onset = { fn = "index", name = "events", index = 9 }

[[mapping.annotations]]
label = { fn = "constant", value = "last" }
onset = { fn = "index", name = "events", index = -1 }
"#,
    )
    .unwrap();
    let parsed = record(json!({
        "t": [0.0, 0.5, 1.0],
        "data": [[1.0, 2.0, 3.0]],
        "fs": 2.0,
        "events": [0.25, 0.75],
        "note": "bench",
    }));
    let r = evaluate(&d, &parsed).unwrap();

    let ann = r.annotations.as_ref().unwrap();
    assert_eq!(ann.len(), 2);
    assert_eq!(ann[0].label, "first");
    assert_eq!(ann[0].onset, 0.25);
    assert_eq!(ann[1].label, "last");
    assert_eq!(ann[1].onset, 0.75);
    assert_eq!(r.sampling_frequency, Some(2.0));
    assert!(!r.time_auto_generated());
}

#[test]
fn transform_failure_disqualifies_the_descriptor() {
    // `single_trace` needs a `signal` option.
    let d = parse(
        r#"
id = "trace"
format = ".json"
transform = "single_trace"

[parser]
reader = "json"
function = "read"
args = ["<filepath>"]
"#,
    )
    .unwrap();
    let parsed = record(json!({"t": [0.0, 1.0], "v": [1.0, 2.0], "label": "x"}));
    let err = evaluate(&d, &parsed).unwrap_err();
    assert_eq!(err.kind(), "postprocess");
    assert!(err.to_string().contains("trace"));
}

#[test]
fn time_signal_length_mismatch_is_a_postprocess_error() {
    let d = parse(
        r#"
id = "mismatch"
format = ".csv"

[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]

[mapping]
time = { fn = "column", name = "time" }
signals = { fn = "columns", names = ["a"] }
"#,
    )
    .unwrap();
    let parsed = tabular(vec![numeric("time", &[0.0, 1.0]), numeric("a", &[1.0, 2.0, 3.0])]);
    let err = evaluate(&d, &parsed).unwrap_err();
    assert_eq!(err.kind(), "postprocess");
    assert!(err.to_string().contains("length mismatch"));
}

#[test]
fn channel_names_of_wrong_length_are_dropped() {
    let d = parse(
        r#"
id = "names"
format = ".csv"

[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]

[mapping]
signals = { fn = "columns", names = ["a", "b"] }
channel_names = { fn = "constant", value = ["only_one"] }
"#,
    )
    .unwrap();
    let parsed = tabular(vec![numeric("a", &[1.0, 2.0]), numeric("b", &[3.0, 4.0])]);
    let r = evaluate(&d, &parsed).unwrap();
    assert_eq!(r.channel_count(), 2);
    assert!(r.channel_names.is_none());
}
