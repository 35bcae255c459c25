use sigfuse::config::Config;
use sigfuse::descriptor::{store::parse, Descriptor, DescriptorStore};
use sigfuse::reader::{ReaderInvoker, ReaderRegistry};
use sigfuse::select::{CandidateSource, MappingSelector};
use std::path::{Path, PathBuf};

fn descriptor(id: &str, format: &str, key: Option<u64>, required: &[&str]) -> Descriptor {
    let key = key.map(|k| format!("collection_key = {k}\n")).unwrap_or_default();
    let required = required
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(", ");
    parse(&format!(
        r#"
id = "{id}"
{key}format = "{format}"
transform = "tabular_time_series"

[validation]
required_fields = [{required}]

[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]
"#
    ))
    .unwrap()
}

fn broken(id: &str) -> Descriptor {
    parse(&format!(
        r#"
id = "{id}"
format = ".csv"

[parser]
reader = "csv"
function = "no_such_function"
args = ["<filepath>"]
"#
    ))
    .unwrap()
}

fn write_csv(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::from("time,a (mV),b (mV)\n");
    for i in 0..10 {
        body.push_str(&format!("{},{},{}\n", i as f64 * 0.004, i, 10 - i));
    }
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn first_candidate_reaching_the_top_score_wins() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_csv(dir.path(), "rec.csv");
    let store = DescriptorStore::new(vec![
        descriptor("one_field", ".csv", None, &["signals"]),
        broken("broken"),
        descriptor("two_fields", ".csv", None, &["signals", "time"]),
        descriptor("two_fields_later", ".csv", None, &["time", "sampling_frequency"]),
        descriptor("wants_missing", ".csv", None, &["annotations_extra", "signals"]),
    ]);
    let registry = ReaderRegistry::with_builtins(&Config::default());
    let selector = MappingSelector::new(&store, ReaderInvoker::new(&registry));

    let selection = selector.select(&file, None);
    assert_eq!(selection.source, CandidateSource::Extension);
    assert_eq!(selection.descriptor_id(), Some("two_fields"));
    assert_eq!(selection.score(), 2);

    let best = selection.best.as_ref().unwrap();
    assert_eq!(best.result.channel_count(), 2);
    assert!((best.result.sampling_frequency.unwrap() - 250.0).abs() < 1e-9);
    assert_eq!(
        best.result.channel_units,
        Some(vec!["mV".to_string(), "mV".to_string()])
    );

    assert_eq!(selection.attempts.len(), 5);
    assert!(selection.attempts[1].error.is_some());
    assert_eq!(selection.attempts[4].score, Some(1));

    // Same inputs, same answer.
    let again = selector.select(&file, None);
    assert_eq!(again.descriptor_id(), Some("two_fields"));
    assert_eq!(again.score(), 2);
}

#[test]
fn unmatched_extension_falls_back_to_every_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_csv(dir.path(), "rec.dat");
    let store = DescriptorStore::new(vec![descriptor("csv_only", ".csv", None, &["signals"])]);
    let registry = ReaderRegistry::with_builtins(&Config::default());
    let selector = MappingSelector::new(&store, ReaderInvoker::new(&registry));

    let selection = selector.select(&file, None);
    assert_eq!(selection.source, CandidateSource::AllDescriptors);
    assert_eq!(selection.descriptor_id(), Some("csv_only"));
    assert_eq!(selection.score(), 1);
}

#[test]
fn collection_key_restricts_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_csv(dir.path(), "rec.csv");
    let store = DescriptorStore::new(vec![
        descriptor("generic", ".csv", None, &["signals", "time", "sampling_frequency"]),
        descriptor("keyed", ".csv", Some(7), &["signals"]),
    ]);
    let registry = ReaderRegistry::with_builtins(&Config::default());
    let selector = MappingSelector::new(&store, ReaderInvoker::new(&registry));

    let keyed = selector.select(&file, Some(7));
    assert_eq!(keyed.source, CandidateSource::CollectionKey);
    assert_eq!(keyed.descriptor_id(), Some("keyed"));
    assert_eq!(keyed.attempts.len(), 1);

    let unknown = selector.select(&file, Some(8));
    assert_eq!(unknown.source, CandidateSource::AllDescriptors);
    assert_eq!(unknown.descriptor_id(), Some("generic"));
}

#[test]
fn nothing_usable_scores_minus_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_csv(dir.path(), "rec.csv");
    let store = DescriptorStore::new(vec![broken("a"), broken("b")]);
    let registry = ReaderRegistry::with_builtins(&Config::default());
    let selector = MappingSelector::new(&store, ReaderInvoker::new(&registry));

    let selection = selector.select(&file, None);
    assert!(selection.best.is_none());
    assert_eq!(selection.score(), -1);
    assert_eq!(selection.attempts.len(), 2);
    assert!(selection.attempts.iter().all(|a| a.score.is_none()));
}
