use crate::{descriptor::Descriptor, model::{json_f64, CanonicalResult}};
use serde_json::{json, Map, Value};
use time::macros::format_description;

pub const TOOL_NOTE: &str = "Mapped using sigfuse";

fn copied_defaults() -> [(&'static str, Value); 6] {
    [
        ("species", json!("unknown")),
        ("anatomical_location", json!("unknown")),
        ("modality", json!("unknown")),
        ("experimenter", json!(["unknown"])),
        ("institution", json!("unknown")),
        ("sweep_mode", json!(false)),
    ]
}

pub fn today() -> String {
    time::OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "1970-01-01".to_string())
}

pub fn channel_names(result: &CanonicalResult) -> Vec<String> {
    result
        .channel_names
        .clone()
        .unwrap_or_else(|| (1..=result.channel_count()).map(|i| format!("CH{i}")).collect())
}

pub fn channel_units(result: &CanonicalResult) -> Vec<String> {
    result
        .channel_units
        .clone()
        .unwrap_or_else(|| vec!["unknown".to_string(); result.channel_count()])
}

/// Provenance defaults < result metadata < caller overrides.
pub fn merged_metadata(
    result: &CanonicalResult,
    descriptor: &Descriptor,
    original_filename: &str,
    overrides: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let date = today();
    let mut meta = Map::new();
    let mut put = |k: &str, v: Value| {
        meta.insert(k.to_string(), v);
    };

    put("time_units", json!("seconds"));
    put("time_auto_generated", json!(result.time_auto_generated()));
    put("source_format", json!(descriptor.format.primary()));
    put("database_id", json!("unknown"));
    put(
        "sampling_frequency",
        result.sampling_frequency.map(json_f64).unwrap_or(Value::Null),
    );
    put("channel_names", json!(channel_names(result)));
    put("channel_units", json!(channel_units(result)));
    put("version", json!("v1.0"));
    put("upload_date", json!(date));
    put("conversion_date", json!(date));
    put("auto_mapped", json!(true));
    put("doi", json!("unknown"));
    put("original_file_name", json!(original_filename));
    put("subject_id", json!("unknown"));
    put("notes", json!(TOOL_NOTE));
    put("descriptor_id", json!(descriptor.id));

    for (key, fallback) in copied_defaults() {
        let v = result
            .metadata
            .get(key)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(fallback);
        put(key, v);
    }

    put(
        "source_metadata",
        Value::Object(result.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );

    if let Some(overrides) = overrides {
        for (k, v) in overrides {
            meta.insert(k.clone(), v.clone());
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn descriptor() -> Descriptor {
        crate::descriptor::store::parse(
            r#"
id = "d"
format = ".csv"
[parser]
reader = "csv"
function = "read_csv"
args = ["<filepath>"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn layering_order() {
        let mut result = CanonicalResult {
            signals: Some(Array2::zeros((3, 4))),
            ..Default::default()
        };
        result.metadata.insert("species".into(), json!("rat"));
        result.metadata.insert("modality".into(), Value::Null);
        result.apply_time_fallback();

        let mut overrides = Map::new();
        overrides.insert("doi".into(), json!("10.1/x"));
        overrides.insert("species".into(), json!("mouse"));

        let m = merged_metadata(&result, &descriptor(), "a.csv", Some(&overrides));
        assert_eq!(m["species"], json!("mouse"));
        assert_eq!(m["modality"], json!("unknown"));
        assert_eq!(m["doi"], json!("10.1/x"));
        assert_eq!(m["source_format"], json!(".csv"));
        assert_eq!(m["channel_names"], json!(["CH1", "CH2", "CH3"]));
        assert_eq!(m["channel_units"], json!(["unknown", "unknown", "unknown"]));
        assert_eq!(m["time_auto_generated"], json!(true));
        assert_eq!(m["source_metadata"]["species"], json!("rat"));
        assert_eq!(m["upload_date"].as_str().map(str::len), Some(10));
    }
}
