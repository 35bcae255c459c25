use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PATH_PLACEHOLDER: &str = "<filepath>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: String,
    #[serde(default, alias = "sparc_id")]
    pub collection_key: Option<u64>,
    pub format: FormatTag,
    pub parser: ParserSpec,
    #[serde(default)]
    pub preprocess: Vec<Preprocess>,
    #[serde(default)]
    pub mapping: Mapping,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub transform_options: toml::Table,
    #[serde(default)]
    pub validation: Validation,
    /// Declared by some descriptors; stored but never evaluated. Selection
    /// always scores by required-field count.
    #[serde(default)]
    pub score_function: Option<String>,
}

impl Descriptor {
    pub fn required_fields(&self) -> &[String] {
        &self.validation.required_fields
    }

    pub fn uses_transform(&self) -> bool {
        self.transform.is_some()
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        self.format.extensions().any(|e| e == ext)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatTag {
    One(String),
    Many(Vec<String>),
}

impl FormatTag {
    pub fn extensions(&self) -> impl Iterator<Item = String> + '_ {
        let items: &[String] = match self {
            FormatTag::One(s) => std::slice::from_ref(s),
            FormatTag::Many(v) => v,
        };
        items
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_extension(s))
    }

    pub fn primary(&self) -> String {
        self.extensions().next().unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.extensions().next().is_none()
    }
}

pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    format!(".{ext}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserSpec {
    pub reader: String,
    #[serde(default = "default_output_var")]
    pub output_var: String,
    #[serde(default)]
    pub init_args: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub load_method: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub args: Vec<toml::Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, toml::Value>,
}

fn default_output_var() -> String {
    "raw".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    Construct { load_method: &'a str },
    Call { function: &'a str },
}

impl ParserSpec {
    pub fn invocation(&self) -> Option<Invocation<'_>> {
        match (self.function.as_deref(), self.load_method.as_deref()) {
            (Some(function), None) if !function.is_empty() => Some(Invocation::Call { function }),
            (None, Some(load_method)) if !load_method.is_empty() => {
                Some(Invocation::Construct { load_method })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Preprocess {
    DropPrefixed { prefix: String },
    Transpose { name: String },
    Rename { from: String, to: String },
    NumericOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub metadata: BTreeMap<String, Extract>,
    #[serde(default)]
    pub annotations: Option<Vec<BTreeMap<String, Extract>>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Extract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum Extract {
    Column {
        name: String,
    },
    Columns {
        names: Vec<String>,
    },
    ColumnSlice {
        start: usize,
        #[serde(default)]
        end: Option<usize>,
    },
    ColumnNames {
        start: usize,
        #[serde(default)]
        end: Option<usize>,
    },
    Matrix {
        name: String,
        #[serde(default)]
        transpose: bool,
    },
    Index {
        name: String,
        index: i64,
    },
    DiffRate {
        name: String,
    },
    Constant {
        value: toml::Value,
    },
    Field {
        name: String,
    },
    FilePath {
        #[serde(default)]
        part: PathPart,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathPart {
    #[default]
    Full,
    Name,
    Stem,
    Extension,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    #[serde(default)]
    pub required_fields: Vec<String>,
}
