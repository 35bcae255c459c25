pub mod command;
pub mod csv;
pub mod json;

use crate::{
    config::Config,
    descriptor::{Descriptor, Invocation, Preprocess, PATH_PLACEHOLDER},
    error::{ConvertError, ConvertResult},
    raw::{Column, ParsedFile, RawParseOutput},
};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub positional: Vec<toml::Value>,
    pub named: BTreeMap<String, toml::Value>,
}

impl Arguments {
    pub fn str_at(&self, idx: usize) -> Option<&str> {
        self.positional.get(idx).and_then(|v| v.as_str())
    }

    pub fn str_named(&self, key: &str) -> Option<&str> {
        self.named.get(key).and_then(|v| v.as_str())
    }

    /// `path` keyword, falling back to the first positional argument.
    pub fn path(&self) -> Result<PathBuf> {
        self.str_named("path")
            .or_else(|| self.str_at(0))
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("no path argument"))
    }

    pub fn bool_named(&self, key: &str) -> Option<bool> {
        match self.named.get(key)? {
            toml::Value::Boolean(b) => Some(*b),
            toml::Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn int_named(&self, key: &str) -> Option<i64> {
        self.named.get(key).and_then(|v| v.as_integer())
    }
}

pub trait LoadedReader {
    fn load(&mut self, method: &str) -> Result<RawParseOutput>;
}

pub trait FormatReader: Send + Sync {
    fn construct(&self, init: &Arguments) -> Result<Box<dyn LoadedReader>>;
    fn call(&self, function: &str, args: &Arguments) -> Result<RawParseOutput>;
}

pub struct ReaderRegistry {
    readers: BTreeMap<String, Box<dyn FormatReader>>,
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: BTreeMap::new(),
        }
    }

    pub fn with_builtins(cfg: &Config) -> Self {
        let mut reg = Self::empty();
        reg.register("csv", Box::new(csv::CsvReader));
        reg.register("json", Box::new(json::JsonReader));
        reg.register(
            "command",
            Box::new(command::CommandReader::new(cfg.readers.command_timeout_seconds)),
        );
        reg
    }

    pub fn register(&mut self, name: &str, reader: Box<dyn FormatReader>) {
        self.readers.insert(name.to_string(), reader);
    }

    pub fn get(&self, name: &str) -> Option<&dyn FormatReader> {
        self.readers.get(name).map(|r| r.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.readers.keys().map(String::as_str).collect()
    }
}

pub struct ReaderInvoker<'a> {
    registry: &'a ReaderRegistry,
}

impl<'a> ReaderInvoker<'a> {
    pub fn new(registry: &'a ReaderRegistry) -> Self {
        Self { registry }
    }

    pub fn invoke(&self, descriptor: &Descriptor, path: &Path) -> ConvertResult<ParsedFile> {
        let fail = |reason: String| ConvertError::ParseInvocation {
            descriptor: descriptor.id.clone(),
            reason,
        };
        let parser = &descriptor.parser;
        let reader = self
            .registry
            .get(&parser.reader)
            .ok_or_else(|| fail(format!("no reader registered as '{}'", parser.reader)))?;
        let invocation = parser
            .invocation()
            .ok_or_else(|| fail("parser declares no invocation".into()))?;

        debug!(
            "invoke reader={} {:?} descriptor={} path={}",
            parser.reader,
            invocation,
            descriptor.id,
            path.display()
        );

        let output = match invocation {
            Invocation::Construct { load_method } => {
                let init = Arguments {
                    positional: Vec::new(),
                    named: substitute_named(&parser.init_args, path),
                };
                let mut instance = reader.construct(&init).map_err(|e| fail(format!("{e:#}")))?;
                instance.load(load_method)
            }
            Invocation::Call { function } => {
                let args = Arguments {
                    positional: parser.args.iter().map(|v| substitute(v, path)).collect(),
                    named: parser.kwargs.clone(),
                };
                reader.call(function, &args)
            }
        }
        .map_err(|e| fail(format!("{e:#}")))?;

        let output = apply_preprocess(output, &descriptor.preprocess)
            .map_err(|e| fail(format!("preprocess: {e:#}")))?;

        Ok(ParsedFile {
            binding: parser.output_var.clone(),
            output,
            path: path.to_path_buf(),
        })
    }
}

fn substitute(v: &toml::Value, path: &Path) -> toml::Value {
    match v {
        toml::Value::String(s) if s == PATH_PLACEHOLDER => {
            toml::Value::String(path.display().to_string())
        }
        toml::Value::Array(items) => {
            toml::Value::Array(items.iter().map(|v| substitute(v, path)).collect())
        }
        other => other.clone(),
    }
}

fn substitute_named(
    args: &BTreeMap<String, toml::Value>,
    path: &Path,
) -> BTreeMap<String, toml::Value> {
    args.iter()
        .map(|(k, v)| (k.clone(), substitute(v, path)))
        .collect()
}

pub fn apply_preprocess(mut output: RawParseOutput, steps: &[Preprocess]) -> Result<RawParseOutput> {
    for step in steps {
        output = match (step, output) {
            (Preprocess::DropPrefixed { prefix }, RawParseOutput::Tabular(mut t)) => {
                t.columns.retain(|c| !c.name.starts_with(prefix.as_str()));
                RawParseOutput::Tabular(t)
            }
            (Preprocess::DropPrefixed { prefix }, RawParseOutput::ArrayDict { mut arrays }) => {
                arrays.retain(|k, _| !k.starts_with(prefix.as_str()));
                RawParseOutput::ArrayDict { arrays }
            }
            (Preprocess::DropPrefixed { prefix }, RawParseOutput::Record { mut fields }) => {
                fields.retain(|k, _| !k.starts_with(prefix.as_str()));
                RawParseOutput::Record { fields }
            }
            (Preprocess::DropPrefixed { prefix }, RawParseOutput::Group(mut g)) => {
                g.arrays.retain(|k, _| !k.starts_with(prefix.as_str()));
                g.groups.retain(|k, _| !k.starts_with(prefix.as_str()));
                g.attrs.retain(|k, _| !k.starts_with(prefix.as_str()));
                RawParseOutput::Group(g)
            }
            (Preprocess::Transpose { name }, RawParseOutput::ArrayDict { mut arrays }) => {
                let a = arrays
                    .get_mut(name)
                    .ok_or_else(|| anyhow!("no array '{name}' to transpose"))?;
                *a = a.transposed()?;
                RawParseOutput::ArrayDict { arrays }
            }
            (Preprocess::Transpose { name }, RawParseOutput::Group(mut g)) => {
                let a = g
                    .arrays
                    .get_mut(name)
                    .ok_or_else(|| anyhow!("no array '{name}' to transpose"))?;
                *a = a.transposed()?;
                RawParseOutput::Group(g)
            }
            (Preprocess::Rename { from, to }, RawParseOutput::Tabular(mut t)) => {
                let col = t
                    .columns
                    .iter_mut()
                    .find(|c| &c.name == from)
                    .ok_or_else(|| anyhow!("no column '{from}' to rename"))?;
                col.name = to.clone();
                RawParseOutput::Tabular(t)
            }
            (Preprocess::Rename { from, to }, RawParseOutput::ArrayDict { mut arrays }) => {
                let a = arrays
                    .remove(from)
                    .ok_or_else(|| anyhow!("no array '{from}' to rename"))?;
                arrays.insert(to.clone(), a);
                RawParseOutput::ArrayDict { arrays }
            }
            (Preprocess::Rename { from, to }, RawParseOutput::Record { mut fields }) => {
                let v = fields
                    .remove(from)
                    .ok_or_else(|| anyhow!("no field '{from}' to rename"))?;
                fields.insert(to.clone(), v);
                RawParseOutput::Record { fields }
            }
            (Preprocess::NumericOnly, RawParseOutput::Tabular(mut t)) => {
                t.columns.retain(|c| matches!(c.values, Column::Numeric(_)));
                RawParseOutput::Tabular(t)
            }
            (Preprocess::NumericOnly, RawParseOutput::Record { mut fields }) => {
                fields.retain(|_, v| {
                    v.is_number()
                        || v.as_array()
                            .is_some_and(|items| items.iter().all(serde_json::Value::is_number))
                });
                RawParseOutput::Record { fields }
            }
            (Preprocess::NumericOnly, other @ (RawParseOutput::ArrayDict { .. } | RawParseOutput::Group(_))) => other,
            (step, other) => bail!("{:?} does not apply to {} output", step, other.kind()),
        };
    }
    Ok(output)
}
