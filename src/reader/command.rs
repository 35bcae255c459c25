use super::{Arguments, FormatReader, LoadedReader};
use crate::process::{expand_tilde, run_json};
use crate::raw::RawParseOutput;
use anyhow::{anyhow, bail, Result};

/// Runs an external helper that prints a tagged raw output as JSON on stdout.
///
/// Call shape: `function = "run"`, `args = [program, arg...]` (the path
/// placeholder is substituted before this sees them), optional
/// `kwargs.timeout_seconds`. Construct shape: `init_args.program`,
/// `init_args.args` (array), `load_method = "run"`.
pub struct CommandReader {
    default_timeout: u64,
}

impl CommandReader {
    pub fn new(default_timeout: u64) -> Self {
        Self { default_timeout }
    }

    fn timeout(&self, args: &Arguments) -> Option<u64> {
        let secs = args
            .int_named("timeout_seconds")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(self.default_timeout);
        (secs > 0).then_some(secs)
    }
}

fn stringify(v: &toml::Value) -> String {
    match v {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn run(program: &str, args: &[String], timeout: Option<u64>) -> Result<RawParseOutput> {
    let program = expand_tilde(program);
    run_json(&program.display().to_string(), args, timeout)
}

struct CommandInstance {
    program: String,
    args: Vec<String>,
    timeout: Option<u64>,
}

impl LoadedReader for CommandInstance {
    fn load(&mut self, method: &str) -> Result<RawParseOutput> {
        match method {
            "run" => run(&self.program, &self.args, self.timeout),
            other => bail!("command reader has no load method '{other}'"),
        }
    }
}

impl FormatReader for CommandReader {
    fn construct(&self, init: &Arguments) -> Result<Box<dyn LoadedReader>> {
        let program = init
            .str_named("program")
            .ok_or_else(|| anyhow!("init_args.program is required"))?
            .to_string();
        let args = match init.named.get("args") {
            Some(toml::Value::Array(items)) => items.iter().map(stringify).collect(),
            Some(other) => bail!("init_args.args must be an array, got {other}"),
            None => Vec::new(),
        };
        Ok(Box::new(CommandInstance {
            program,
            args,
            timeout: self.timeout(init),
        }))
    }

    fn call(&self, function: &str, args: &Arguments) -> Result<RawParseOutput> {
        if function != "run" {
            bail!("command reader has no function '{function}'");
        }
        let (program, rest) = args
            .positional
            .split_first()
            .ok_or_else(|| anyhow!("first argument must be the program"))?;
        let rest: Vec<String> = rest.iter().map(stringify).collect();
        run(&stringify(program), &rest, self.timeout(args))
    }
}
