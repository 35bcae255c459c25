use super::{Arguments, FormatReader, LoadedReader};
use crate::raw::{Column, RawParseOutput, Table, TableColumn};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

/// Delimited text with an optional header row. Numeric columns keep blanks as NaN.
pub struct CsvReader;

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub has_header: bool,
    pub skip_rows: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            skip_rows: 0,
        }
    }
}

impl CsvOptions {
    fn from_args(args: &Arguments) -> Result<Self> {
        let mut opts = Self::default();
        if let Some(d) = args.str_named("delimiter").or_else(|| args.str_named("sep")) {
            opts.delimiter = match d {
                "\\t" | "\t" => b'\t',
                s if s.len() == 1 => s.as_bytes()[0],
                other => bail!("delimiter must be a single byte, got {other:?}"),
            };
        }
        // `header = 0` means "first row is the header"; `header = false` means none.
        match args.named.get("header") {
            Some(toml::Value::Boolean(b)) => opts.has_header = *b,
            Some(toml::Value::Integer(0)) => opts.has_header = true,
            Some(toml::Value::Integer(_)) => bail!("only header = 0 is supported"),
            _ => {}
        }
        if let Some(has_header) = args.bool_named("has_header") {
            opts.has_header = has_header;
        }
        if let Some(n) = args.int_named("skip_rows") {
            opts.skip_rows = usize::try_from(n).map_err(|_| anyhow!("skip_rows must be >= 0"))?;
        }
        Ok(opts)
    }
}

pub fn read_table(path: &Path, opts: &CsvOptions) -> Result<Table> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut records = rdr.records().skip(opts.skip_rows);
    let header: Vec<String> = if opts.has_header {
        match records.next() {
            Some(rec) => rec
                .with_context(|| "reading header row")?
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            None => bail!("empty file: {}", path.display()),
        }
    } else {
        Vec::new()
    };

    let mut cells: Vec<Vec<String>> = Vec::new();
    for (row, rec) in records.enumerate() {
        let rec = rec.with_context(|| format!("reading row {row}"))?;
        if cells.len() < rec.len() {
            cells.resize_with(rec.len(), Vec::new);
        }
        for (i, cell) in rec.iter().enumerate() {
            let col = &mut cells[i];
            // pad columns that were short on earlier rows
            col.resize(row, String::new());
            col.push(cell.trim().to_string());
        }
    }
    let rows = cells.iter().map(Vec::len).max().unwrap_or(0);

    let columns = cells
        .into_iter()
        .enumerate()
        .map(|(i, mut raw)| {
            raw.resize(rows, String::new());
            let name = header
                .get(i)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column_{i}"));
            TableColumn {
                name,
                values: classify(raw),
            }
        })
        .collect();

    Ok(Table { columns })
}

fn classify(raw: Vec<String>) -> Column {
    let parsed: Option<Vec<f64>> = raw
        .iter()
        .map(|s| {
            if s.is_empty() {
                Some(f64::NAN)
            } else {
                s.parse::<f64>().ok()
            }
        })
        .collect();
    match parsed {
        Some(v) if !raw.iter().all(String::is_empty) => Column::Numeric(v),
        _ => Column::Text(raw),
    }
}

struct CsvInstance {
    path: PathBuf,
    opts: CsvOptions,
}

impl LoadedReader for CsvInstance {
    fn load(&mut self, method: &str) -> Result<RawParseOutput> {
        match method {
            "read" | "load" | "read_all" => Ok(RawParseOutput::Tabular(read_table(&self.path, &self.opts)?)),
            other => bail!("csv reader has no load method '{other}'"),
        }
    }
}

impl FormatReader for CsvReader {
    fn construct(&self, init: &Arguments) -> Result<Box<dyn LoadedReader>> {
        Ok(Box::new(CsvInstance {
            path: init.path()?,
            opts: CsvOptions::from_args(init)?,
        }))
    }

    fn call(&self, function: &str, args: &Arguments) -> Result<RawParseOutput> {
        match function {
            "read_csv" | "read" => {
                let opts = CsvOptions::from_args(args)?;
                Ok(RawParseOutput::Tabular(read_table(&args.path()?, &opts)?))
            }
            other => bail!("csv reader has no function '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn numeric_and_text_columns_are_separated() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "time,label,v (mV)").unwrap();
        writeln!(f, "0.0,a,1.5").unwrap();
        writeln!(f, "0.1,b,").unwrap();
        let t = read_table(f.path(), &CsvOptions::default()).unwrap();
        assert_eq!(t.names(), vec!["time", "label", "v (mV)"]);
        assert!(matches!(t.columns[1].values, Column::Text(_)));
        let v = t.columns[2].values.as_numeric().unwrap();
        assert_eq!(v[0], 1.5);
        assert!(v[1].is_nan());
    }
}
