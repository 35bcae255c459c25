use crate::{
    config::Config,
    descriptor::DescriptorStore,
    imaging::CommandImagingConverter,
    pipeline::BatchOrchestrator,
    reader::{ReaderInvoker, ReaderRegistry},
    select::MappingSelector,
    source,
    transform,
    util::ensure_dir,
    writer::{read_container, StandardizedWriter, WriteOptions},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "sigfuse")]
#[command(about = "Descriptor-driven conversion of recordings into standardized containers")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./sigfuse.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Descriptors {},
    Match {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        collection_key: Option<u64>,
    },
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// archive | zarr | zarr.tar | hdf5 (hdf5 needs --features storage_hdf5)
        #[arg(long)]
        container: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    Batch {
        #[arg(long)]
        collection: String,
        /// Relative paths; defaults to every primary file of the collection.
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// archive | zarr | zarr.tar | hdf5 (hdf5 needs --features storage_hdf5)
        #[arg(long)]
        container: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Group collections of the configured source by their declared type.
    List {
        /// Collections to look up; defaults to every collection the source lists.
        #[arg(long = "collection")]
        collections: Vec<String>,
        /// Skip numeric ids above this bound.
        #[arg(long)]
        max_id: Option<u64>,
    },
    Inspect {
        #[arg(long)]
        container: PathBuf,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let mut cfg = match &cfg_path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Convert {
            out_dir,
            container,
            overwrite,
            ..
        }
        | Command::Batch {
            out_dir,
            container,
            overwrite,
            ..
        } => apply_overrides(&mut cfg, out_dir.as_deref(), container.as_deref(), *overwrite),
        _ => {}
    }

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
    match &cfg_path {
        Some(p) => info!("config {}", p.display()),
        None => info!("no config file found; using defaults"),
    }

    if cfg.debug.dump_effective_config {
        ensure_dir(Path::new(&cfg.paths.out_dir))?;
        let raw = toml::to_string(&cfg).unwrap_or_default();
        std::fs::write(Path::new(&cfg.paths.out_dir).join("effective-config.toml"), raw)?;
    }

    match &args.cmd {
        Command::Descriptors {} => descriptors(&cfg),
        Command::Match {
            input,
            collection_key,
        } => match_file(&cfg, input, *collection_key),
        Command::Convert { input, .. } => convert(&cfg, input),
        Command::Batch {
            collection, paths, ..
        } => batch(&cfg, collection, paths),
        Command::List {
            collections,
            max_id,
        } => list(&cfg, collections, *max_id),
        Command::Inspect { container } => inspect(container),
    }
}

fn apply_overrides(cfg: &mut Config, out_dir: Option<&Path>, container: Option<&str>, overwrite: bool) {
    if let Some(dir) = out_dir {
        cfg.paths.out_dir = dir.display().to_string();
    }
    if let Some(kind) = container {
        cfg.output.container = kind.to_string();
    }
    if overwrite {
        cfg.global.overwrite = true;
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["sigfuse.toml", "sigfuse.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("sigfuse.log"))
}

fn load_store(cfg: &Config) -> Result<DescriptorStore> {
    let store = DescriptorStore::load_dir(Path::new(&cfg.paths.descriptors_dir))?;
    if store.is_empty() {
        bail!("no descriptors loaded from {}", cfg.paths.descriptors_dir);
    }
    Ok(store)
}

fn print_json(v: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn descriptors(cfg: &Config) -> Result<()> {
    let store = load_store(cfg)?;
    let registry = ReaderRegistry::with_builtins(cfg);
    let list: Vec<_> = store
        .all()
        .iter()
        .map(|d| {
            serde_json::json!({
                "id": d.id,
                "collection_key": d.collection_key,
                "formats": d.format.extensions().collect::<Vec<_>>(),
                "reader": d.parser.reader,
                "mode": if d.uses_transform() { "transform" } else { "declarative" },
                "required_fields": d.required_fields(),
            })
        })
        .collect();
    print_json(&serde_json::json!({
        "descriptors": list,
        "readers": registry.names(),
        "transforms": transform::names().collect::<Vec<_>>(),
    }))
}

fn match_file(cfg: &Config, input: &Path, collection_key: Option<u64>) -> Result<()> {
    if !input.is_file() {
        bail!("input does not exist: {}", input.display());
    }
    let store = load_store(cfg)?;
    let registry = ReaderRegistry::with_builtins(cfg);
    let selection =
        MappingSelector::new(&store, ReaderInvoker::new(&registry)).select(input, collection_key);
    let best = selection.best.as_ref().map(|b| {
        serde_json::json!({
            "descriptor_id": b.descriptor.id,
            "score": b.score,
            "channels": b.result.channel_count(),
            "samples": b.result.sample_count(),
            "sampling_frequency": b.result.sampling_frequency,
            "channel_names": b.result.channel_names,
            "time_auto_generated": b.result.time_auto_generated(),
        })
    });
    print_json(&serde_json::json!({
        "input": input,
        "candidate_source": selection.source,
        "score": selection.score(),
        "best": best,
        "attempts": selection.attempts,
    }))
}

fn build_writer(cfg: &Config) -> Result<StandardizedWriter> {
    Ok(StandardizedWriter::new(WriteOptions::from_config(cfg)?))
}

fn convert(cfg: &Config, input: &Path) -> Result<()> {
    if !input.is_file() {
        bail!("input does not exist: {}", input.display());
    }
    let store = load_store(cfg)?;
    let registry = ReaderRegistry::with_builtins(cfg);
    let imaging = CommandImagingConverter::from_config(cfg);
    let orchestrator = BatchOrchestrator::new(cfg, &store, &registry, &imaging, build_writer(cfg)?);

    let rec = orchestrator.convert_local(input);
    if cfg.global.print_summary {
        print_json(&rec)?;
    }
    if rec.is_ok() {
        return Ok(());
    }
    Err(anyhow!(rec.error.unwrap_or_else(|| "conversion failed".to_string())))
}

fn batch(cfg: &Config, collection: &str, paths: &[String]) -> Result<()> {
    let store = load_store(cfg)?;
    let registry = ReaderRegistry::with_builtins(cfg);
    let imaging = CommandImagingConverter::from_config(cfg);
    let source = source::from_config(cfg)?;
    let orchestrator = BatchOrchestrator::new(cfg, &store, &registry, &imaging, build_writer(cfg)?);

    let paths = (!paths.is_empty()).then(|| paths.to_vec());
    let outcome = orchestrator.run_collection(source.as_ref(), collection, paths)?;

    if cfg.output.write_batch_report {
        let path = orchestrator.write_report(&outcome)?;
        info!("batch report {}", path.display());
    }
    if cfg.global.print_summary {
        print_json(&serde_json::json!({
            "collection_id": outcome.collection_id,
            "out_dir": orchestrator.out_dir(),
            "summary": outcome.summary(),
            "fetches": outcome.session.fetches,
        }))?;
    }
    Ok(())
}

fn list(cfg: &Config, collections: &[String], max_id: Option<u64>) -> Result<()> {
    let source = source::from_config(cfg)?;
    let mut ids = if collections.is_empty() {
        source.list_collections()?
    } else {
        collections.to_vec()
    };
    if let Some(max) = max_id {
        ids.retain(|id| id.parse::<u64>().map_or(true, |n| n <= max));
    }
    let groups = source.collections_by_type(&ids);
    for (kind, members) in &groups {
        info!("{kind}: {}", members.len());
    }
    print_json(&groups)
}

fn inspect(container: &Path) -> Result<()> {
    let stored = read_container(container)?;
    print_json(&serde_json::json!({
        "container": container,
        "summary": stored.summary(),
        "metadata": stored.metadata,
        "annotations": stored.parsed_annotations(),
    }))
}
