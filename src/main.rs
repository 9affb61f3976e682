//! Strata CLI
//!
//! Command-line interface for the Strata query core:
//! - Print a default config file
//! - Run a synthetic query through the engine
//! - Inspect a saved row cache

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata::config::{generate_default_config, Config, LoggingConfig};
use strata::datapoints::{
    CodecRegistry, DataPoint, DataPointGroup, GroupByResult, TagContext, TagSet,
};
use strata::query::{
    GroupByStrategy, MemoryStore, Order, QueryDescriptor, QueryEngine, TimeRange,
};
use strata::storage::RowCache;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_METRIC: &str = "demo.cpu";

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-series query core: spill caches, group-by partitioning, admission control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a synthetic multi-series query and print the merged result
    Demo {
        /// Number of series
        #[arg(long, default_value_t = 3)]
        series: usize,
        /// Points per series
        #[arg(long, default_value_t = 10)]
        points: usize,
        /// Modulo group-by bucket count (0 disables grouping)
        #[arg(long, default_value_t = 2)]
        buckets: i32,
        /// Output order (asc, desc)
        #[arg(long, default_value = "asc")]
        order: Order,
        /// Keep the merged result as a cache file at this path
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Dump the rows of a saved cache
    Inspect {
        /// Cache data file (its .idx sidecar must sit next to it)
        path: PathBuf,
        /// Points to print per row
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Buckets points by `(timestamp / 1s) % buckets`
struct ModuloGroupBy {
    buckets: i32,
}

impl GroupByStrategy for ModuloGroupBy {
    fn group_id(&self, point: &DataPoint, _tags: &TagContext) -> i32 {
        (point.timestamp() / 1000).rem_euclid(i64::from(self.buckets)) as i32
    }

    fn describe(&self, id: i32) -> GroupByResult {
        GroupByResult::new("modulo", json!({ "bucket": id, "buckets": self.buckets }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }
        Commands::Demo {
            series,
            points,
            buckets,
            order,
            save,
        } => run_demo(config, series, points, buckets, order, save.as_deref()).await?,
        Commands::Inspect { path, limit } => inspect(&path, limit)?,
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("strata={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn synthetic_store(series: usize, points: usize, start: i64) -> MemoryStore {
    let mut store = MemoryStore::new();
    for s in 0..series {
        let tags = TagSet::new()
            .with("host", format!("host-{}", s))
            .with("dc", if s % 2 == 0 { "east" } else { "west" });
        let data = (0..points)
            .map(|p| {
                let timestamp = start + (p as i64) * 1000 + s as i64;
                if s % 2 == 0 {
                    DataPoint::long(timestamp, (p * (s + 1)) as i64)
                } else {
                    DataPoint::double(timestamp, p as f64 / (s + 1) as f64)
                }
            })
            .collect();
        store.insert(DEMO_METRIC, tags, data);
    }
    store
}

async fn run_demo(
    config: Config,
    series: usize,
    points: usize,
    buckets: i32,
    order: Order,
    save: Option<&Path>,
) -> Result<()> {
    let start = Utc::now().timestamp_millis() / 1000 * 1000;
    let store = synthetic_store(series, points, start);
    let engine = QueryEngine::new(config.engine, Arc::new(store))?;

    let range = TimeRange::new(start, start + (points as i64 + 1) * 1000)?;
    let query = QueryDescriptor::new(DEMO_METRIC, range).order(order);

    let strategies: Vec<Arc<dyn GroupByStrategy>> = if buckets > 0 {
        vec![Arc::new(ModuloGroupBy { buckets })]
    } else {
        Vec::new()
    };

    let mut output = engine.execute(query, strategies).await?;
    println!("query {} -> {} group(s)", output.hash(), output.groups().len());
    for group in output.groups() {
        let results: Vec<_> = group.group_by_results().iter().map(|r| r.to_json()).collect();
        println!("  {} {} {}", group.name(), group.tags(), serde_json::Value::from(results));
    }

    let mut saved = match save {
        Some(path) => Some(
            RowCache::create(DEMO_METRIC, path, Arc::clone(engine.registry()))
                .with_context(|| format!("creating {}", path.display()))?
                .keep_on_close(),
        ),
        None => None,
    };

    let mut merged = output.merged();
    let merged_tags = merged.tags().clone();
    let mut count = 0usize;
    for point in merged.by_ref() {
        println!("{}  {:<8} {}", format_timestamp(point.timestamp()), point.api_type(), point.json_value());
        if let Some(cache) = saved.as_mut() {
            if count == 0 {
                cache.begin_row(point.data_store_type(), merged_tags.clone())?;
            }
            cache.append(&point)?;
        }
        count += 1;
    }
    merged.close();

    if let Some(mut cache) = saved {
        if count > 0 {
            cache.finish_row()?;
        }
        cache.close()?;
        println!("saved {} point(s) to {}", count, cache.path().display());
    }

    let admission = engine.admission();
    println!(
        "{} point(s); running={} waiting={} collisions={} permits={}",
        count,
        admission.running_count(),
        admission.waiting_count(),
        admission.collision_count(),
        admission.available_permits()
    );
    output.close()?;
    println!("after close: permits={}", admission.available_permits());
    Ok(())
}

fn inspect(path: &Path, limit: usize) -> Result<()> {
    let registry = Arc::new(CodecRegistry::with_defaults());
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut cache = RowCache::open(name, path, 0, registry)
        .with_context(|| format!("opening cache {}", path.display()))?
        .keep_on_close();

    println!(
        "{}: {} row(s), {} point(s), {} byte(s), types {:?}",
        path.display(),
        cache.row_count(),
        cache.point_count(),
        cache.bytes_written(),
        cache.type_tags()
    );

    for (i, mut reader) in cache.get_rows()?.into_iter().enumerate() {
        let meta = reader.meta().clone();
        println!(
            "row {} {} type={} points={} offset={} length={}",
            i, meta.tags, meta.type_tag, meta.point_count, meta.offset, meta.length
        );
        for point in reader.by_ref().take(limit) {
            println!("  {}  {:<8} {}", format_timestamp(point.timestamp()), point.api_type(), point.json_value());
        }
        if reader.is_corrupt() {
            println!("  (row is corrupt, remaining points unreadable)");
        } else if reader.remaining() > 0 {
            println!("  ... {} more", reader.remaining());
        }
    }

    cache.close()?;
    Ok(())
}
