//! # Arbor CLI
//!
//! Build, query and inspect Arbor indexes from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbor_core::{IndexConfig, ItemId, MetricKind};
use arbor_index::{create_kind, AnnIndex};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(version, about = "Arbor - approximate nearest-neighbor search with random projection forests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a text file of vectors
    Build(BuildArgs),
    /// Query a saved index
    Query(QueryArgs),
    /// Print index statistics
    Info(IndexArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// angular, euclidean, manhattan, dot or hamming
    #[arg(long)]
    metric: MetricKind,
    /// Vector dimension
    #[arg(long)]
    dim: usize,
    /// Index file
    #[arg(long)]
    index: PathBuf,
    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    metric: MetricKind,
    #[arg(long)]
    dim: usize,
    /// One vector per line, whitespace separated; the line number is the item id
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Number of trees (-1 picks one from the item count)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    trees: i32,
    /// Build threads (-1 for all cores)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    threads: i32,
    #[arg(long)]
    seed: Option<u64>,
    /// Write the index to `output` while building
    #[arg(long)]
    on_disk: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    index: IndexArgs,
    /// Query by stored item
    #[arg(long, conflicts_with = "vector")]
    item: Option<ItemId>,
    /// Query by vector, e.g. "0.1 0.2 0.3"
    #[arg(long, allow_hyphen_values = true)]
    vector: Option<String>,
    /// Number of neighbors
    #[arg(short, long, default_value_t = 10)]
    n: usize,
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    search_k: i32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => run_build(&args),
        Commands::Query(args) => {
            for line in run_query(&args)? {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Info(args) => {
            println!("{}", run_info(&args)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<IndexConfig> {
    let Some(path) = path else {
        return Ok(IndexConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: IndexConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

fn open_index(metric: MetricKind, dim: usize, config: Option<&Path>) -> Result<Box<dyn AnnIndex>> {
    let config = load_config(config)?;
    Ok(create_kind(dim, metric, &config)?)
}

fn parse_vector(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|x| x.parse::<f32>().with_context(|| format!("Invalid number {:?}", x)))
        .collect()
}

/// Items from a vector file; blank lines are skipped but still consume an id
fn read_vectors(path: &Path) -> Result<Vec<(ItemId, Vec<f32>)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut items = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let vector = parse_vector(line).with_context(|| format!("line {}", line_no + 1))?;
        items.push((line_no as ItemId, vector));
    }
    Ok(items)
}

fn run_build(args: &BuildArgs) -> Result<()> {
    let mut index = open_index(args.metric, args.dim, args.config.as_deref())?;
    if let Some(seed) = args.seed {
        index.set_seed(seed);
    }
    if args.on_disk {
        index.on_disk_build(&args.output)?;
    }

    let items = read_vectors(&args.input)?;
    for (item, vector) in &items {
        index
            .add_item(*item, vector)
            .with_context(|| format!("Failed to add item {}", item))?;
    }

    index.build(args.trees, args.threads)?;
    index.save(&args.output, false)?;
    info!(
        output = %args.output.display(),
        n_items = index.get_n_items(),
        n_trees = index.get_n_trees(),
        "Index saved"
    );
    Ok(())
}

fn run_query(args: &QueryArgs) -> Result<Vec<String>> {
    let target = &args.index;
    let mut index = open_index(target.metric, target.dim, target.config.as_deref())?;
    index.load(&target.index, false)?;

    let nns = match (args.item, &args.vector) {
        (Some(item), None) => index.get_nns_by_item(item, args.n, args.search_k, true)?,
        (None, Some(text)) => {
            let vector = parse_vector(text)?;
            index.get_nns_by_vector(&vector, args.n, args.search_k, true)?
        }
        _ => bail!("Pass exactly one of --item or --vector"),
    };

    let distances = nns.distances.unwrap_or_default();
    Ok(nns
        .ids
        .iter()
        .zip(distances.iter())
        .map(|(id, d)| format!("{}\t{}", id, d))
        .collect())
}

fn run_info(args: &IndexArgs) -> Result<String> {
    let mut index = open_index(args.metric, args.dim, args.config.as_deref())?;
    index.load(&args.index, false)?;
    Ok(format!(
        "metric: {}\ndimension: {}\nitems: {}\ntrees: {}",
        index.metric(),
        index.dimension(),
        index.get_n_items(),
        index.get_n_trees()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_vectors(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("vectors.txt");
        let lines: Vec<String> = (0..30).map(|i| format!("{} {} 1.0", i, i % 5)).collect();
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn build_args(dir: &TempDir, on_disk: bool) -> BuildArgs {
        BuildArgs {
            metric: MetricKind::Euclidean,
            dim: 3,
            input: write_vectors(dir),
            output: dir.path().join("index.arb"),
            trees: 4,
            threads: 1,
            seed: Some(5),
            on_disk,
            config: None,
        }
    }

    fn index_args(dir: &TempDir) -> IndexArgs {
        IndexArgs {
            metric: MetricKind::Euclidean,
            dim: 3,
            index: dir.path().join("index.arb"),
            config: None,
        }
    }

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector(" 1 -2.5\t3 ").unwrap(), vec![1.0, -2.5, 3.0]);
        assert!(parse_vector("1 x").is_err());
    }

    #[test]
    fn test_blank_lines_keep_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.txt");
        fs::write(&path, "1 1\n\n2 2\n").unwrap();
        let items = read_vectors(&path).unwrap();
        assert_eq!(items, vec![(0, vec![1.0, 1.0]), (2, vec![2.0, 2.0])]);
    }

    #[test]
    fn test_build_query_info() {
        let dir = TempDir::new().unwrap();
        run_build(&build_args(&dir, false)).unwrap();

        let info = run_info(&index_args(&dir)).unwrap();
        assert!(info.contains("items: 30"));
        assert!(info.contains("trees: 4"));

        let lines = run_query(&QueryArgs {
            index: index_args(&dir),
            item: Some(7),
            vector: None,
            n: 3,
            search_k: -1,
        })
        .unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "7\t0");
    }

    #[test]
    fn test_on_disk_build_then_query_by_vector() {
        let dir = TempDir::new().unwrap();
        run_build(&build_args(&dir, true)).unwrap();

        let lines = run_query(&QueryArgs {
            index: index_args(&dir),
            item: None,
            vector: Some("12 2 1".to_string()),
            n: 1,
            search_k: -1,
        })
        .unwrap();
        assert_eq!(lines, vec!["12\t0".to_string()]);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"build": {"leaf_size": 8}}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.build.leaf_size, Some(8));

        fs::write(&path, r#"{"build": {"leaf_size": 0}}"#).unwrap();
        assert!(open_index(MetricKind::Angular, 4, Some(&path)).is_err());
    }
}
