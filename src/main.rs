use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use resq::{
  CacheBackend, CacheLayer, Config, Endpoint, EndpointConfig, EndpointError, InMemorySource,
  RawParams, Record, Registry,
};

#[derive(Parser, Debug)]
#[command(name = "resq")]
#[command(about = "Answer filter/sort/paginate queries over a JSON dataset")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./resq.yaml or $XDG_CONFIG_HOME/resq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// JSON file mapping resource names to arrays of records
  #[arg(short, long)]
  data: PathBuf,

  /// Resource to query (may be omitted when only one is configured)
  #[arg(short, long)]
  resource: Option<String>,

  /// Fetch a single record by primary key instead of listing
  #[arg(long)]
  show: Option<String>,

  /// Query string, e.g. "filter[name]=contains:al&sort=name:asc&page=2"
  query: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = resq::logging::init(&config.log)?;

  let dataset = load_dataset(&args.data)?;

  let storage = Arc::new(CacheBackend::from_config(&config.cache)?);
  let cache = CacheLayer::from_arc(storage);
  let _sweeper = config
    .cache
    .sweep_interval()
    .map(|every| cache.spawn_sweeper(every));

  let registry = build_registry(&config, &dataset, &cache);
  let resource = match args.resource {
    Some(name) => name,
    None => {
      let names: Vec<&str> = registry.names().collect();
      match names.as_slice() {
        [only] => only.to_string(),
        _ => return Err(eyre!("Pass --resource; configured: {}", names.join(", "))),
      }
    }
  };
  let endpoint = registry
    .get(&resource)
    .ok_or_else(|| eyre!("Unknown resource `{}`", resource))?;

  let raw = RawParams::from_query_string(args.query.as_deref().unwrap_or(""));
  match &args.show {
    Some(id) => report(endpoint.show(id, &raw).await.map(|r| r.to_json())),
    None => report(endpoint.index(&raw).await),
  }
}

/// Print the success value, or the error response and fail.
fn report<T: Serialize>(outcome: std::result::Result<T, EndpointError>) -> Result<()> {
  match outcome {
    Ok(value) => print_json(&value),
    Err(err) => {
      print_json(&err.to_response())?;
      Err(eyre!("Request failed: {}", err))
    }
  }
}

type Dataset = BTreeMap<String, Vec<Record>>;

fn load_dataset(path: &Path) -> Result<Dataset> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read data file {}: {}", path.display(), e))?;
  let raw: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse data file {}: {}", path.display(), e))?;

  raw
    .into_iter()
    .map(|(name, rows)| {
      let records = rows
        .into_iter()
        .map(|row| {
          Record::from_json(row)
            .ok_or_else(|| eyre!("Resource `{}`: every record must be an object", name))
        })
        .collect::<Result<Vec<_>>>()?;
      Ok((name, records))
    })
    .collect()
}

fn build_registry(
  config: &Config,
  dataset: &Dataset,
  cache: &CacheLayer<CacheBackend>,
) -> Registry<CacheBackend> {
  let endpoint_config = EndpointConfig::from(config);
  let mut registry = Registry::new();

  for (name, schema) in &config.resources {
    let mut source = InMemorySource::new(dataset.get(name).cloned().unwrap_or_default());
    for (relation_name, relation) in &schema.relations {
      let target = relation.resource.as_deref().unwrap_or(relation_name);
      let related = dataset.get(target).cloned().unwrap_or_default();
      source = source.with_relation(relation_name, related);
    }
    registry.register(Endpoint::new(
      schema.clone(),
      Arc::new(source),
      cache.clone(),
      endpoint_config.clone(),
    ));
  }

  registry
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", text);
  Ok(())
}
