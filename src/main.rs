use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use news_integrity_data::api::ApiClient;
use news_integrity_data::config::Config;
use news_integrity_data::{
  logging, CacheStorage, CacheStore, ConnectivityMonitor, FallbackCatalog, FallbackContext,
  FallbackData, FallbackOptions, NoopStorage, SqliteStorage,
};

type Storage = Box<dyn CacheStorage>;

#[derive(Parser, Debug)]
#[command(name = "nidata")]
#[command(about = "Fetch News Integrity dashboard data with cache and offline fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/nidata/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Simulate a disconnected network: requests fail and the status reads offline
  #[arg(long, global = true)]
  offline: bool,

  /// Debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch data types, falling back to cache and bundled data on failure
  Fetch {
    /// Data types to fetch (default: every bundled data type)
    data_types: Vec<String>,

    /// Print the data itself, not just where it came from
    #[arg(long)]
    show_data: bool,
  },
  /// Inspect or clear the persisted cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Inspect the bundled fallback datasets
  Catalog {
    #[command(subcommand)]
    action: CatalogAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// List cached entries with their age
  Show,
  /// Remove one data type, or everything when none is given
  Clear { data_type: Option<String> },
}

#[derive(Subcommand, Debug)]
enum CatalogAction {
  /// List data types with bundled data
  List,
  /// Print the bundled data for a data type
  Show { data_type: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_file.as_deref(), args.verbose)?;

  let ctx = build_context(&config, !args.offline)?;

  match args.command {
    Command::Fetch {
      data_types,
      show_data,
    } => fetch(&config, &ctx, data_types, args.offline, show_data).await,
    Command::Cache { action } => {
      cache(&ctx, action);
      Ok(())
    }
    Command::Catalog { action } => catalog(&ctx, action),
  }
}

fn build_context(config: &Config, online: bool) -> Result<FallbackContext<Storage>> {
  let storage: Storage = if !config.cache.enabled {
    Box::new(NoopStorage)
  } else {
    let opened = match &config.cache.path {
      Some(path) => SqliteStorage::open_at(path),
      None => SqliteStorage::open(),
    };
    match opened {
      Ok(storage) => Box::new(storage),
      Err(e) => {
        // An unusable cache behaves like an empty one
        warn!(error = %e, "Cache unavailable, continuing without it");
        Box::new(NoopStorage)
      }
    }
  };

  let cache = CacheStore::new(storage)
    .with_prefix(config.cache.prefix.clone())
    .with_expiry(config.cache.expiry()?);

  let mut catalog = FallbackCatalog::builtin();
  if let Some(path) = &config.catalog_path {
    catalog = catalog.merge(FallbackCatalog::from_json_file(path)?);
  }

  Ok(FallbackContext::new(
    cache,
    Arc::new(catalog),
    ConnectivityMonitor::new(online),
  ))
}

async fn fetch(
  config: &Config,
  ctx: &FallbackContext<Storage>,
  data_types: Vec<String>,
  offline: bool,
  show_data: bool,
) -> Result<()> {
  let api = ApiClient::new(&config.api)?;
  let data_types = if data_types.is_empty() {
    ctx.catalog.data_types().into_iter().map(String::from).collect()
  } else {
    data_types
  };

  let options = FallbackOptions::default().with_cache_expiry(config.cache.expiry()?);
  let options = if config.cache.enabled {
    options
  } else {
    options.without_cache()
  };

  let tasks = data_types.into_iter().map(|data_type| {
    let mut handle: FallbackData<Value, Storage> =
      FallbackData::mount(&data_type, ctx, options.clone());
    let api = api.clone();
    let retry = config.retry.options();

    async move {
      let operation = move || {
        let api = api.clone();
        let data_type = data_type.clone();
        async move {
          if offline {
            return Err(eyre!("network disabled (--offline)"));
          }
          api.get::<Value>(&data_type).await
        }
      };
      handle.fetch(operation, retry);
      handle.settle().await;
      handle
    }
  });

  for handle in join_all(tasks).await {
    info!(
      data_type = handle.data_type(),
      source = ?handle.source(),
      "Fetch finished"
    );

    println!("{:<20} {}", handle.data_type(), handle.source().label());
    if let Some(notice) = handle.error() {
      println!("{:<20} {}", "", notice);
    }
    if show_data {
      println!(
        "{}",
        serde_json::to_string_pretty(handle.data().unwrap_or(&Value::Null))?
      );
    }
  }

  Ok(())
}

fn cache(ctx: &FallbackContext<Storage>, action: CacheAction) {
  match action {
    CacheAction::Show => {
      let data_types = ctx.cache.data_types();
      if data_types.is_empty() {
        println!("Cache is empty");
        return;
      }
      for data_type in data_types {
        match ctx.cache.inspect(&data_type) {
          Some(info) => println!(
            "{:<20} {}  age {}m  {} bytes{}",
            info.data_type,
            info.timestamp.format("%Y-%m-%d %H:%M:%S"),
            info.age.num_minutes(),
            info.size,
            if info.expired { "  (expired)" } else { "" }
          ),
          None => println!("{:<20} (unreadable)", data_type),
        }
      }
    }
    CacheAction::Clear {
      data_type: Some(data_type),
    } => {
      ctx.cache.clear(&data_type);
      println!("Cleared {}", data_type);
    }
    CacheAction::Clear { data_type: None } => {
      let removed = ctx.cache.clear_all();
      println!("Cleared {} entries", removed);
    }
  }
}

fn catalog(ctx: &FallbackContext<Storage>, action: CatalogAction) -> Result<()> {
  match action {
    CatalogAction::List => {
      for data_type in ctx.catalog.data_types() {
        println!("{}", data_type);
      }
    }
    CatalogAction::Show { data_type } => {
      let data = ctx
        .catalog
        .lookup(&data_type)
        .ok_or_else(|| eyre!("No bundled data for '{}'", data_type))?;
      println!("{}", serde_json::to_string_pretty(data)?);
    }
  }
  Ok(())
}
