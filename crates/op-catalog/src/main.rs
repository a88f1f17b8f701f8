//! op-catalog: command line client for the merged API catalog

use anyhow::Context;
use clap::{Parser, Subcommand};
use op_catalog::{CatalogAggregator, CatalogConfig, CatalogSource, EndpointQuery, ImportRequest};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "op-catalog")]
#[command(about = "Query the merged primary, secondary and custom API catalogs")]
struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bypass the cache for this run
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every provider
    Providers,
    /// APIs published by one provider
    Provider { provider: String },
    /// Services of one provider
    Services { provider: String },
    /// One API version
    Api { provider: String, api: String },
    /// One service API version
    ServiceApi {
        provider: String,
        service: String,
        api: String,
    },
    /// Paginated listing of every API
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Aggregate catalog metrics
    Metrics,
    /// Search by id, title, description, provider or category
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Most popular APIs
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Most recently updated APIs
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Catalog overview
    Summary,
    /// Raw OpenAPI document for an id
    Spec { id: String },
    /// Endpoints of an API
    Endpoints {
        id: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Import a local spec file into the custom catalog
    Import {
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        /// Catalog id this spec shadows
        #[arg(long)]
        replaces: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove a custom spec by id
    Remove { id: String },
    /// Check the manifest against the blobs on disk
    Integrity {
        #[arg(long)]
        repair: bool,
    },
    /// Recompute providers, metrics and the full listing
    Warm,
    /// Cache statistics
    CacheStats,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    op_core::config::load_environment();

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,op_catalog=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CatalogConfig::load(path)?,
        None => CatalogConfig::load_default()?,
    };
    if cli.no_cache {
        config.cache.enabled = false;
    }

    let catalog = CatalogAggregator::from_config(&config).await?;

    match cli.command {
        Command::Providers => print_json(&catalog.get_providers().await?)?,
        Command::Provider { provider } => print_json(&catalog.get_provider(&provider).await?)?,
        Command::Services { provider } => print_json(&catalog.get_services(&provider).await?)?,
        Command::Api { provider, api } => print_json(&catalog.get_api(&provider, &api).await?)?,
        Command::ServiceApi {
            provider,
            service,
            api,
        } => print_json(&catalog.get_service_api(&provider, &service, &api).await?)?,
        Command::List { page, limit } => print_json(&catalog.get_paginated_apis(page, limit).await?)?,
        Command::Metrics => print_json(&catalog.get_metrics().await?)?,
        Command::Search { query, page, limit } => {
            print_json(&catalog.search_apis(&query, page, limit).await?)?
        }
        Command::Popular { limit } => print_json(&catalog.get_popular_apis(limit).await?)?,
        Command::Recent { limit } => print_json(&catalog.get_recently_updated(limit).await?)?,
        Command::Summary => print_json(&catalog.get_api_summary().await?)?,
        Command::Spec { id } => print_json(&catalog.get_openapi_spec(&id).await?)?,
        Command::Endpoints {
            id,
            page,
            limit,
            tag,
        } => {
            let mut query = EndpointQuery::new(page, limit);
            if let Some(tag) = tag {
                query = query.with_tag(&tag);
            }
            print_json(&catalog.get_api_endpoints(&id, &query).await?)?
        }
        Command::Import {
            file,
            name,
            version,
            replaces,
            overwrite,
        } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut request = ImportRequest::new(&name, &version, content).overwrite(overwrite);
            if let Some(id) = replaces {
                request = request.replacing(&id);
            }
            let entry = catalog.import_custom_spec(request).await?;
            info!("Imported {}", entry.id);
            print_json(&entry)?
        }
        Command::Remove { id } => print_json(&catalog.remove_custom_spec(&id).await?)?,
        Command::Integrity { repair } => {
            let manifest = catalog.custom().manifest();
            if repair {
                print_json(&manifest.repair_integrity().await)?
            } else {
                let report = manifest.validate_integrity().await;
                if !report.valid {
                    warn!("Manifest has {} integrity issues", report.issues.len());
                }
                print_json(&report)?
            }
        }
        Command::Warm => {
            let warmed = catalog.warm_critical_caches().await;
            print_json(&serde_json::json!({ "warmed": warmed }))?
        }
        Command::CacheStats => print_json(&catalog.cache_stats().await)?,
    }

    if let Some(path) = &config.cache.snapshot_path {
        if let Err(e) = catalog.save_snapshot(path).await {
            warn!("Failed to save cache snapshot: {}", e);
        }
    }

    Ok(())
}
