//! Operator commands for sirius-search indices.
//!
//! Connects to an Elasticsearch cluster and runs maintenance tasks such as
//! health checks and reindexing into a new index prefix.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sirius_search::backends::elasticsearch::{
    ElasticsearchAuth, ElasticsearchConfig, ElasticsearchStore,
};
use sirius_search::{DocumentStore, Index, IndexConfig};
use tracing::info;

/// Command line of the `sirius-search` binary.
#[derive(Debug, Parser)]
#[command(name = "sirius-search")]
#[command(about = "Maintenance commands for sirius-search indices")]
struct Cli {
    /// Comma-separated Elasticsearch node URLs.
    #[arg(long, env = "SIRIUS_ES_NODES", default_value = "http://localhost:9200")]
    nodes: String,

    /// Username for basic authentication.
    #[arg(long, env = "SIRIUS_ES_USERNAME")]
    username: Option<String>,

    /// Password for basic authentication.
    #[arg(long, env = "SIRIUS_ES_PASSWORD")]
    password: Option<String>,

    /// Prefix of the physical indices to operate on.
    #[arg(long, env = "SIRIUS_INDEX_PREFIX", default_value = "")]
    index_prefix: String,

    /// Log level.
    #[arg(long, env = "SIRIUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Checks that the cluster is reachable and not red.
    Health,

    /// Lists the physical indices under the configured prefix.
    Indices,

    /// Copies every index under the configured prefix to a new prefix.
    Reindex {
        /// Prefix of the new indices.
        new_prefix: String,

        /// Seconds between progress reports.
        #[arg(long, default_value = "1")]
        poll_secs: u64,
    },
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sirius_search={0},sirius_search_cli={0}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn store_config(cli: &Cli) -> ElasticsearchConfig {
    let nodes: Vec<String> = cli
        .nodes
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let auth = match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Some(ElasticsearchAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    ElasticsearchConfig {
        nodes,
        auth,
        ..Default::default()
    }
}

async fn reindex(index: &Index, new_prefix: &str, poll: Duration) -> anyhow::Result<()> {
    let job_id = index.reindex(new_prefix);
    info!(job_id = %job_id, new_prefix = %new_prefix, "Reindex started");

    loop {
        tokio::time::sleep(poll).await;
        let Some(progress) = index.reindex_progress(&job_id) else {
            anyhow::bail!("Reindex job {} disappeared", job_id);
        };
        info!(
            status = ?progress.status,
            processed = progress.processed_indices,
            total = progress.total_indices,
            percentage = progress.percentage(),
            "Reindex progress"
        );
        if progress.status.is_finished() {
            println!("{}", serde_json::to_string_pretty(&progress)?);
            if progress.has_errors() {
                anyhow::bail!("Reindex finished with errors");
            }
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let store = Arc::new(ElasticsearchStore::new(store_config(&cli))?);
    let index = Index::new(
        store.clone(),
        IndexConfig::with_prefix(cli.index_prefix.clone()),
    );

    match &cli.command {
        Command::Health => {
            index.health_check().await?;
            println!("ok");
        }
        Command::Indices => {
            for name in store.list_indices(&cli.index_prefix.to_lowercase()).await? {
                println!("{}", name);
            }
        }
        Command::Reindex {
            new_prefix,
            poll_secs,
        } => {
            reindex(&index, new_prefix, Duration::from_secs((*poll_secs).max(1))).await?;
        }
    }

    Ok(())
}
