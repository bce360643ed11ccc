use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::commit::PublishCommitCoordinator;
use crate::config::Settings;
use crate::contract::Session;
use crate::load_config::load_config;
use crate::model::{NewItem, PublishState};
use crate::pool::ClientPoolRegistry;
use crate::publish::request_commit;
use crate::s3::S3ClientFactory;
use crate::store::JsonFileStore;

/// CLI for exodus-publish: commit publishes and generate repository indexes.
#[derive(Parser)]
#[clap(
    name = "exodus-publish",
    version,
    about = "Resolve links, autoindex repositories and commit CDN publishes"
)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[clap(long, global = true)]
    pub json_logs: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request commit of a PENDING publish and run the commit job
    Commit {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Path to the JSON publish store
        #[clap(long)]
        store: PathBuf,
        /// ID of the publish to commit
        #[clap(long)]
        publish: Uuid,
    },
    /// Generate missing repository indexes for a publish
    Autoindex {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Path to the JSON publish store
        #[clap(long)]
        store: PathBuf,
        /// ID of the publish to index
        #[clap(long)]
        publish: Uuid,
    },
    /// Validate and normalize a JSON array of items
    Validate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Path to the JSON items file
        #[clap(long)]
        items: PathBuf,
    },
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Commit {
            config,
            store,
            publish,
        } => {
            let settings = Arc::new(load_config(config)?);
            let store = open_store(&store)?;
            let coordinator = coordinator(&settings);

            request_commit(&store, publish)?;
            println!("Committing publish {publish}...");
            let state = coordinator
                .commit(&store, publish, Some(settings.actor_time_limit()))
                .await?;

            if state == PublishState::Failed {
                let detail = store
                    .publish(publish)?
                    .and_then(|p| p.detail)
                    .unwrap_or_default();
                eprintln!("[ERROR] Publish {publish} failed: {detail}");
                bail!("publish {publish} failed");
            }
            println!("Publish {publish} is {state}");
            Ok(())
        }
        Commands::Autoindex {
            config,
            store,
            publish,
        } => {
            let settings = Arc::new(load_config(config)?);
            let store = open_store(&store)?;
            let report = coordinator(&settings).autoindex(&store, publish).await?;

            println!("Autoindex complete.\nReport:");
            println!("{:#?}", report);
            if report.all_roots_failed() {
                bail!("autoindex failed for every repository root");
            }
            Ok(())
        }
        Commands::Validate { config, items } => {
            let settings = load_config(config)?;
            let content = fs::read_to_string(&items)
                .with_context(|| format!("Failed to read items file {:?}", items))?;
            let items: Vec<NewItem> =
                serde_json::from_str(&content).context("Failed to parse items JSON")?;

            let mut invalid = 0;
            for item in &items {
                match item.validate(&settings.autoindex_filename) {
                    Ok(valid) => println!("{}", serde_json::to_string(&valid)?),
                    Err(e) => {
                        eprintln!("[ERROR] {e}");
                        invalid += 1;
                    }
                }
            }
            if invalid > 0 {
                bail!("{invalid} of {} item(s) invalid", items.len());
            }
            println!("All {} item(s) valid", items.len());
            Ok(())
        }
    }
}

fn open_store(path: &Path) -> Result<JsonFileStore> {
    JsonFileStore::open(path).with_context(|| format!("Failed to open store {:?}", path))
}

fn coordinator(settings: &Arc<Settings>) -> PublishCommitCoordinator {
    let factory = Arc::new(S3ClientFactory::new(settings.s3_endpoint_url.clone()));
    let pools = ClientPoolRegistry::new(factory)
        .with_size(settings.client_pool_size)
        .with_acquire_timeout(settings.client_acquire_timeout());
    PublishCommitCoordinator::new(Arc::clone(settings), Arc::new(pools))
}
