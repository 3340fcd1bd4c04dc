use crate::output;

use std::path::PathBuf;

use clap::{Args, Subcommand};
use color_eyre::Result;
use tracing::debug;

use verigate_service::cache::{CacheCoordinator, CacheKey, CacheStore};
use verigate_service::PipelineExecutor;

use super::{load_workflow, open_store};

/// Inspect or clear the build state cache
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache directory (default: ~/.verigate/cache)
    #[arg(long, global = true, value_name = "DIR", env = "VERIGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List stored entries
    List,

    /// Remove one entry
    Remove {
        /// Cache key as printed by `cache list`
        key: String,
    },

    /// Remove every entry
    Clear,

    /// Print the key each configuration of a workflow would use
    Key {
        /// Workflow file (default: built-in Rust workflow)
        #[arg(env = "VERIGATE_WORKFLOW")]
        workflow: Option<PathBuf>,

        /// Project directory holding the lock file
        #[arg(long, short = 'w', value_name = "DIR")]
        working_dir: Option<PathBuf>,

        /// Toolchain version instead of asking rustc
        #[arg(long, value_name = "VERSION")]
        toolchain: Option<String>,
    },
}

pub async fn execute(args: CacheArgs) -> Result<()> {
    let store = open_store(args.cache_dir);

    match args.action {
        CacheAction::List => {
            let entries = store.list().await?;
            if entries.is_empty() {
                output::info(&format!("No cache entries in {}", store.root().display()));
                return Ok(());
            }
            println!("{:<56} {:>5} {:>16}", "KEY", "TOOLS", "SAVED");
            for entry in &entries {
                let saved = entry
                    .saved_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<56} {:>5} {:>16}",
                    entry.key.as_str(),
                    entry.registered.len(),
                    saved
                );
            }
        }

        CacheAction::Remove { key } => {
            if store.remove(&CacheKey::from_raw(key.clone())).await? {
                output::success(&format!("Removed {}", key));
            } else {
                color_eyre::eyre::bail!("No cache entry named {}", key);
            }
        }

        CacheAction::Clear => {
            let removed = store.clear().await?;
            output::success(&format!(
                "Removed {} entries from {}",
                removed,
                store.root().display()
            ));
        }

        CacheAction::Key {
            workflow,
            working_dir,
            toolchain,
        } => {
            let workflow = load_workflow(workflow.as_deref())?;
            let mut executor = PipelineExecutor::from_workflow(&workflow)?
                .with_cache(CacheCoordinator::disabled().with_prefix(workflow.cache.prefix.clone()));

            let config = executor.config_mut();
            config.working_dir = match working_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            if toolchain.is_some() {
                config.toolchain = toolchain;
            }

            debug!("Computing cache keys in {}", executor.config().working_dir.display());
            for (configuration, key) in executor.cache_keys().await {
                match key {
                    Some(key) => println!("{:<32} {}", configuration.name(), key),
                    None => println!("{:<32} (lock file unreadable)", configuration.name()),
                }
            }
        }
    }

    Ok(())
}
