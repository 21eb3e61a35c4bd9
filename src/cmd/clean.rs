//! The `clean` subcommand.

use crate::config::Configuration;
use crate::error::Result;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

/// Remove the compiled asset output directory.
#[derive(Args, Clone, Debug)]
#[command(name = "clean")]
pub struct Clean {
    /// The output dir for all compiled assets
    #[arg(short, long = "output-dir", env = "BALE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
}

impl Clean {
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let cfg = Configuration::load(config)?;
        let dir = self.output_dir.unwrap_or(cfg.compiled_asset_root);
        if dir.is_dir() {
            tracing::info!("removing {}", dir.display());
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("error removing {}", dir.display()))?;
        }
        Ok(())
    }
}
