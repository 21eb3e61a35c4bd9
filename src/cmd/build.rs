//! The `build` subcommand: scan templates, build the dependency graph,
//! version everything, compile what changed, publish, persist the manifest.

use crate::common::SUCCESS;
use crate::compile;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::graph::{GraphBuilder, GraphRoot};
use crate::manifest::Manifest;
use crate::plan;
use crate::publish::{self, Publisher};
use crate::scan::{self, BlockGrammar, BundleDecl};
use crate::store::S3Store;
use crate::version;
use anyhow::Context;
use clap::Args;
use std::collections::HashSet;
use std::path::PathBuf;

/// Compile declared asset bundles and publish them.
#[derive(Args, Clone, Debug)]
#[command(name = "build")]
#[command(next_help_heading = "Build")]
pub struct Build {
    /// Directory to crawl looking for templates (may be given multiple times)
    #[arg(long = "template-dir", env = "BALE_TEMPLATE_DIRS", value_delimiter = ',')]
    pub template_dirs: Vec<PathBuf>,

    /// File extension of compilable templates
    #[arg(long, env = "BALE_TEMPLATE_EXT")]
    pub template_ext: Option<String>,

    /// Directory where static assets are located in this project
    #[arg(long, env = "BALE_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Directory where compiled assets are to be placed
    #[arg(short, long = "output-dir", env = "BALE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Static asset base URL path; must begin and end with a slash
    #[arg(long = "static-url-path", env = "BALE_STATIC_URL_PATH")]
    pub static_url_path: Option<String>,

    /// Location to read/write the compiled asset manifest
    #[arg(long, env = "BALE_MANIFEST_PATH")]
    pub manifest_path: Option<PathBuf>,

    /// Check whether a compile is needed; exits 1 if so
    #[arg(short = 't', long)]
    pub test_needs_compile: bool,

    /// Force a recompile of everything
    #[arg(short = 'f', long)]
    pub force_recompile: bool,

    /// Do not sub data URIs for small images in CSS
    #[arg(short = 'i', long)]
    pub skip_inline_images: bool,

    /// Skip uploading anything to the object store
    #[arg(long)]
    pub skip_upload: bool,

    /// Upload without checking whether objects already exist
    #[arg(long)]
    pub force_upload: bool,

    /// Replace the cached manifest instead of merging into it
    #[arg(long)]
    pub replace_manifest: bool,

    /// Object store bucket receiving published assets
    #[arg(long, env = "BALE_STORE_BUCKET")]
    pub store_bucket: Option<String>,

    /// Object store region
    #[arg(long, env = "BALE_STORE_REGION")]
    pub store_region: Option<String>,

    /// Object store access key
    #[arg(long, env = "BALE_STORE_ACCESS_KEY", hide_env_values = true)]
    pub store_access_key: Option<String>,

    /// Object store secret key
    #[arg(long, env = "BALE_STORE_SECRET_KEY", hide_env_values = true)]
    pub store_secret_key: Option<String>,
}

impl Build {
    /// Apply CLI overrides on top of the file-based configuration.
    pub fn apply_to(self, mut config: Configuration) -> Configuration {
        if !self.template_dirs.is_empty() {
            config.template_dirs = self.template_dirs;
        }
        config.template_ext = self.template_ext.unwrap_or(config.template_ext);
        config.static_dir = self.static_dir.unwrap_or(config.static_dir);
        config.compiled_asset_root = self.output_dir.unwrap_or(config.compiled_asset_root);
        config.static_url_prefix = self.static_url_path.unwrap_or(config.static_url_prefix);
        config.manifest_path = self.manifest_path.or(config.manifest_path);
        config.test_needs_compile |= self.test_needs_compile;
        config.force_recompile |= self.force_recompile;
        config.skip_inline_images |= self.skip_inline_images;
        config.skip_upload |= self.skip_upload;
        config.force_upload |= self.force_upload;
        if self.replace_manifest {
            config.merge_manifest = false;
        }
        config.store.bucket = self.store_bucket.or(config.store.bucket);
        config.store.region = self.store_region.or(config.store.region);
        config.store.access_key = self.store_access_key.or(config.store.access_key);
        config.store.secret_key = self.store_secret_key.or(config.store.secret_key);
        config
    }

    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        let cfg = Configuration::load(config)?;
        let cfg = self.apply_to(cfg);
        cfg.validate()?;
        execute(&cfg).await
    }
}

/// Run the whole pipeline against a validated configuration.
pub async fn execute(cfg: &Configuration) -> Result<()> {
    if !cfg.compiled_asset_root.is_dir() && !cfg.test_needs_compile {
        tracing::info!("creating output directory {}", cfg.compiled_asset_root.display());
        std::fs::create_dir_all(&cfg.compiled_asset_root)
            .context("error creating output directory")?;
    }

    // Scan templates for bundle declarations and seed references.
    let scanned = scan::scan_templates(&cfg.template_dirs, &cfg.template_ext, &BlockGrammar)?;
    if scanned.bundles.is_empty() && scanned.seeds.is_empty() {
        tracing::warn!("no bundles or static references found in templates");
    }

    // Build the fresh manifest: graph, then versions, then bundle hashes.
    let cached = Manifest::load(&cfg.manifest_path());
    let mut current = Manifest::default();
    let mut roots = Vec::new();
    for decl in &scanned.bundles {
        for member in &decl.members {
            roots.push(GraphRoot {
                rel_path: member.clone(),
                origin: decl.source_template.clone(),
            });
        }
    }
    for (template, rel_path) in &scanned.seeds {
        roots.push(GraphRoot {
            rel_path: rel_path.clone(),
            origin: template.clone(),
        });
    }
    GraphBuilder::new(&cfg.static_dir, &cfg.static_url_prefix)?.build(&roots, &mut current)?;
    if !current.closure_holds() {
        return Err(Error::Other(anyhow::anyhow!(
            "dependency graph is not closed over its deps"
        )));
    }
    version::apply_versions(&cfg.static_dir, &mut current)?;
    version::apply_bundle_versions(&scanned.bundles, &mut current)?;

    // Every occurrence of a duplicated declaration contributed to the graph
    // above; each unique bundle compiles once.
    let mut seen = HashSet::new();
    let bundles: Vec<BundleDecl> = scanned
        .bundles
        .into_iter()
        .filter(|decl| seen.insert(decl.name_hash()))
        .collect();
    tracing::debug!(unique = bundles.len(), "bundle declarations de-duplicated");

    // Decide what actually needs to run.
    let to_compile: Vec<BundleDecl> = if cfg.force_recompile {
        bundles.clone()
    } else {
        let mut out = Vec::new();
        for decl in &bundles {
            if plan::needs_compile(decl, &cached, &current, &cfg.compiled_asset_root)? {
                out.push(decl.clone());
            }
        }
        out
    };

    if to_compile.is_empty() && !plan::needs_global_recompile(&cached, &current) {
        tracing::info!("{}nothing to compile", SUCCESS);
        return Ok(());
    }
    if cfg.test_needs_compile {
        return Err(Error::NeedsCompilation);
    }

    compile::compile_bundles(cfg, &current, &to_compile).await?;

    let uploads = publish::collect_uploads(cfg, &current)?;
    if cfg.skip_upload || cfg.store.bucket.is_none() {
        tracing::info!(count = uploads.len(), "skipping asset upload");
        for upload in &uploads {
            tracing::debug!("would upload {}", upload.file_name);
        }
    } else {
        let store = S3Store::connect(&cfg.store).await?;
        Publisher::new(cfg, &current, &store)?
            .publish(&uploads)
            .await?;
    }

    // Persist: merge into the cached generation unless replacement was
    // requested, so artifacts still referenced by live deploys resolve.
    let merged = if cfg.merge_manifest {
        let mut merged = cached;
        merged.union(current);
        merged
    } else {
        current
    };
    merged.write(&cfg.manifest_path())?;

    tracing::info!("{}build completed successfully", SUCCESS);
    Ok(())
}
