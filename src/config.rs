//! Runtime configuration.
//!
//! Bale takes a layered configuration approach. The `Bale.toml` config file
//! is the base, which is then superseded by environment variables and CLI
//! options (applied by the subcommands via their `apply_to` methods).

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::PathBuf;

/// Default config file, looked up in the working directory.
const CONFIG_FILE: &str = "Bale.toml";

/// The manifest file name inside the compiled asset root.
const MANIFEST_FILE: &str = "manifest.json";

/// Full configuration for a build.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Root directories to crawl looking for templates that declare asset
    /// bundles.
    pub template_dirs: Vec<PathBuf>,
    /// File extension (without dot) of parseable templates.
    pub template_ext: String,
    /// Directory where the project's static source assets live.
    pub static_dir: PathBuf,
    /// Directory where compiled assets are written.
    pub compiled_asset_root: PathBuf,
    /// URL path prefix identifying in-project static references. Must begin
    /// and end with a slash.
    pub static_url_prefix: String,
    /// URL prefix of the origin-proxy variant, also used as the object key
    /// prefix for that variant.
    pub local_cdn_prefix: String,
    /// URL prefix(es) of the CDN variant. A list shards references across
    /// hosts.
    pub cdn_prefix: CdnPrefix,
    /// Location of the persisted manifest. Defaults to `manifest.json`
    /// inside the compiled asset root.
    pub manifest_path: Option<PathBuf>,
    /// Do not substitute data URIs for small images in CSS.
    pub skip_inline_images: bool,
    /// Recompile every bundle regardless of the cached manifest.
    pub force_recompile: bool,
    /// Upload without the HEAD-first existence check.
    pub force_upload: bool,
    /// Skip the publish step entirely.
    pub skip_upload: bool,
    /// Dry-run: only report whether a compile is needed.
    pub test_needs_compile: bool,
    /// Merge the freshly built manifest into the cached one on write so
    /// entries from earlier generations stay resolvable. When disabled the
    /// cached manifest is replaced wholesale.
    pub merge_manifest: bool,
    /// Paths to the external compilers.
    pub tools: ToolPaths,
    /// Object store connection settings.
    pub store: StoreOpts,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            template_dirs: vec!["templates".into()],
            template_ext: "html".into(),
            static_dir: "static".into(),
            compiled_asset_root: "assets".into(),
            static_url_prefix: "/static/".into(),
            local_cdn_prefix: "/cdn/".into(),
            cdn_prefix: CdnPrefix::One("/cdn/".into()),
            manifest_path: None,
            skip_inline_images: false,
            force_recompile: false,
            force_upload: false,
            skip_upload: false,
            test_needs_compile: false,
            merge_manifest: true,
            tools: ToolPaths::default(),
            store: StoreOpts::default(),
        }
    }
}

impl Configuration {
    /// Load the configuration file, or fall back to defaults when it does
    /// not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(|| CONFIG_FILE.into());
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("error reading config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("error parsing config file {}", path.display()))
    }

    /// Check the invariants that every build relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.static_url_prefix.len() >= 2
                && self.static_url_prefix.starts_with('/')
                && self.static_url_prefix.ends_with('/'),
            "static_url_prefix must begin and end with a slash, got {:?}",
            self.static_url_prefix
        );
        if let CdnPrefix::Sharded(list) = &self.cdn_prefix {
            ensure!(!list.is_empty(), "cdn_prefix list must not be empty");
        }
        for dir in &self.template_dirs {
            ensure!(dir.is_dir(), "template directory not found: {}", dir.display());
        }
        ensure!(
            self.static_dir.is_dir(),
            "static directory not found: {}",
            self.static_dir.display()
        );
        Ok(())
    }

    /// Location of the persisted manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.compiled_asset_root.join(MANIFEST_FILE))
    }
}

/// CDN URL prefix: a single host, or a list sharded by file name.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CdnPrefix {
    One(String),
    Sharded(Vec<String>),
}

impl CdnPrefix {
    /// Select the prefix for the given versioned file name. Lists shard by
    /// CRC32 of the name, so a given artifact lands on the same host across
    /// runs and pages.
    pub fn select(&self, versioned_name: &str) -> &str {
        match self {
            Self::One(prefix) => prefix,
            Self::Sharded(list) => {
                let shard = crc32fast::hash(versioned_name.as_bytes()) as usize % list.len();
                &list[shard]
            }
        }
    }
}

/// Paths to the external compiler executables.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    /// The java runtime used to launch the closure compiler.
    pub java_bin: PathBuf,
    /// Path to the closure compiler jar.
    pub closure_jar: PathBuf,
    /// Path to the `minify` CSS compressor.
    pub minify_bin: PathBuf,
    /// Path to the `lessc` compiler.
    pub lessc_bin: PathBuf,
    /// Path to the `sass` compiler.
    pub sass_bin: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            java_bin: "java".into(),
            closure_jar: "closure-compiler.jar".into(),
            minify_bin: "minify".into(),
            lessc_bin: "lessc".into(),
            sass_bin: "sass".into(),
        }
    }
}

/// Object store connection settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOpts {
    /// Bucket that receives both upload variants. Publishing is skipped
    /// when unset.
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}
