//! Dual-variant publisher.
//!
//! Every artifact is uploaded twice into the same bucket: once under its
//! bare versioned name for CDN delivery, and once under the local-proxy
//! prefix for origin serving. Compiled JS/CSS gets its static references
//! rewritten per variant, always starting from the original compiled bytes
//! so the second rewrite never operates on the first one's output.

use crate::common;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::store::{ObjectMeta, ObjectStore};
use anyhow::{Context, ensure};
use futures_util::StreamExt;
use futures_util::stream;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Fixed size of the upload pool.
const UPLOAD_WORKERS: usize = 5;

// The patterns are fixed, so compiling them can not fail.
#[allow(clippy::expect_used)]
static SOURCE_EXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(scss|less|css|js|html)$").expect("invalid source extension pattern")
});
#[allow(clippy::expect_used)]
static COMPILED_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(css|js)$").expect("invalid compiled extension pattern"));

/// One file to push to the object store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Upload {
    /// Versioned object name, used as (the suffix of) the object key.
    pub file_name: String,
    /// Where the bytes live locally.
    pub file_path: PathBuf,
}

/// The set of files to publish: every compiled bundle artifact, plus every
/// first-class static asset (anything that is not a template, stylesheet,
/// or script source).
pub fn collect_uploads(cfg: &Configuration, manifest: &Manifest) -> anyhow::Result<Vec<Upload>> {
    let mut uploads = BTreeSet::new();

    for block in manifest.blocks.values() {
        let file_path = cfg.compiled_asset_root.join(&block.versioned_path);
        ensure!(
            file_path.is_file(),
            "missing compiled asset {}",
            file_path.display()
        );
        uploads.insert(Upload {
            file_name: block.versioned_path.clone(),
            file_path,
        });
    }

    for (rel_path, entry) in &manifest.assets {
        if SOURCE_EXT_RE.is_match(rel_path) {
            continue;
        }
        let file_path = common::abs_static_path(&cfg.static_dir, rel_path);
        ensure!(
            file_path.is_file(),
            "missing static asset {}",
            file_path.display()
        );
        let file_name = entry
            .versioned_path
            .clone()
            .with_context(|| format!("asset {rel_path} has no version"))?;
        uploads.insert(Upload {
            file_name,
            file_path,
        });
    }

    Ok(uploads.into_iter().collect())
}

/// Which upload variant a rewrite is for.
#[derive(Clone, Copy, Debug)]
enum Variant {
    Cdn,
    LocalProxy,
}

/// Uploads one manifest's artifacts through an [`ObjectStore`].
pub struct Publisher<'a, S> {
    cfg: &'a Configuration,
    manifest: &'a Manifest,
    store: &'a S,
    static_re: Regex,
}

impl<'a, S: ObjectStore> Publisher<'a, S> {
    pub fn new(cfg: &'a Configuration, manifest: &'a Manifest, store: &'a S) -> Result<Self> {
        let static_re = Regex::new(&common::static_ref_pattern(&cfg.static_url_prefix))
            .map_err(|err| Error::Other(anyhow::anyhow!("invalid static URL prefix: {err}")))?;
        Ok(Self {
            cfg,
            manifest,
            store,
            static_re,
        })
    }

    /// Drain the upload set through a bounded pool. Failures are collected
    /// per file, and a non-empty failure list fails the publish step after
    /// everything else had its chance.
    pub async fn publish(&self, uploads: &[Upload]) -> Result<()> {
        tracing::info!(
            count = uploads.len(),
            "{}publishing assets",
            common::PUBLISHING
        );

        let results: Vec<(String, anyhow::Result<()>)> = stream::iter(
            uploads
                .iter()
                .map(|upload| async move { (upload.file_name.clone(), self.upload(upload).await) }),
        )
        .buffer_unordered(UPLOAD_WORKERS)
        .collect()
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(file_name, result)| {
                result.err().map(|err| {
                    tracing::error!("error uploading {file_name}: {err:#}");
                    format!("{file_name}: {err:#}")
                })
            })
            .collect();
        if !failures.is_empty() {
            return Err(Error::Upload { failures });
        }
        Ok(())
    }

    /// Upload one file, in both variants.
    async fn upload(&self, upload: &Upload) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(&upload.file_path)
            .await
            .with_context(|| format!("error reading {}", upload.file_path.display()))?;
        let meta = ObjectMeta::immutable(common::guess_mime(Path::new(&upload.file_name)));

        // CDN variant first: bare versioned key.
        self.put_variant(&upload.file_name, &bytes, &meta, Variant::Cdn)
            .await?;

        // Then the origin-proxy variant under the local prefix.
        let local_key = format!(
            "{}/{}",
            self.cfg.local_cdn_prefix.trim_matches('/'),
            upload.file_name
        );
        self.put_variant(&local_key, &bytes, &meta, Variant::LocalProxy)
            .await?;
        Ok(())
    }

    async fn put_variant(
        &self,
        key: &str,
        original: &[u8],
        meta: &ObjectMeta,
        variant: Variant,
    ) -> anyhow::Result<()> {
        if !self.cfg.force_upload && self.store.head(key).await? {
            tracing::info!("skipping upload of {key}; already exists");
            return Ok(());
        }

        // Compiled JS/CSS carries static references that must point at the
        // variant being uploaded. Each rewrite starts from the original
        // bytes, never from the other variant's output.
        let body = if COMPILED_EXT_RE.is_match(key) {
            tracing::debug!("rewriting static references in {key}");
            self.rewrite(&String::from_utf8_lossy(original), variant)
                .into_bytes()
        } else {
            original.to_vec()
        };

        self.store.put(key, body, meta).await?;
        tracing::info!("uploaded {key}");
        Ok(())
    }

    /// Point every known static reference at its versioned artifact under
    /// the variant's URL prefix. Unknown references stay put.
    fn rewrite(&self, src: &str, variant: Variant) -> String {
        let mut out = String::with_capacity(src.len());
        let mut tail = 0;

        for caps in self.static_re.captures_iter(src) {
            let Some(whole) = caps.get(0) else { continue };
            let rel_path = &caps[2];

            out.push_str(&src[tail..whole.start()]);
            tail = whole.end();

            match self.manifest.versioned_path_of(rel_path) {
                Some(versioned) => {
                    let prefix = match variant {
                        Variant::Cdn => self.cfg.cdn_prefix.select(versioned),
                        Variant::LocalProxy => self.cfg.local_cdn_prefix.as_str(),
                    };
                    let link = format!(
                        "{}/{}",
                        prefix.trim_end_matches('/'),
                        versioned.trim_start_matches('/')
                    );
                    tracing::debug!("replacing {rel_path} -> {link}");
                    out.push_str(&link);
                }
                None => {
                    tracing::warn!("missing path {rel_path} in manifest, keeping {}", whole.as_str());
                    out.push_str(whole.as_str());
                }
            }
        }
        out.push_str(&src[tail..]);
        out
    }
}
