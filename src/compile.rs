//! Bundle compilation.
//!
//! One task per bundle, bounded by the machine's parallelism. Each kind maps
//! to an external tool chain: closure for JS; lessc and sass feed their
//! output into the shared CSS pipeline, which optionally inlines small
//! images before piping everything through the minifier.

use crate::common;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::scan::{BundleDecl, BundleKind};
use crate::tools::{argv, run_tool};
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use futures_util::stream;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Largest file considered for inlining.
const MAX_INLINE_FILE_SIZE: u64 = 24 * 1024;
/// IE8 rejects URLs of 32 KiB and beyond, so larger data URIs are left out.
const MAX_DATA_URI_SIZE: usize = 32 * 1024;

/// Compile every given bundle, writing artifacts into the compiled asset
/// root. All tasks run to completion before the first failure is surfaced,
/// so a broken bundle does not leave half-cancelled siblings behind.
pub async fn compile_bundles(
    cfg: &Configuration,
    manifest: &Manifest,
    decls: &[BundleDecl],
) -> Result<()> {
    if decls.is_empty() {
        return Ok(());
    }
    let workers = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    tracing::info!(
        bundles = decls.len(),
        workers,
        "{}compiling bundles",
        common::BUILDING
    );

    let results: Vec<Result<()>> =
        stream::iter(decls.iter().map(|decl| compile_bundle(cfg, manifest, decl)))
            .buffer_unordered(workers)
            .collect()
            .await;
    for result in results {
        result?;
    }
    Ok(())
}

async fn compile_bundle(
    cfg: &Configuration,
    manifest: &Manifest,
    decl: &BundleDecl,
) -> Result<()> {
    let name_hash = decl.name_hash();
    let block = manifest.blocks.get(&name_hash).ok_or_else(|| {
        Error::Other(anyhow::anyhow!(
            "bundle {name_hash} missing from the computed manifest"
        ))
    })?;
    let out_path = cfg.compiled_asset_root.join(&block.versioned_path);
    let members = member_paths(cfg, decl)?;
    tracing::info!(
        kind = ?decl.kind,
        members = members.len(),
        "compiling bundle from {}",
        decl.source_template.display()
    );

    let output = match decl.kind {
        BundleKind::Js => compile_js(cfg, &members).await?,
        BundleKind::Css => {
            let mut pieces = Vec::with_capacity(members.len());
            for path in &members {
                pieces.push(read_text(path)?);
            }
            css_pipeline(cfg, decl, pieces.join("\n")).await?
        }
        BundleKind::Less => {
            // lessc accepts a single input, so each member is compiled
            // separately and the outputs concatenated.
            let mut pieces = Vec::with_capacity(members.len());
            for path in &members {
                let out = run_tool(&argv([&cfg.tools.lessc_bin, path]), None).await?;
                pieces.push(String::from_utf8_lossy(&out).into_owned());
            }
            css_pipeline(cfg, decl, pieces.join("\n")).await?
        }
        BundleKind::Sass => {
            let mut cmd = argv([&cfg.tools.sass_bin]);
            cmd.extend(argv(["--no-cache", "--stop-on-error"]));
            cmd.extend(argv(&members));
            let out = run_tool(&cmd, None).await?;
            css_pipeline(cfg, decl, String::from_utf8_lossy(&out).into_owned()).await?
        }
    };

    tokio::fs::write(&out_path, &output)
        .await
        .with_context(|| format!("error writing compiled bundle to {}", out_path.display()))?;
    tracing::info!("wrote {}", out_path.display());
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("error reading {}", path.display()))
        .map_err(Error::from)
}

/// Absolute paths of the bundle members; all of them must exist.
fn member_paths(cfg: &Configuration, decl: &BundleDecl) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = decl
        .members
        .iter()
        .map(|member| common::abs_static_path(&cfg.static_dir, member))
        .collect();
    let missing: Vec<String> = decl
        .members
        .iter()
        .zip(&paths)
        .filter(|(_, path)| !path.is_file())
        .map(|(member, _)| member.clone())
        .collect();
    if !missing.is_empty() {
        return Err(Error::Dependency {
            src: decl.source_template.clone(),
            missing: missing.join(","),
        });
    }
    Ok(paths)
}

/// All members go to the closure compiler on one command line.
async fn compile_js(cfg: &Configuration, members: &[PathBuf]) -> Result<Vec<u8>> {
    let mut cmd = argv([&cfg.tools.java_bin]);
    cmd.extend(argv(["-Xss16m", "-jar"]));
    cmd.push(cfg.tools.closure_jar.to_string_lossy().into_owned());
    cmd.extend(argv([
        "--compilation_level",
        "SIMPLE_OPTIMIZATIONS",
        "--language_in",
        "ECMASCRIPT5",
    ]));
    for path in members {
        cmd.push("--js".to_owned());
        cmd.push(path.to_string_lossy().into_owned());
    }
    run_tool(&cmd, None).await
}

/// Shared tail of every stylesheet kind: inline small images, then pipe the
/// whole thing through the minifier.
async fn css_pipeline(
    cfg: &Configuration,
    decl: &BundleDecl,
    css_input: String,
) -> Result<Vec<u8>> {
    let css = if cfg.skip_inline_images {
        css_input
    } else {
        inline_images(
            &cfg.static_dir,
            &cfg.static_url_prefix,
            &decl.source_template,
            &css_input,
        )?
    };
    let cmd = argv([
        cfg.tools.minify_bin.to_string_lossy().as_ref(),
        "--type=css",
    ]);
    run_tool(&cmd, Some(css.as_bytes())).await
}

/// Substitute `data:` URIs for small images referenced through `url()`
/// rules with the static prefix.
///
/// Only `url()` references participate, which sidesteps constructs like the
/// IE-specific transparency filters. Files over 24 KiB and URIs of 32 KiB or
/// more keep their original reference.
pub fn inline_images(
    static_dir: &Path,
    static_url_prefix: &str,
    src_label: &Path,
    css_src: &str,
) -> Result<String> {
    let pattern = format!(
        r#"(url\(["']?){}(["']?\))"#,
        common::static_ref_pattern(static_url_prefix)
    );
    let url_re = Regex::new(&pattern)
        .map_err(|err| Error::Other(anyhow::anyhow!("invalid static URL prefix: {err}")))?;

    // Track substituted references so duplicates can be called out; a
    // duplicated inline image bloats the stylesheet once per occurrence.
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = String::with_capacity(css_src.len());
    let mut tail = 0;

    for caps in url_re.captures_iter(css_src) {
        let Some(whole) = caps.get(0) else { continue };
        let (before, prefix, rel_path, after) = (&caps[1], &caps[2], &caps[3], &caps[4]);

        out.push_str(&css_src[tail..whole.start()]);
        tail = whole.end();

        match data_uri(static_dir, src_label, rel_path)? {
            Some(uri) => {
                *seen.entry(format!("{prefix}{rel_path}")).or_default() += 1;
                out.push_str(before);
                out.push_str(&uri);
                out.push_str(after);
            }
            None => out.push_str(whole.as_str()),
        }
    }
    out.push_str(&css_src[tail..]);

    for (url, count) in seen {
        if count > 1 {
            tracing::warn!("inline asset duplicated {count}x: {url}");
        }
    }
    Ok(out)
}

/// The data URI for the given reference, or `None` when one of the size
/// limits says the reference should stay as-is.
fn data_uri(static_dir: &Path, src_label: &Path, rel_path: &str) -> Result<Option<String>> {
    let path = common::abs_static_path(static_dir, rel_path);
    if !path.is_file() {
        return Err(Error::Dependency {
            src: src_label.to_owned(),
            missing: rel_path.to_owned(),
        });
    }

    let size = std::fs::metadata(&path)
        .with_context(|| format!("error inspecting {}", path.display()))?
        .len();
    if size > MAX_INLINE_FILE_SIZE {
        tracing::debug!("not inlining {} ({size} bytes)", path.display());
        return Ok(None);
    }

    let bytes =
        std::fs::read(&path).with_context(|| format!("error reading {}", path.display()))?;
    let uri = format!(
        "data:{};base64,{}",
        common::guess_mime(&path),
        BASE64.encode(bytes)
    );
    if uri.len() >= MAX_DATA_URI_SIZE {
        tracing::debug!("not inlining {} ({} bytes encoded)", path.display(), uri.len());
        return Ok(None);
    }
    Ok(Some(uri))
}
