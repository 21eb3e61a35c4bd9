//! Incremental build planning.
//!
//! Decides which bundles actually need to go through the external compilers
//! by comparing the cached manifest against the freshly computed one, plus
//! checking that the expected artifact still exists on disk.

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::scan::BundleDecl;
use std::path::Path;

/// Whether the given bundle must be (re)compiled.
pub fn needs_compile(
    decl: &BundleDecl,
    cached: &Manifest,
    current: &Manifest,
    compiled_root: &Path,
) -> Result<bool> {
    let name_hash = decl.name_hash();
    let block = current.blocks.get(&name_hash).ok_or_else(|| {
        Error::Other(anyhow::anyhow!(
            "bundle {name_hash} missing from the computed manifest"
        ))
    })?;
    let artifact = compiled_root.join(&block.versioned_path);

    match cached.blocks.get(&name_hash) {
        Some(old) if old.version == block.version => {
            if artifact.is_file() {
                Ok(false)
            } else {
                tracing::warn!(
                    "missing compiled asset {} from {}",
                    artifact.display(),
                    decl.source_template.display()
                );
                Ok(true)
            }
        }
        Some(_) => {
            tracing::warn!("contents of bundle in {} changed", decl.source_template.display());
            Ok(true)
        }
        None if artifact.is_file() => {
            // A declaration new to the manifest whose artifact was produced
            // by an earlier run. Reuse it.
            tracing::info!(
                "new hash {name_hash} from {} but artifact already exists at {}",
                decl.source_template.display(),
                artifact.display()
            );
            Ok(false)
        }
        None => {
            tracing::warn!(
                "new/unknown hash {name_hash} from {}",
                decl.source_template.display()
            );
            Ok(true)
        }
    }
}

/// Advisory signal that an upstream static dependency moved underneath the
/// cached manifest: some asset in the fresh manifest is unknown to the
/// cached one, or the two disagree on a version. Downstream bundles may
/// silently be stale in that case.
pub fn needs_global_recompile(cached: &Manifest, current: &Manifest) -> bool {
    current.assets.iter().any(|(rel_path, entry)| {
        match cached.assets.get(rel_path) {
            None => {
                tracing::debug!("asset {rel_path} not present in cached manifest");
                true
            }
            Some(old) => old.version != entry.version,
        }
    })
}
