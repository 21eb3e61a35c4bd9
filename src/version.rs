//! Content-addressed versioning.
//!
//! Every asset gets a version that folds in its own bytes and the versions
//! of everything it depends on, so touching any file ripples up to every
//! artifact built from it:
//!
//! ```text
//! version(a) = md5( md5(bytes(a)) || version(d1) || version(d2) || … )
//! ```
//!
//! Hashes concatenate as hex strings (a compatibility contract with the
//! persisted manifest), dependencies in the discovery order recorded by the
//! graph builder. The result is a fixed point: processing order across the
//! asset set does not matter.

use crate::common;
use crate::error::{Error, Result};
use crate::manifest::{BlockEntry, Manifest};
use crate::scan::BundleDecl;
use anyhow::Context;
use std::path::Path;

/// Assign `version` and `versioned_path` to every asset in the manifest.
pub fn apply_versions(static_dir: &Path, manifest: &mut Manifest) -> Result<()> {
    let rel_paths: Vec<String> = manifest.assets.keys().cloned().collect();
    for rel_path in rel_paths {
        version_of(static_dir, &rel_path, manifest)?;
    }
    Ok(())
}

/// Compute (or recall) the version of a single asset, memoizing into the
/// manifest. The graph builder has already rejected cycles, so the recursion
/// terminates.
fn version_of(static_dir: &Path, rel_path: &str, manifest: &mut Manifest) -> Result<String> {
    if let Some(version) = manifest
        .assets
        .get(rel_path)
        .and_then(|entry| entry.version.clone())
    {
        return Ok(version);
    }

    let abs_path = common::abs_static_path(static_dir, rel_path);
    let bytes = std::fs::read(&abs_path)
        .with_context(|| format!("error reading asset {}", abs_path.display()))?;

    let mut acc = common::md5_hex(bytes);
    let deps = manifest
        .assets
        .get(rel_path)
        .map(|entry| entry.deps.clone())
        .unwrap_or_default();
    for dep in deps {
        acc.push_str(&version_of(static_dir, &dep, manifest)?);
    }

    let version = common::md5_hex(&acc);
    if let Some(entry) = manifest.assets.get_mut(rel_path) {
        entry.version = Some(version.clone());
        entry.versioned_path = Some(format!("{version}{}", common::dot_ext(rel_path)));
    }
    Ok(version)
}

/// Record a block entry for every bundle declaration: the bundle's version
/// is the hash over its member versions, in member order.
pub fn apply_bundle_versions(decls: &[BundleDecl], manifest: &mut Manifest) -> Result<()> {
    for decl in decls {
        let mut acc = String::new();
        for member in &decl.members {
            let version = manifest
                .assets
                .get(member)
                .and_then(|entry| entry.version.as_deref())
                .ok_or_else(|| Error::Dependency {
                    src: decl.source_template.clone(),
                    missing: member.clone(),
                })?;
            acc.push_str(version);
        }
        let version = common::md5_hex(&acc);
        manifest.blocks.insert(
            decl.name_hash(),
            BlockEntry {
                versioned_path: format!("{version}.{}", decl.kind.output_ext()),
                version,
                age: None,
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, GraphRoot};
    use crate::scan::BundleKind;
    use std::path::PathBuf;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn build_versioned(static_dir: &Path, roots: &[&str]) -> Manifest {
        let mut manifest = Manifest::default();
        let roots: Vec<GraphRoot> = roots
            .iter()
            .map(|rel| GraphRoot {
                rel_path: rel.to_string(),
                origin: PathBuf::from("templates/page.html"),
            })
            .collect();
        GraphBuilder::new(static_dir, "/s/")
            .unwrap()
            .build(&roots, &mut manifest)
            .unwrap();
        apply_versions(static_dir, &mut manifest).unwrap();
        manifest
    }

    fn fixture(static_dir: &Path) {
        write(static_dir, "css/a.less", "@import \"b.less\";");
        write(
            static_dir,
            "css/b.less",
            ".logo { background: url(/s/img/logo.png); }",
        );
        write(static_dir, "img/logo.png", "png bytes v1");
    }

    #[test]
    fn versions_are_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        fixture(tmp.path());

        let first = build_versioned(tmp.path(), &["css/a.less"]);
        let second = build_versioned(tmp.path(), &["css/a.less"]);
        assert_eq!(first, second);

        for entry in first.assets.values() {
            let version = entry.version.as_deref().unwrap();
            assert_eq!(version.len(), 32);
            assert!(version.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert!(
            first.assets["css/a.less"]
                .versioned_path
                .as_deref()
                .unwrap()
                .ends_with(".less")
        );
    }

    #[test]
    fn touching_a_leaf_ripples_to_every_dependent() {
        let tmp = tempfile::tempdir().unwrap();
        fixture(tmp.path());
        let before = build_versioned(tmp.path(), &["css/a.less"]);

        write(tmp.path(), "img/logo.png", "png bytes v2");
        let after = build_versioned(tmp.path(), &["css/a.less"]);

        for rel in ["img/logo.png", "css/b.less", "css/a.less"] {
            assert_ne!(
                before.assets[rel].version, after.assets[rel].version,
                "{rel} should have changed"
            );
        }
    }

    #[test]
    fn sibling_assets_are_unaffected() {
        let tmp = tempfile::tempdir().unwrap();
        fixture(tmp.path());
        write(tmp.path(), "js/app.js", "console.log('hi');");

        let before = build_versioned(tmp.path(), &["css/a.less", "js/app.js"]);
        write(tmp.path(), "img/logo.png", "png bytes v2");
        let after = build_versioned(tmp.path(), &["css/a.less", "js/app.js"]);

        assert_eq!(before.assets["js/app.js"], after.assets["js/app.js"]);
    }

    #[test]
    fn bundle_version_tracks_member_versions() {
        let tmp = tempfile::tempdir().unwrap();
        fixture(tmp.path());
        let decl = BundleDecl {
            kind: BundleKind::Less,
            members: vec!["css/a.less".into()],
            source_template: "templates/page.html".into(),
        };

        let mut before = build_versioned(tmp.path(), &["css/a.less"]);
        apply_bundle_versions(std::slice::from_ref(&decl), &mut before).unwrap();

        write(tmp.path(), "img/logo.png", "png bytes v2");
        let mut after = build_versioned(tmp.path(), &["css/a.less"]);
        apply_bundle_versions(std::slice::from_ref(&decl), &mut after).unwrap();

        let name_hash = decl.name_hash();
        let old = &before.blocks[&name_hash];
        let new = &after.blocks[&name_hash];
        assert_ne!(old.version, new.version);
        assert!(old.versioned_path.ends_with(".css"));
        assert_eq!(old.versioned_path, format!("{}.css", old.version));
    }

    #[test]
    fn bundle_member_missing_from_graph_is_a_dependency_error() {
        let decl = BundleDecl {
            kind: BundleKind::Js,
            members: vec!["js/ghost.js".into()],
            source_template: "templates/page.html".into(),
        };
        let mut manifest = Manifest::default();
        let err = apply_bundle_versions(std::slice::from_ref(&decl), &mut manifest).unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }), "got {err:?}");
    }
}
