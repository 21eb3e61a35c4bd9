//! Dependency graph builder.
//!
//! Starting from the bundle members and seed paths discovered by the
//! scanner, walks every asset's direct references (per-extension extractors)
//! and records the full transitive graph in the manifest. The walk is
//! depth-first and memoized; re-entering a path still being expanded means
//! the project has a dependency cycle, which is an error.

use crate::common;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::scan;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// The pattern is fixed, so compiling it can not fail.
#[allow(clippy::expect_used)]
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\()?\s*["']([^"']+)["']"#).expect("invalid import pattern")
});

/// A root of the dependency walk: a static path plus the file that
/// referenced it.
#[derive(Clone, Debug)]
pub struct GraphRoot {
    /// Path relative to the static root.
    pub rel_path: String,
    /// Referencing file, for diagnostics.
    pub origin: PathBuf,
}

/// Walks the dependency graph and fills `manifest.assets`.
pub struct GraphBuilder<'a> {
    static_dir: &'a Path,
    static_re: Regex,
    /// Paths currently being expanded; re-entry means a cycle.
    visiting: HashSet<String>,
    /// Paths fully expanded.
    done: HashSet<String>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(static_dir: &'a Path, static_url_prefix: &str) -> Result<Self> {
        let static_re = Regex::new(&common::static_ref_pattern(static_url_prefix))
            .map_err(|err| Error::Other(anyhow::anyhow!("invalid static URL prefix: {err}")))?;
        Ok(Self {
            static_dir,
            static_re,
            visiting: HashSet::new(),
            done: HashSet::new(),
        })
    }

    /// Populate `manifest.assets` with every file reachable from the given
    /// roots, recording direct dependencies in discovery order.
    pub fn build(mut self, roots: &[GraphRoot], manifest: &mut Manifest) -> Result<()> {
        for root in roots {
            self.visit(&root.rel_path, &root.origin, manifest)?;
        }
        tracing::debug!(assets = manifest.assets.len(), "dependency graph complete");
        Ok(())
    }

    fn visit(&mut self, rel_path: &str, referrer: &Path, manifest: &mut Manifest) -> Result<()> {
        if self.done.contains(rel_path) {
            return Ok(());
        }
        if self.visiting.contains(rel_path) {
            return Err(Error::Dependency {
                src: referrer.to_owned(),
                missing: format!("dependency cycle through {rel_path}"),
            });
        }

        let abs_path = common::abs_static_path(self.static_dir, rel_path);
        if !abs_path.is_file() {
            return Err(Error::Dependency {
                src: referrer.to_owned(),
                missing: rel_path.to_owned(),
            });
        }

        self.visiting.insert(rel_path.to_owned());
        manifest.assets.entry(rel_path.to_owned()).or_default();

        for dep_path in self.direct_deps(&abs_path)? {
            let dep_rel = common::rel_static_path(self.static_dir, &dep_path);
            tracing::trace!("{rel_path} > dependency {dep_rel}");
            if let Some(entry) = manifest.assets.get_mut(rel_path) {
                entry.add_dep(&dep_rel);
            }
            self.visit(&dep_rel, &abs_path, manifest)?;
        }

        self.visiting.remove(rel_path);
        self.done.insert(rel_path.to_owned());
        Ok(())
    }

    /// First-level dependencies of the given file, dispatched on extension.
    /// Files of unknown kinds (images, fonts) are leaves.
    fn direct_deps(&self, abs_path: &Path) -> Result<Vec<PathBuf>> {
        let ext = abs_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let deps = match ext.as_str() {
            "js" => self.static_deps(abs_path)?,
            "css" | "less" => {
                let mut deps = self.import_deps(abs_path, ext == "less", false)?;
                deps.extend(self.static_deps(abs_path)?);
                deps
            }
            "scss" => {
                let mut deps = self.import_deps(abs_path, false, true)?;
                deps.extend(self.static_deps(abs_path)?);
                deps
            }
            "html" => self.template_deps(abs_path)?,
            _ => Vec::new(),
        };
        Ok(deps)
    }

    /// Static-prefix references, e.g. `/s/img/logo.png` inside JS or CSS.
    fn static_deps(&self, abs_path: &Path) -> Result<Vec<PathBuf>> {
        let source = read_source(abs_path)?;
        Ok(self
            .static_re
            .captures_iter(&source)
            .map(|caps| common::abs_static_path(self.static_dir, &caps[2]))
            .collect())
    }

    /// Stylesheet `@import` references, resolved relative to the importing
    /// file. Less imports default to a `.less` extension; Sass skips the
    /// compass framework's virtual imports.
    fn import_deps(&self, abs_path: &Path, is_less: bool, is_sass: bool) -> Result<Vec<PathBuf>> {
        let source = read_source(abs_path)?;
        // the file was just read, so it has a parent
        let dir = abs_path.parent().unwrap_or(Path::new(""));

        let mut deps = Vec::new();
        for caps in IMPORT_RE.captures_iter(&source) {
            let mut import = caps[1].to_owned();
            if import.contains("://") {
                tracing::debug!("skipping remote import {import} in {}", abs_path.display());
                continue;
            }
            if is_sass && import.starts_with("compass/") {
                continue;
            }
            if is_less && Path::new(&import).extension().is_none() {
                import.push_str(".less");
            }
            deps.push(common::normalize(dir.join(&import)));
        }
        Ok(deps)
    }

    /// `static_url("...")` calls inside static HTML fragments.
    fn template_deps(&self, abs_path: &Path) -> Result<Vec<PathBuf>> {
        let source = read_source(abs_path)?;
        Ok(scan::find_static_urls(abs_path, &source)?
            .iter()
            .map(|rel| common::abs_static_path(self.static_dir, rel))
            .collect())
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| {
        Error::Other(anyhow::anyhow!("error reading {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(static_dir: &Path) -> GraphBuilder<'_> {
        GraphBuilder::new(static_dir, "/s/").unwrap()
    }

    fn root(rel_path: &str) -> GraphRoot {
        GraphRoot {
            rel_path: rel_path.into(),
            origin: "templates/page.html".into(),
        }
    }

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn walks_less_imports_and_static_refs() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "css/a.less", "@import \"b.less\";\nbody { color: red }");
        write(
            tmp.path(),
            "css/b.less",
            ".logo { background: url(/s/img/logo.png); }",
        );
        write(tmp.path(), "img/logo.png", "not really a png");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("css/a.less")], &mut manifest)
            .unwrap();

        assert_eq!(manifest.assets.len(), 3);
        assert_eq!(manifest.assets["css/a.less"].deps, vec!["css/b.less"]);
        assert_eq!(manifest.assets["css/b.less"].deps, vec!["img/logo.png"]);
        assert!(manifest.assets["img/logo.png"].deps.is_empty());
        assert!(manifest.closure_holds());
    }

    #[test]
    fn less_import_without_extension_defaults_to_less() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "css/site.less", "@import \"mixins\";");
        write(tmp.path(), "css/mixins.less", ".m { margin: 0 }");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("css/site.less")], &mut manifest)
            .unwrap();

        assert_eq!(manifest.assets["css/site.less"].deps, vec!["css/mixins.less"]);
    }

    #[test]
    fn relative_imports_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "css/pages/home.css", "@import url('../shared.css');");
        write(tmp.path(), "css/shared.css", "body {}");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("css/pages/home.css")], &mut manifest)
            .unwrap();

        assert_eq!(
            manifest.assets["css/pages/home.css"].deps,
            vec!["css/shared.css"]
        );
    }

    #[test]
    fn scss_skips_compass_imports() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "css/site.scss",
            "@import \"compass/css3\";\n@import \"partial.scss\";",
        );
        write(tmp.path(), "css/partial.scss", ".p {}");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("css/site.scss")], &mut manifest)
            .unwrap();

        assert_eq!(manifest.assets["css/site.scss"].deps, vec!["css/partial.scss"]);
    }

    #[test]
    fn js_static_refs_become_deps() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "js/app.js",
            "var icon = \"/s/img/icon.svg\";\nvar other = '/elsewhere/x.png';",
        );
        write(tmp.path(), "img/icon.svg", "<svg/>");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("js/app.js")], &mut manifest)
            .unwrap();

        assert_eq!(manifest.assets["js/app.js"].deps, vec!["img/icon.svg"]);
    }

    #[test]
    fn missing_dependency_is_fatal_with_source_attached() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "css/bad.css",
            ".x { background: url(/s/missing.png); }",
        );

        let mut manifest = Manifest::default();
        let err = builder(tmp.path())
            .build(&[root("css/bad.css")], &mut manifest)
            .unwrap_err();

        match err {
            Error::Dependency { src, missing } => {
                assert_eq!(src, tmp.path().join("css/bad.css"));
                assert_eq!(missing, "missing.png");
            }
            other => panic!("expected dependency error, got {other:?}"),
        }
    }

    #[test]
    fn import_cycles_are_detected() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "css/a.less", "@import \"b.less\";");
        write(tmp.path(), "css/b.less", "@import \"a.less\";");

        let mut manifest = Manifest::default();
        let err = builder(tmp.path())
            .build(&[root("css/a.less")], &mut manifest)
            .unwrap_err();

        match err {
            Error::Dependency { missing, .. } => {
                assert!(missing.contains("cycle"), "got {missing}")
            }
            other => panic!("expected dependency error, got {other:?}"),
        }
    }

    #[test]
    fn html_fragments_contribute_static_url_deps() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "partials/badge.html",
            r#"<img src="{{ bale.static_url("img/badge.png") }}">"#,
        );
        write(tmp.path(), "img/badge.png", "png bytes");

        let mut manifest = Manifest::default();
        builder(tmp.path())
            .build(&[root("partials/badge.html")], &mut manifest)
            .unwrap();

        assert_eq!(
            manifest.assets["partials/badge.html"].deps,
            vec!["img/badge.png"]
        );
    }
}
