#![cfg(unix)]
//! End-to-end pipeline tests, driven with stand-in compilers so no real
//! toolchain needs to be installed.

use crate::cmd::build::execute;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// A scratch project: one template declaring a LESS bundle over a small
/// import chain (site.less -> base.less -> logo.png), plus a standalone
/// static reference.
fn project(tmp: &Path) -> Configuration {
    write(
        tmp,
        "templates/page.html",
        concat!(
            "{% apply bale.include_less %}\n",
            "css/site.less\n",
            "{% end %}\n",
            r#"<img src="{{ bale.static_url("img/standalone.png") }}">"#,
        ),
    );
    write(tmp, "static/css/site.less", "@import \"base.less\";\nh1 { color: blue }");
    write(
        tmp,
        "static/css/base.less",
        ".logo { background: url(/s/img/logo.png) }",
    );
    write(tmp, "static/img/logo.png", "logo v1");
    write(tmp, "static/img/standalone.png", "standalone");

    let mut cfg = Configuration {
        template_dirs: vec![tmp.join("templates")],
        static_dir: tmp.join("static"),
        compiled_asset_root: tmp.join("compiled"),
        static_url_prefix: "/s/".into(),
        skip_upload: true,
        ..Default::default()
    };
    cfg.tools.lessc_bin = fake_tool(tmp, "lessc", r#"cat "$1""#);
    cfg.tools.minify_bin = fake_tool(tmp, "minify", "cat");
    cfg
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn fake_tool(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
    let path = dir.join("bin").join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn dry_run(cfg: &Configuration) -> Configuration {
    Configuration {
        test_needs_compile: true,
        ..cfg.clone()
    }
}

fn block_artifact(cfg: &Configuration) -> (String, String) {
    let manifest = Manifest::load(&cfg.manifest_path());
    let block = manifest.blocks.values().next().unwrap();
    let artifact = cfg.compiled_asset_root.join(&block.versioned_path);
    (
        block.versioned_path.clone(),
        std::fs::read_to_string(artifact).unwrap(),
    )
}

#[tokio::test]
async fn first_build_produces_manifest_and_artifact() -> Result<()> {
    // Assemble.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());

    // Action.
    execute(&cfg).await?;

    // Assert.
    let manifest = Manifest::load(&cfg.manifest_path());
    assert_eq!(manifest.assets.len(), 4);
    assert_eq!(
        manifest.assets["css/site.less"].deps,
        vec!["css/base.less"]
    );
    assert_eq!(
        manifest.assets["css/base.less"].deps,
        vec!["img/logo.png"]
    );
    assert!(manifest.closure_holds());
    assert_eq!(manifest.blocks.len(), 1);

    let (versioned_path, compiled) = block_artifact(&cfg);
    assert!(versioned_path.ends_with(".css"));
    // The logo is small, so it was inlined into the compiled CSS.
    assert!(compiled.contains("data:image/png;base64,"), "got {compiled}");
    Ok(())
}

#[tokio::test]
async fn second_build_plans_no_work_and_leaves_the_manifest_untouched() -> Result<()> {
    // Assemble.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());
    execute(&cfg).await?;
    let first = std::fs::read(cfg.manifest_path()).unwrap();

    // Action: a rebuild plans zero compilations, and a dry-run agrees.
    execute(&cfg).await?;
    execute(&dry_run(&cfg)).await?;

    // Assert.
    let second = std::fs::read(cfg.manifest_path()).unwrap();
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn dry_run_signals_pending_work_before_the_first_build() {
    // Assemble.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());

    // Action.
    let err = execute(&dry_run(&cfg)).await.unwrap_err();

    // Assert: pending work is signalled, and nothing was created.
    assert!(matches!(err, Error::NeedsCompilation), "got {err:?}");
    assert!(!cfg.compiled_asset_root.exists());
}

#[tokio::test]
async fn touching_a_leaf_recompiles_the_bundle() -> Result<()> {
    // Assemble.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());
    execute(&cfg).await?;
    let before = Manifest::load(&cfg.manifest_path());
    let (old_artifact, _) = block_artifact(&cfg);

    // Action.
    write(tmp.path(), "static/img/logo.png", "logo v2");
    let err = execute(&dry_run(&cfg)).await.unwrap_err();
    assert!(matches!(err, Error::NeedsCompilation), "got {err:?}");
    execute(&cfg).await?;

    // Assert: the change rippled up the import chain and produced a fresh
    // artifact, while the sibling asset stayed put.
    let after = Manifest::load(&cfg.manifest_path());
    for rel in ["img/logo.png", "css/base.less", "css/site.less"] {
        assert_ne!(
            before.assets[rel].version, after.assets[rel].version,
            "{rel} should have a new version"
        );
    }
    assert_eq!(
        before.assets["img/standalone.png"].version,
        after.assets["img/standalone.png"].version
    );

    let (new_artifact, compiled) = block_artifact(&cfg);
    assert_ne!(old_artifact, new_artifact);
    assert!(compiled.contains("base64"));
    // The previous generation's artifact is still on disk for live deploys.
    assert!(cfg.compiled_asset_root.join(&old_artifact).is_file());
    Ok(())
}

#[tokio::test]
async fn duplicate_declarations_compile_once() -> Result<()> {
    // Assemble: a second template declaring the identical bundle.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());
    write(
        tmp.path(),
        "templates/other.html",
        "{% apply bale.include_less %}\ncss/site.less\n{% end %}",
    );

    // Action.
    execute(&cfg).await?;

    // Assert.
    let manifest = Manifest::load(&cfg.manifest_path());
    assert_eq!(manifest.blocks.len(), 1);
    Ok(())
}

#[tokio::test]
async fn compile_failures_carry_the_tool_stderr() {
    // Assemble: a minifier that always blows up.
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = project(tmp.path());
    cfg.tools.minify_bin = fake_tool(tmp.path(), "minify-broken", "echo 'syntax error' >&2; exit 1");

    // Action.
    let err = execute(&cfg).await.unwrap_err();

    // Assert.
    match err {
        Error::Compile { stderr, .. } => assert!(stderr.contains("syntax error"), "got {stderr}"),
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_static_reference_is_a_dependency_error() {
    // Assemble.
    let tmp = tempfile::tempdir().unwrap();
    let cfg = project(tmp.path());
    write(
        tmp.path(),
        "static/css/base.less",
        ".x { background: url(/s/missing.png) }",
    );

    // Action.
    let err = execute(&cfg).await.unwrap_err();

    // Assert.
    match err {
        Error::Dependency { src, missing } => {
            assert!(src.ends_with("css/base.less"), "got {}", src.display());
            assert_eq!(missing, "missing.png");
        }
        other => panic!("expected dependency error, got {other:?}"),
    }
}
