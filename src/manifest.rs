//! The asset manifest: the durable record of the dependency graph and the
//! versioned artifacts it produced.
//!
//! The manifest is a single JSON file with two top-level keys. `assets` maps
//! every participating source file to its content-addressed version and its
//! direct dependencies; `blocks` maps each declared bundle (by name hash) to
//! its compiled artifact. Both maps are kept in BTree order so that two runs
//! over identical inputs write byte-identical files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;

/// One file participating in the build.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Hex content hash folding in the file's bytes and all of its
    /// dependencies. Unset until the graph is finalized.
    pub version: Option<String>,
    /// `version` plus the original file extension.
    pub versioned_path: Option<String>,
    /// Direct dependencies, in discovery order. Serialized sorted so the
    /// on-disk manifest stays byte-reproducible.
    #[serde(serialize_with = "sorted")]
    pub deps: Vec<String>,
    /// Generations since this entry was last produced by a build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

impl AssetEntry {
    /// Record a direct dependency, keeping discovery order and dropping
    /// duplicates.
    pub fn add_dep(&mut self, rel_path: &str) {
        if !self.deps.iter().any(|d| d == rel_path) {
            self.deps.push(rel_path.to_owned());
        }
    }
}

/// A compiled bundle artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Hex content hash over the member versions.
    pub version: String,
    /// `version` plus the bundle's output extension.
    pub versioned_path: String,
    /// Generations since this entry was last produced by a build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

/// The persisted build record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub assets: BTreeMap<String, AssetEntry>,
    pub blocks: BTreeMap<String, BlockEntry>,
}

impl Manifest {
    /// Load a manifest from disk. A missing or malformed file yields an
    /// empty manifest, which simply causes a full rebuild downstream.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("missing manifest file {}: {err}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!("invalid manifest file {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Write the manifest, pretty-printed to keep diffs reviewable.
    pub fn write(&self, path: &Path) -> Result<()> {
        let out = serde_json::to_string_pretty(self).context("error serializing manifest")?;
        std::fs::write(path, out)
            .with_context(|| format!("error writing manifest to {}", path.display()))?;
        tracing::info!("wrote manifest to {}", path.display());
        Ok(())
    }

    /// Merge a freshly built manifest into this (cached) one.
    ///
    /// Entries not touched by the new generation survive with their `age`
    /// incremented, so artifacts referenced by still-deployed releases keep
    /// resolving. Entries rebuilt this run replace the old ones outright.
    pub fn union(&mut self, newer: Manifest) {
        for (rel_path, entry) in self.assets.iter_mut() {
            if !newer.assets.contains_key(rel_path) {
                entry.age = Some(entry.age.unwrap_or(0) + 1);
            }
        }
        for (name_hash, entry) in self.blocks.iter_mut() {
            if !newer.blocks.contains_key(name_hash) {
                entry.age = Some(entry.age.unwrap_or(0) + 1);
            }
        }
        self.assets.extend(newer.assets);
        self.blocks.extend(newer.blocks);
    }

    /// The versioned file name of the given asset, when known.
    pub fn versioned_path_of(&self, rel_path: &str) -> Option<&str> {
        self.assets
            .get(rel_path)
            .and_then(|entry| entry.versioned_path.as_deref())
    }

    /// Whether every recorded dependency is itself a manifest entry.
    pub fn closure_holds(&self) -> bool {
        self.assets
            .values()
            .flat_map(|entry| entry.deps.iter())
            .all(|dep| self.assets.contains_key(dep))
    }
}

fn sorted<S: Serializer>(deps: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    let mut deps = deps.to_vec();
    deps.sort();
    deps.serialize(serializer)
}
