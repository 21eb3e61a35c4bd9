//! Template scanner.
//!
//! Walks the configured template directories and extracts (a) bundle
//! declarations and (b) seed static paths referenced via `static_url`. The
//! concrete template grammar lives behind the [`TemplateParser`] seam; the
//! bundled [`BlockGrammar`] covers the `{% apply bale.include_* %}` syntax.

use crate::common;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The kind of an asset bundle, as declared in a template block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundleKind {
    Js,
    Css,
    Less,
    Sass,
}

impl BundleKind {
    /// Map an `include_*` tag to its bundle kind.
    pub fn from_include_tag(tag: &str) -> Option<Self> {
        match tag {
            "include_js" => Some(Self::Js),
            "include_css" => Some(Self::Css),
            "include_less" => Some(Self::Less),
            "include_sass" => Some(Self::Sass),
            _ => None,
        }
    }

    /// File extension (without dot) of the compiled artifact.
    pub fn output_ext(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Css | Self::Less | Self::Sass => "css",
        }
    }
}

/// A raw bundle block as returned by a template parser: the include tag's
/// kind plus the literal text between the block delimiters.
#[derive(Clone, Debug)]
pub struct RawBlock {
    pub kind: BundleKind,
    pub body: String,
}

/// Everything a parser extracted from a single template.
#[derive(Clone, Debug, Default)]
pub struct TemplateScan {
    pub blocks: Vec<RawBlock>,
    /// Literal arguments of `static_url(...)` calls.
    pub static_refs: Vec<String>,
}

/// Parsing adapter turning template source into bundle blocks and static
/// references. One implementation per template grammar.
pub trait TemplateParser {
    fn parse(&self, path: &Path, source: &str) -> Result<TemplateScan>;
}

/// A bundle declaration: a named group of static assets compiled into one
/// artifact.
#[derive(Clone, Debug)]
pub struct BundleDecl {
    pub kind: BundleKind,
    /// Member paths relative to the static root, in declaration order.
    pub members: Vec<String>,
    /// Template in which the block was declared. Diagnostics only.
    pub source_template: PathBuf,
}

impl BundleDecl {
    /// Stable identity of this bundle across runs: the hash of its literal
    /// member list. Order matters; reordering members is a new bundle.
    pub fn name_hash(&self) -> String {
        common::md5_hex(self.members.join("\n"))
    }
}

/// Everything the scanner learned from the template directories.
#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    /// Bundle declarations in encounter order, duplicates included.
    pub bundles: Vec<BundleDecl>,
    /// Seed static paths, each with the template that referenced it.
    pub seeds: Vec<(PathBuf, String)>,
}

/// Walk each template directory and collect bundle declarations and seed
/// paths from every template with the configured extension.
pub fn scan_templates(
    template_dirs: &[PathBuf],
    template_ext: &str,
    parser: &dyn TemplateParser,
) -> Result<ScanOutput> {
    let mut output = ScanOutput::default();
    let suffix = format!(".{template_ext}");

    for dir in template_dirs {
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                Error::Other(anyhow::anyhow!("error walking {}: {err}", dir.display()))
            })?;
            if !entry.file_type().is_file()
                || !entry.file_name().to_string_lossy().ends_with(&suffix)
            {
                continue;
            }
            let path = entry.path();
            let source = std::fs::read_to_string(path).map_err(|err| Error::Parse {
                path: path.to_owned(),
                reason: format!("unreadable template: {err}"),
            })?;
            let scan = parser.parse(path, &source)?;
            collect(path, scan, &mut output);
        }
    }

    tracing::debug!(
        bundles = output.bundles.len(),
        seeds = output.seeds.len(),
        "scanned templates"
    );
    Ok(output)
}

fn collect(path: &Path, scan: TemplateScan, output: &mut ScanOutput) {
    for block in scan.blocks {
        let members: Vec<String> = block
            .body
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if members.is_empty() {
            tracing::warn!("empty {:?} bundle in {}", block.kind, path.display());
            continue;
        }
        output.bundles.push(BundleDecl {
            kind: block.kind,
            members,
            source_template: path.to_owned(),
        });
    }
    for rel_path in scan.static_refs {
        output.seeds.push((path.to_owned(), rel_path));
    }
}

// The patterns are fixed, so compiling them can not fail.
#[allow(clippy::expect_used)]
static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%\s*apply\s+bale\.(include_[a-z]+)\s*%\}(.*?)\{%\s*end\s*%\}")
        .expect("invalid block pattern")
});
#[allow(clippy::expect_used)]
static STATIC_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bale\.static_url\(([^,)]*)(,[^)]*)?\)").expect("invalid static_url pattern")
});

/// The bundled template grammar:
///
/// ```text
/// {% apply bale.include_less %}
/// css/site.less
/// css/extra.less
/// {% end %}
///
/// <img src="{{ bale.static_url("img/logo.png") }}">
/// ```
pub struct BlockGrammar;

impl TemplateParser for BlockGrammar {
    fn parse(&self, path: &Path, source: &str) -> Result<TemplateScan> {
        let mut scan = TemplateScan::default();

        for caps in BLOCK_RE.captures_iter(source) {
            let tag = &caps[1];
            let kind = BundleKind::from_include_tag(tag).ok_or_else(|| Error::Parse {
                path: path.to_owned(),
                reason: format!("unknown bundle include tag `bale.{tag}`"),
            })?;
            scan.blocks.push(RawBlock {
                kind,
                body: caps[2].to_owned(),
            });
        }

        scan.static_refs = find_static_urls(path, source)?;

        Ok(scan)
    }
}

/// Collect the literal arguments of every `static_url(...)` call in the
/// given source. Shared between template scanning and the `.html` dependency
/// extractor.
pub(crate) fn find_static_urls(path: &Path, source: &str) -> Result<Vec<String>> {
    let mut refs = Vec::new();
    for caps in STATIC_URL_RE.captures_iter(source) {
        refs.push(literal_arg(path, caps[1].trim(), &caps[0])?);
    }
    Ok(refs)
}

/// Extract the string literal from a `static_url` argument. Variables are
/// rejected: a non-literal path can not participate in dependency tracking.
fn literal_arg(path: &Path, arg: &str, call: &str) -> Result<String> {
    let quoted = arg.len() >= 2
        && (arg.starts_with('"') || arg.starts_with('\''))
        && (arg.ends_with('"') || arg.ends_with('\''));
    if !quoted {
        return Err(Error::Parse {
            path: path.to_owned(),
            reason: format!("vars not allowed in static_url calls: {call}"),
        });
    }
    Ok(arg[1..arg.len() - 1].to_owned())
}
