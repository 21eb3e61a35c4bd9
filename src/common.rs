//! Common functionality and types.

use console::Emoji;
use md5::{Digest, Md5};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

pub static BUILDING: Emoji = Emoji("📦 ", "");
pub static SUCCESS: Emoji = Emoji("✅ ", "");
pub static ERROR: Emoji = Emoji("❌ ", "");
pub static STARTING: Emoji = Emoji("🚀 ", "");
pub static PUBLISHING: Emoji = Emoji("📡 ", "");

/// Lowercase hex MD5 of the given bytes.
///
/// MD5 is part of the manifest compatibility contract: versions persisted by
/// earlier generations must keep resolving, so the digest can not change.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for byte in digest {
        // writing to a String can not fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Build the regex source used to find static asset references that start
/// with the given static URL prefix.
///
/// Used for finding static dependencies inside JS and CSS files and for
/// rewriting static references in compiled assets. Group 1 is the prefix,
/// group 2 the referenced relative path.
pub fn static_ref_pattern(static_url_prefix: &str) -> String {
    format!(r"({})(.*?\.\w+)", regex::escape(static_url_prefix))
}

/// Resolve `..` and `.` components lexically, without touching the
/// filesystem.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// The on-disk location of a static asset named by a path relative to the
/// static root. Absolute references pass through untouched.
pub fn abs_static_path(static_dir: &Path, rel_path: &str) -> PathBuf {
    // `join` replaces the base when the right-hand side is absolute, which
    // is exactly the passthrough we want for out-of-root references.
    static_dir.join(rel_path)
}

/// The manifest identity of an asset: its path relative to the static root,
/// with forward slashes. Paths outside the static root are kept verbatim.
pub fn rel_static_path(static_dir: &Path, path: &Path) -> String {
    match path.strip_prefix(static_dir) {
        Ok(rel) => path_to_slash(rel),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Take a path and turn it into a URL-compatible string, replacing the path
/// separator with a forward slash on Windows.
pub fn path_to_slash(path: impl AsRef<Path>) -> String {
    let parts = path
        .as_ref()
        .iter()
        .map(|c| c.to_string_lossy())
        .collect::<Vec<_>>();
    parts.join("/")
}

/// File extension of the given relative path, with the leading dot. Empty
/// when the path has no extension.
pub fn dot_ext(rel_path: &str) -> String {
    match Path::new(rel_path).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    }
}

/// Guess the MIME type of a file, with fallbacks for the font formats the
/// registry maps poorly. Used for data URIs and for upload content types.
pub fn guess_mime(path: &Path) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.to_string();
    }
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "otf" => "application/octet-stream",
        "ttf" => "font/ttf",
        "eot" => "application/vnd.ms-fontobject",
        "woff" => "application/x-font-woff",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
    .to_owned()
}
