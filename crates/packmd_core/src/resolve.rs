use std::borrow::Cow;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

const EXTERNAL_PREFIXES: &[&str] = &["http://", "https://", "data:", "blob:", "//"];

/// The path portion of a raw Markdown reference such as `<a b.png> "Title"`.
/// `span` is the byte range of `path` inside the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPath<'a> {
    pub path: &'a str,
    pub span: Range<usize>,
    pub bracketed: bool,
}

/// Strips enclosing `<...>`, a trailing quoted or parenthesized title and
/// surrounding whitespace.
pub fn extract_path(raw: &str) -> ExtractedPath<'_> {
    static TITLE: OnceLock<Regex> = OnceLock::new();

    let leading = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();

    // `<path with spaces> "title"`: everything after the closing bracket is title.
    if trimmed.starts_with('<')
        && let Some(close) = trimmed.find('>')
        && close > 1
    {
        return trimmed_piece(raw, leading + 1, &trimmed[1..close], true);
    }

    let title = TITLE.get_or_init(|| {
        Regex::new(r#"(?s)^(.+?)(\s+(?:"[^"]*"|'[^']*'|\([^)]*\)))?\s*$"#)
            .expect("invalid markdown title regex")
    });
    let piece = title
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|found| found.range())
        .unwrap_or(0..trimmed.len());
    trimmed_piece(raw, leading + piece.start, &trimmed[piece], false)
}

fn trimmed_piece<'a>(
    raw: &'a str,
    offset: usize,
    candidate: &str,
    bracketed: bool,
) -> ExtractedPath<'a> {
    let inner_leading = candidate.len() - candidate.trim_start().len();
    let length = candidate.trim().len();
    let start = offset + inner_leading;
    ExtractedPath {
        path: &raw[start..start + length],
        span: start..start + length,
        bracketed,
    }
}

/// Remote or embedded references that are never copied.
pub fn is_external(path: &str) -> bool {
    let lower = path.trim().to_ascii_lowercase();
    EXTERNAL_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Resolves a candidate reference against the document directory. Purely
/// lexical; the caller checks existence.
pub fn resolve(document_dir: &Path, candidate: &str) -> PathBuf {
    let decoded = decode_file_url(candidate);
    if is_drive_path(&decoded) || Path::new(decoded.as_ref()).is_absolute() {
        return normalize_path(Path::new(decoded.as_ref()));
    }
    normalize_path(&document_dir.join(decoded.as_ref()))
}

fn decode_file_url(value: &str) -> Cow<'_, str> {
    if !value.to_ascii_lowercase().starts_with("file://") {
        return Cow::Borrowed(value);
    }
    let raw_path = match Url::parse(value) {
        Ok(url) => url.path().to_string(),
        Err(_) => value["file://".len()..].to_string(),
    };
    let decoded = percent_decode_str(&raw_path).decode_utf8_lossy().into_owned();
    let bytes = decoded.as_bytes();
    let slash_before_drive = bytes.len() >= 4
        && bytes[0] == b'/'
        && bytes[1].is_ascii_alphabetic()
        && bytes[2] == b':'
        && bytes[3] == b'/';
    if slash_before_drive {
        return Cow::Owned(decoded[1..].to_string());
    }
    Cow::Owned(decoded)
}

fn is_drive_path(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'/' | b'\\')
}

/// Lexical normalization: drops `.`, folds `..` into the preceding segment and
/// keeps leading `..` of relative paths.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut output = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => output.push(prefix.as_os_str()),
            Component::RootDir => output.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match output.components().next_back() {
                Some(Component::Normal(_)) => {
                    output.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => output.push(".."),
            },
            Component::Normal(part) => output.push(part),
        }
    }
    if output.as_os_str().is_empty() {
        output.push(".");
    }
    output
}

/// Path from `from_dir` to `target`; both are normalized first.
pub fn relative_path(from_dir: &Path, target: &Path) -> PathBuf {
    let from = normalize_path(from_dir);
    let target = normalize_path(target);
    let from_parts: Vec<Component<'_>> = from
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    let target_parts: Vec<Component<'_>> = target
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();

    let common = from_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(left, right)| left == right)
        .count();

    let mut output = PathBuf::new();
    for _ in common..from_parts.len() {
        output.push("..");
    }
    for part in &target_parts[common..] {
        output.push(part.as_os_str());
    }
    if output.as_os_str().is_empty() {
        output.push(".");
    }
    output
}

/// Joins relative paths onto the working directory, then normalizes.
pub fn absolutize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_path(&absolute)
}

/// True when `path` is strictly below `base`.
pub fn is_within(path: &Path, base: &Path) -> bool {
    let path = normalize_path(path);
    let base = normalize_path(base);
    path != base && path.starts_with(&base)
}

pub fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
