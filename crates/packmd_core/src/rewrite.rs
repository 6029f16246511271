use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::assets::{AssetContexts, copy_with_dedup};
use crate::error::PackError;
use crate::naming::NamePolicy;
use crate::options::PackOptions;
use crate::report::FileResult;
use crate::resolve::{ExtractedPath, absolutize, extract_path, is_external, is_within, resolve};

/// Which syntax an image reference was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSyntax {
    Inline,
    Reference,
    Html,
}

fn reference_definition_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*\[([^\]\r\n]+)\]:[ \t]*([^\r\n]+)")
            .expect("invalid reference definition regex")
    })
}

fn inline_image_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("invalid inline image regex")
    })
}

fn reference_image_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"!\[([^\]]*)\]\[([^\]]+)\]").expect("invalid reference image regex")
    })
}

fn html_image_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*\bsrc=["']([^"']+)["'][^>]*>"#)
            .expect("invalid html image regex")
    })
}

/// Reads, backs up, rewrites and saves one document. Every failure is recorded
/// on the returned result. Relative paths are taken from the working directory.
pub fn process_document(
    document: &Path,
    assets_dir: &Path,
    options: &PackOptions,
    contexts: &mut AssetContexts,
) -> FileResult {
    let document: &Path = &absolutize(document);
    let assets_dir: &Path = &absolutize(assets_dir);
    let mut result = FileResult::new(document);

    let content = match fs::read_to_string(document) {
        Ok(content) => content,
        Err(error) => {
            result.push_error(PackError::read(document, error));
            return result;
        }
    };

    if options.backup_enabled {
        let backup = backup_path(document);
        if let Err(error) = fs::copy(document, &backup) {
            result.push_error(PackError::backup(&backup, error));
        }
    }

    let document_dir = document_dir(document);
    let policy = NamePolicy::from_options(options);
    let rewritten = DocumentRewriter {
        document_dir: &document_dir,
        assets_dir,
        delete_old: options.delete_old,
        policy: &policy,
        contexts,
        result: &mut result,
    }
    .rewrite(&content);

    if rewritten != content
        && let Err(error) = fs::write(document, &rewritten)
    {
        result.push_error(PackError::write(document, error));
    }

    info!(
        document = %document.display(),
        found = result.images_found,
        copied = result.copied,
        reused = result.reused,
        errors = result.errors.len(),
        "processed document"
    );
    result
}

/// `<document>.copy`
pub fn backup_path(document: &Path) -> PathBuf {
    let mut name = OsString::from(document.as_os_str());
    name.push(".copy");
    PathBuf::from(name)
}

pub(crate) fn document_dir(document: &Path) -> PathBuf {
    match document.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct DocumentRewriter<'a> {
    document_dir: &'a Path,
    assets_dir: &'a Path,
    delete_old: bool,
    policy: &'a NamePolicy,
    contexts: &'a mut AssetContexts,
    result: &'a mut FileResult,
}

impl DocumentRewriter<'_> {
    fn rewrite(&mut self, content: &str) -> String {
        // Definitions are collected from the untouched text so reference-style
        // images resolve against their original paths. Later lines win.
        let mut definitions: HashMap<String, String> = HashMap::new();
        for caps in reference_definition_regex().captures_iter(content) {
            let id = caps[1].to_string();
            let path = extract_path(&caps[2]).path.to_string();
            definitions.insert(id, path);
        }

        let text = inline_image_regex().replace_all(content, |caps: &Captures<'_>| {
            self.rewrite_capture(caps, 2, ReferenceSyntax::Inline)
        });

        let mut updated: HashSet<String> = HashSet::new();
        for caps in reference_image_regex().captures_iter(&text) {
            let id = &caps[2];
            let Some(path) = definitions.get(id).cloned() else {
                continue;
            };
            if let Some(new_path) = self.handle_image_path(&path, ReferenceSyntax::Reference) {
                definitions.insert(id.to_string(), new_path);
                updated.insert(id.to_string());
            }
        }

        let text = html_image_regex().replace_all(&text, |caps: &Captures<'_>| {
            self.rewrite_capture(caps, 1, ReferenceSyntax::Html)
        });

        // Every definition line carrying an updated id points at the new path.
        let text = reference_definition_regex().replace_all(&text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let id = &caps[1];
            if !updated.contains(id) {
                return whole.to_string();
            }
            let Some(new_path) = definitions.get(id) else {
                return whole.to_string();
            };
            let raw = caps.get(2).map(|found| found.as_str()).unwrap_or_default();
            let extracted = extract_path(raw);
            if extracted.path == new_path {
                return whole.to_string();
            }
            let offset = caps
                .get(2)
                .map(|found| found.start() - caps.get(0).map_or(0, |all| all.start()))
                .unwrap_or(0);
            format!(
                "{}{}",
                &whole[..offset],
                splice_path(raw, &extracted, new_path, true)
            )
        });

        text.into_owned()
    }

    /// Rewrites the path inside capture `group`, leaving the rest of the match intact.
    fn rewrite_capture(
        &mut self,
        caps: &Captures<'_>,
        group: usize,
        syntax: ReferenceSyntax,
    ) -> String {
        let whole = caps.get(0).map(|found| found.as_str()).unwrap_or_default();
        let Some(raw_match) = caps.get(group) else {
            return whole.to_string();
        };
        let raw = raw_match.as_str();
        let extracted = match syntax {
            ReferenceSyntax::Html => html_src_path(raw),
            _ => extract_path(raw),
        };
        let Some(new_path) = self.handle_image_path(extracted.path, syntax) else {
            return whole.to_string();
        };

        let start = raw_match.start() - caps.get(0).map_or(0, |all| all.start());
        let end = start + raw.len();
        format!(
            "{}{}{}",
            &whole[..start],
            splice_path(raw, &extracted, &new_path, syntax != ReferenceSyntax::Html),
            &whole[end..]
        )
    }

    /// Classifies and materializes one reference. Returns the replacement path
    /// on success; every call lands in exactly one counter or one error.
    fn handle_image_path(&mut self, path: &str, syntax: ReferenceSyntax) -> Option<String> {
        self.result.images_found += 1;

        if path.is_empty() {
            debug!(?syntax, "empty image reference");
            self.result.skipped_missing += 1;
            return None;
        }
        if is_external(path) {
            debug!(?syntax, reference = path, "skipping external image");
            self.result.skipped_external += 1;
            return None;
        }

        let absolute = resolve(self.document_dir, path);
        if !absolute.is_file() {
            debug!(
                ?syntax,
                reference = path,
                resolved = %absolute.display(),
                "image not found"
            );
            self.result.skipped_missing += 1;
            return None;
        }

        let slot = self.contexts.slot_mut(self.assets_dir);
        match copy_with_dedup(&absolute, self.assets_dir, self.document_dir, slot, self.policy) {
            Ok(outcome) => {
                self.result.name_conflicts += outcome.name_conflicts;
                if outcome.reused {
                    self.result.reused += 1;
                } else {
                    self.result.copied += 1;
                    if self.delete_old {
                        self.delete_original(&absolute, &outcome.target_absolute);
                    }
                }
                Some(outcome.target_relative)
            }
            Err(error) => {
                self.result.push_error(PackError::Copy {
                    reference: path.to_string(),
                    message: format!("{error:#}"),
                });
                None
            }
        }
    }

    fn delete_original(&mut self, original: &Path, copy: &Path) {
        if !is_within(original, self.document_dir) || is_within(original, self.assets_dir) {
            return;
        }
        match fs::remove_file(original) {
            Ok(()) => debug!(
                original = %original.display(),
                copy = %copy.display(),
                "deleted original image"
            ),
            Err(error) => self.result.push_error(PackError::delete(original, error)),
        }
    }
}

fn html_src_path(raw: &str) -> ExtractedPath<'_> {
    let start = raw.len() - raw.trim_start().len();
    let path = raw.trim();
    ExtractedPath {
        path,
        span: start..start + path.len(),
        bracketed: false,
    }
}

/// Replaces the path span inside `raw`, adding angle brackets when Markdown
/// would otherwise split a path containing whitespace.
fn splice_path(
    raw: &str,
    extracted: &ExtractedPath<'_>,
    new_path: &str,
    markdown: bool,
) -> String {
    let needs_brackets = !extracted.bracketed && new_path.contains(char::is_whitespace);
    let replacement = if markdown && needs_brackets {
        format!("<{new_path}>")
    } else {
        new_path.to_string()
    };
    format!(
        "{}{}{}",
        &raw[..extracted.span.start],
        replacement,
        &raw[extracted.span.end..]
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::options::NamingMode;

    fn write_file(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write");
    }

    fn run(document: &Path, options: &PackOptions) -> FileResult {
        let assets = document_dir(document).join(&options.assets_dir_name);
        let mut contexts = AssetContexts::new(options.naming_start);
        process_document(document, &assets, options, &mut contexts)
    }

    fn accounted(result: &FileResult) -> usize {
        result.copied
            + result.reused
            + result.skipped_external
            + result.skipped_missing
            + result.errors.iter().filter(|e| e.starts_with("failed to copy")).count()
    }

    #[test]
    fn inline_image_is_copied_and_rewritten() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("img").join("photo.png"), b"photo-bytes");
        write_file(&doc, b"# Note\n\n![alt](./img/photo.png)\n");

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.copied, 1);
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "# Note\n\n![alt](assets/photo.png)\n"
        );
        assert_eq!(
            fs::read(temp.path().join("assets").join("photo.png")).expect("read"),
            b"photo-bytes"
        );
        assert!(result.is_success());
    }

    #[test]
    fn titles_and_brackets_survive_rewrite() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("my pics").join("a b.png"), b"ab");
        write_file(&temp.path().join("c.png"), b"c");
        write_file(
            &doc,
            b"![one](<my pics/a b.png> \"Title\")\n![two](c.png 'cap')\n",
        );

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.copied, 2);
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![one](<assets/a b.png> \"Title\")\n![two](assets/c.png 'cap')\n"
        );
    }

    #[test]
    fn new_path_with_spaces_gets_brackets() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("x.png"), b"x");
        write_file(&doc, b"![x](x.png)\n");
        let options = PackOptions {
            naming_mode: NamingMode::Fixed,
            naming_prefix: "cover shot".to_string(),
            ..PackOptions::default()
        };

        run(&doc, &options);

        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![x](<assets/cover shot.png>)\n"
        );
    }

    #[test]
    fn reference_style_images_rewrite_their_definition() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("img").join("logo.png"), b"logo");
        write_file(
            &doc,
            b"![Logo][logo]\n[site]: https://example.com\n[logo]: ./img/logo.png \"Our logo\"\n",
        );

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.images_found, 1);
        assert_eq!(result.copied, 1);
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![Logo][logo]\n[site]: https://example.com\n[logo]: assets/logo.png \"Our logo\"\n"
        );
    }

    #[test]
    fn repeated_reference_id_reuses_the_copy() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&doc, b"![one][a] and ![two][a]\n\n[a]: a.png\n");

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.images_found, 2);
        assert_eq!(result.copied, 1);
        assert_eq!(result.reused, 1);
        assert!(fs::read_to_string(&doc).expect("read").ends_with("[a]: assets/a.png\n"));
    }

    #[test]
    fn unknown_reference_id_is_not_counted() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&doc, b"![alt][nowhere]\n");
        let result = run(&doc, &PackOptions::default());
        assert_eq!(result.images_found, 0);
    }

    #[test]
    fn html_images_are_rewritten_in_place() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("pic.jpg"), b"pic");
        write_file(&doc, b"<IMG width=\"20\" src='pic.jpg' alt=\"pic\">\n");

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.copied, 1);
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "<IMG width=\"20\" src='assets/pic.jpg' alt=\"pic\">\n"
        );
    }

    #[test]
    fn external_and_missing_are_skipped_without_writes() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        let text = concat!(
            "![a](http://a.com/b.png)\n",
            "![b](./nope.png)\n",
            "<img src=\"data:image/png;base64,AA\">\n",
        );
        write_file(&doc, text.as_bytes());

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.images_found, 3);
        assert_eq!(result.skipped_external, 2);
        assert_eq!(result.skipped_missing, 1);
        assert!(!result.is_success());
        assert!(!temp.path().join("assets").exists());
        assert_eq!(fs::read_to_string(&doc).expect("read"), text);
    }

    #[test]
    fn sequence_names_follow_order_of_appearance() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("z.png"), b"z");
        write_file(&temp.path().join("y.jpg"), b"y");
        write_file(&temp.path().join("x.gif"), b"x");
        write_file(&doc, b"![](z.png) ![](y.jpg) ![](x.gif)\n");
        let options = PackOptions {
            naming_mode: NamingMode::Sequence,
            ..PackOptions::default()
        };

        run(&doc, &options);

        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![](assets/img-1.png) ![](assets/img-2.jpg) ![](assets/img-3.gif)\n"
        );
    }

    #[test]
    fn duplicate_content_in_one_document_is_copied_once() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"same");
        write_file(&temp.path().join("b.png"), b"same");
        write_file(&doc, b"![](a.png)\n<img src=\"b.png\">\n");

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.copied, 1);
        assert_eq!(result.reused, 1);
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![](assets/a.png)\n<img src=\"assets/a.png\">\n"
        );
    }

    #[test]
    fn backup_is_written_before_rewrite() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&doc, b"![](a.png)\n");
        let options = PackOptions {
            backup_enabled: true,
            ..PackOptions::default()
        };

        run(&doc, &options);

        assert_eq!(
            fs::read_to_string(temp.path().join("note.md.copy")).expect("read backup"),
            "![](a.png)\n"
        );
    }

    #[test]
    fn delete_old_removes_only_originals_inside_document_tree() {
        let temp = tempdir().expect("tempdir");
        let doc_dir = temp.path().join("doc");
        let doc = doc_dir.join("note.md");
        write_file(&doc_dir.join("img").join("local.png"), b"local");
        write_file(&temp.path().join("shared").join("shared.png"), b"shared");
        write_file(&doc, b"![](img/local.png)\n![](../shared/shared.png)\n");
        let options = PackOptions {
            delete_old: true,
            ..PackOptions::default()
        };

        let result = run(&doc, &options);

        assert_eq!(result.copied, 2);
        assert!(!doc_dir.join("img").join("local.png").exists());
        assert!(temp.path().join("shared").join("shared.png").exists());
        assert!(doc_dir.join("assets").join("local.png").exists());
    }

    #[test]
    fn deleted_original_referenced_again_is_missing() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&doc, b"![](a.png)\n<img src=\"a.png\">\n");
        let options = PackOptions {
            delete_old: true,
            ..PackOptions::default()
        };

        let result = run(&doc, &options);

        assert_eq!(result.copied, 1);
        assert_eq!(result.reused, 0);
        assert_eq!(result.skipped_missing, 1);
        assert!(!temp.path().join("a.png").exists());
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![](assets/a.png)\n<img src=\"a.png\">\n"
        );
    }

    #[test]
    fn delete_old_works_with_relative_document_paths() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&doc, b"![](a.png)\n");
        let cwd = std::env::current_dir().expect("cwd");
        let relative_doc = crate::resolve::relative_path(&cwd, &doc);
        assert!(relative_doc.is_relative());
        let options = PackOptions {
            delete_old: true,
            ..PackOptions::default()
        };

        let result = run(&relative_doc, &options);

        assert_eq!(result.copied, 1);
        assert!(result.errors.is_empty());
        assert!(!temp.path().join("a.png").exists());
        assert!(temp.path().join("assets").join("a.png").exists());
    }

    #[test]
    fn failed_backup_is_recorded_and_rewrite_continues() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&doc, b"![](a.png)\n");
        fs::create_dir_all(temp.path().join("note.md.copy")).expect("mkdir");
        let options = PackOptions {
            backup_enabled: true,
            ..PackOptions::default()
        };

        let result = run(&doc, &options);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("failed to back up"));
        assert_eq!(result.copied, 1);
        assert_eq!(fs::read_to_string(&doc).expect("read"), "![](assets/a.png)\n");
    }

    #[test]
    fn duplicate_definitions_use_the_last_and_rewrite_every_line() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("first.png"), b"first");
        write_file(&temp.path().join("second.png"), b"second");
        write_file(&doc, b"![x][a]\n[a]: first.png\n[a]: second.png\n");

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.copied, 1);
        assert!(temp.path().join("assets").join("second.png").exists());
        assert!(!temp.path().join("assets").join("first.png").exists());
        assert_eq!(
            fs::read_to_string(&doc).expect("read"),
            "![x][a]\n[a]: assets/second.png\n[a]: assets/second.png\n"
        );
    }

    #[test]
    fn unreadable_document_reports_read_error() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("missing.md");
        let result = run(&doc, &PackOptions::default());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("failed to read"));
    }

    #[test]
    fn every_reference_is_accounted_for() {
        let temp = tempdir().expect("tempdir");
        let doc = temp.path().join("note.md");
        write_file(&temp.path().join("a.png"), b"a");
        write_file(&temp.path().join("b.png"), b"a");
        fs::create_dir_all(temp.path().join("folder.png")).expect("mkdir");
        write_file(
            &doc,
            concat!(
                "![](a.png) ![](b.png) ![](https://x/y.png) ![](gone.png) ![](folder.png) ",
                "![][r]\n[r]: a.png\n",
            )
            .as_bytes(),
        );

        let result = run(&doc, &PackOptions::default());

        assert_eq!(result.images_found, 6);
        assert_eq!(accounted(&result), result.images_found);

        // A regular file where the assets folder should be turns the copy into an error.
        let blocked = temp.path().join("blocked");
        let blocked_doc = blocked.join("note.md");
        write_file(&blocked.join("a.png"), b"a");
        write_file(&blocked.join("assets"), b"not a directory");
        write_file(&blocked_doc, b"![](a.png) ![](https://x/y.png)\n");

        let result = run(&blocked_doc, &PackOptions::default());

        assert_eq!(result.images_found, 2);
        assert_eq!(result.copied, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("failed to copy a.png"));
        assert_eq!(accounted(&result), result.images_found);
        assert_eq!(
            fs::read_to_string(&blocked_doc).expect("read"),
            "![](a.png) ![](https://x/y.png)\n"
        );
    }
}
