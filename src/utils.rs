use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use eyre::{Context, Result, eyre};
use sha2::{Digest, Sha256};

use crate::transcript::{Platform, Transcript, TranscriptMeta};

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone)]
pub struct ExportConfig {
    /// Saved pages, or directories of saved pages.
    pub inputs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub format: OutputFormat,
    /// Platform override; `None` means detect per page.
    pub platform: Option<Platform>,
    /// Source URL override for pages saved without one.
    pub source_url: Option<url::Url>,
    pub tags: Option<Vec<String>>,
    pub extract_images: bool,
    pub force: bool,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[value(name = "md")]
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
    Html,
    Both,
}

impl OutputFormat {
    pub fn wants_markdown(&self) -> bool {
        matches!(self, OutputFormat::Markdown | OutputFormat::Both)
    }

    pub fn wants_html(&self) -> bool {
        matches!(self, OutputFormat::Html | OutputFormat::Both)
    }
}

#[derive(Clone, Copy)]
pub enum ProcessResult {
    Created,
    Updated,
    Skipped,
}

#[derive(Clone)]
pub struct FileFrontmatter {
    pub id: String,
    pub content_hash: Option<String>,
    pub extract_images: bool,
}

/// Expand the input list: files stay as they are, directories contribute
/// their `.html`/`.htm` entries in name order.
pub fn gather_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = fs::read_dir(input)
                .wrap_err_with(|| format!("Failed to read directory: {}", input.display()))?;
            let mut found: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
                })
                .collect();
            found.sort();
            if found.is_empty() {
                tracing::warn!(dir = %input.display(), "no .html files in directory");
            }
            files.extend(found);
        } else if input.exists() {
            files.push(input.clone());
        } else {
            return Err(eyre!("Input not found: {}", input.display()));
        }
    }
    Ok(files)
}

/// Stable identity for a page across runs: the conversation id when the page
/// reveals one, else a digest of the input path.
pub fn document_id(input: &Path, meta: &TranscriptMeta) -> String {
    if let Some(id) = &meta.conversation_id {
        return id.clone();
    }
    let digest = Sha256::digest(input.as_os_str().as_encoded_bytes());
    format!("{digest:x}")[..12].to_string()
}

/// Digest of everything that matters for idempotency: the title plus each
/// message's sender and content. Export timestamps stay out on purpose.
pub fn content_hash(transcript: &Transcript) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transcript.meta.title.as_bytes());
    for message in &transcript.messages {
        hasher.update([0u8]);
        hasher.update(message.attribution.kind.label(transcript.platform).as_bytes());
        hasher.update([0u8]);
        hasher.update(message.plain_text().as_bytes());
    }
    let digest = hasher.finalize();
    format!("{digest:x}")
}

/// Filename stem: slugified title plus the export date.
pub fn slug_stem(title: &str, platform: Platform, date: NaiveDate) -> String {
    let raw_slug = slug::slugify(title);
    // Truncate slug to 60 chars (slug output is ASCII-only, so byte == char)
    let slug = raw_slug[..raw_slug.len().min(60)].trim_end_matches('-');
    let base = if slug.is_empty() {
        platform.fallback_stem()
    } else {
        slug
    };
    format!("{}_{}", base, date.format("%Y-%m-%d"))
}

/// First characters of a conversation id, for digest-style filename
/// suffixes. Ids mined from data attributes can be any text, so count
/// characters, not bytes.
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Find the export owned by `id`, confirmed by the `id:` field in its
/// frontmatter. Stems are title slugs, so ownership cannot be read off the
/// filename alone.
pub fn find_existing_file(out_dir: &Path, id: &str) -> Option<PathBuf> {
    fs::read_dir(out_dir)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".md"))
        .find_map(|e| {
            let path = e.path();
            let fm = parse_existing_frontmatter(&path)?;
            if fm.id == id { Some(path) } else { None }
        })
}

/// Build an in-memory index of existing .md files: frontmatter id → path.
pub fn build_file_index(out_dir: &Path) -> HashMap<String, PathBuf> {
    let mut map = HashMap::new();
    let Ok(entries) = fs::read_dir(out_dir) else {
        return map;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(".md") {
            continue;
        }
        if let Some(fm) = parse_existing_frontmatter(&entry.path()) {
            map.insert(fm.id, entry.path());
        }
    }
    map
}

/// Read the YAML frontmatter from an existing .md file and extract relevant fields.
pub fn parse_existing_frontmatter(path: &Path) -> Option<FileFrontmatter> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let first = lines.next()?.ok()?;
    if first.trim() != "---" {
        return None;
    }

    let mut id: Option<String> = None;
    let mut content_hash: Option<String> = None;
    let mut extract_images = false;
    let mut bytes_read = 0usize;

    for line in lines {
        let line = line.ok()?;
        bytes_read += line.len() + 1;
        if bytes_read > 2048 || line.trim() == "---" {
            break;
        }
        if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().trim_matches('\'').trim_matches('"').to_string());
        } else if let Some(rest) = line.strip_prefix("content_hash:") {
            content_hash = Some(rest.trim().trim_matches('\'').trim_matches('"').to_string());
        } else if let Some(rest) = line.strip_prefix("extract_images:") {
            extract_images = rest.trim() == "true";
        }
    }
    id.map(|id| FileFrontmatter {
        id,
        content_hash,
        extract_images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Attribution, ContentSegment, DetectMethod, Message, SenderKind};

    fn transcript_with(title: &str, bodies: &[&str]) -> Transcript {
        let messages = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| Message {
                index: i,
                attribution: Attribution {
                    kind: if i % 2 == 0 {
                        SenderKind::User
                    } else {
                        SenderKind::Assistant
                    },
                    confidence: 0.9,
                    method: DetectMethod::AuthorRole,
                },
                segments: vec![ContentSegment::Text((*body).to_string())],
            })
            .collect();
        Transcript {
            platform: Platform::ChatGpt,
            meta: TranscriptMeta {
                title: title.to_string(),
                ..TranscriptMeta::default()
            },
            messages,
        }
    }

    #[test]
    fn frontmatter_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        fs::write(
            &path,
            "---\nid: abc123\ncontent_hash: 'fff000'\nextract_images: true\n---\n\n# Body\ncontent_hash: not-this\n",
        )
        .unwrap();
        let fm = parse_existing_frontmatter(&path).unwrap();
        assert_eq!(fm.id, "abc123");
        assert_eq!(fm.content_hash.as_deref(), Some("fff000"));
        assert!(fm.extract_images);
    }

    #[test]
    fn frontmatter_requires_delimiter_and_id() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.md");
        fs::write(&plain, "# No frontmatter\n").unwrap();
        assert!(parse_existing_frontmatter(&plain).is_none());

        let no_id = dir.path().join("noid.md");
        fs::write(&no_id, "---\ncontent_hash: abc\n---\n").unwrap();
        assert!(parse_existing_frontmatter(&no_id).is_none());
    }

    #[test]
    fn content_hash_ignores_export_time_but_not_content() {
        let a = content_hash(&transcript_with("T", &["hello there", "general reply"]));
        let b = content_hash(&transcript_with("T", &["hello there", "general reply"]));
        let c = content_hash(&transcript_with("T", &["hello there", "different reply"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn document_id_prefers_conversation_id() {
        let meta = TranscriptMeta {
            conversation_id: Some("conv-42".into()),
            ..TranscriptMeta::default()
        };
        assert_eq!(document_id(Path::new("x.html"), &meta), "conv-42");

        let anon = TranscriptMeta::default();
        let id = document_id(Path::new("x.html"), &anon);
        assert_eq!(id.len(), 12);
        assert_eq!(id, document_id(Path::new("x.html"), &anon));
        assert_ne!(id, document_id(Path::new("y.html"), &anon));
    }

    #[test]
    fn slug_stem_caps_length_and_falls_back() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(
            slug_stem("Borrow checker basics", Platform::ChatGpt, date),
            "borrow-checker-basics_2026-03-14"
        );
        let long = "word ".repeat(40);
        let stem = slug_stem(&long, Platform::ChatGpt, date);
        assert!(stem.len() <= 60 + "_2026-03-14".len());
        assert!(!stem.contains("-_"));

        assert_eq!(
            slug_stem("!!!", Platform::Gemini, date),
            "gemini-conversation_2026-03-14"
        );
    }

    #[test]
    fn short_id_counts_characters_not_bytes() {
        assert_eq!(short_id("abc123def456"), "abc123de");
        assert_eq!(short_id("対話の識別子"), "対話の識別子");
        assert_eq!(short_id("対話の識別子あれこれ"), "対話の識別子あれ");
    }

    #[test]
    fn gather_inputs_expands_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.html"), "x").unwrap();
        fs::write(dir.path().join("a.HTML"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = gather_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html"]);

        assert!(gather_inputs(&[dir.path().join("missing.html")]).is_err());
    }

    #[test]
    fn file_index_maps_ids_to_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one_2026-01-01.md"), "---\nid: one\n---\n").unwrap();
        fs::write(dir.path().join("two_2026-01-01.md"), "---\nid: two\n---\n").unwrap();
        fs::write(dir.path().join("stray.txt"), "id: three").unwrap();
        let index = build_file_index(dir.path());
        assert_eq!(index.len(), 2);
        assert!(index["one"].ends_with("one_2026-01-01.md"));
        assert_eq!(
            find_existing_file(dir.path(), "two"),
            Some(dir.path().join("two_2026-01-01.md"))
        );
        assert_eq!(find_existing_file(dir.path(), "three"), None);
    }

    #[test]
    fn format_selection() {
        assert!(OutputFormat::Markdown.wants_markdown());
        assert!(!OutputFormat::Markdown.wants_html());
        assert!(OutputFormat::Html.wants_html());
        assert!(!OutputFormat::Html.wants_markdown());
        assert!(OutputFormat::Both.wants_markdown() && OutputFormat::Both.wants_html());
    }
}
