//! Message content extraction and cleaning.
//!
//! Walks a content element and flattens it into [`ContentSegment`]s: prose is
//! collapsed the way a browser's `innerText` would collapse it, `<pre>` blocks
//! become code segments with whitespace kept verbatim, media turns into
//! placeholders (or extracted asset links), and simple formatting is rewritten
//! as Markdown markers in place.

use std::path::Path;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use eyre::{Result, bail, eyre};
use regex::Regex;
use scraper::{ElementRef, Node};
use sha2::{Digest, Sha256};

use crate::dom;
use crate::transcript::{ContentSegment, Platform};

static LANGUAGE_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"language-([a-zA-Z0-9]+)").unwrap());
static EXCESS_NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// What to do with `<img>` elements.
#[derive(Debug, Clone, Copy)]
pub enum ImagePolicy<'a> {
    /// `[Image: alt]` / `[Image]` text placeholders.
    Placeholder,
    /// Decode `data:` URLs into files under `assets_dir` and link to them;
    /// anything that cannot be decoded falls back to a placeholder.
    Extract { assets_dir: &'a Path },
}

/// Flatten `root` into cleaned segments.
pub fn extract_segments(
    root: ElementRef<'_>,
    platform: Platform,
    images: ImagePolicy<'_>,
) -> Vec<ContentSegment> {
    let mut builder = SegmentBuilder {
        platform,
        images,
        segments: Vec::new(),
        text: String::new(),
    };
    if root.value().name() == "pre" {
        builder.push_code(root);
    } else {
        builder.walk_children(root);
    }
    builder.finish()
}

enum BlockKind {
    /// Paragraph-like: blank line before and after.
    Spaced,
    /// Structural: a single line break before and after.
    Line,
    Inline,
}

fn block_kind(name: &str) -> BlockKind {
    match name {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" | "blockquote" | "table" => {
            BlockKind::Spaced
        }
        "div" | "section" | "article" | "header" | "footer" | "main" | "aside" | "figure"
        | "figcaption" | "details" | "summary" | "form" | "thead" | "tbody" | "tr" | "hr" => {
            BlockKind::Line
        }
        _ => BlockKind::Inline,
    }
}

struct SegmentBuilder<'p> {
    platform: Platform,
    images: ImagePolicy<'p>,
    segments: Vec<ContentSegment>,
    text: String,
}

impl SegmentBuilder<'_> {
    fn finish(mut self) -> Vec<ContentSegment> {
        self.flush_text();
        self.segments
    }

    fn walk_children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => self.push_inline_text(t),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.walk_element(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    fn walk_element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if is_stripped(el, name, self.platform) {
            return;
        }
        match name {
            "pre" => self.push_code(el),
            "br" => self.text.push('\n'),
            "img" | "canvas" | "video" | "audio" => {
                let token = self.media_text(el, name);
                self.text.push_str(&token);
            }
            "a" => self.push_link(el),
            "strong" | "b" => self.push_wrapped(el, "**"),
            "em" | "i" => self.push_wrapped(el, "*"),
            "code" => self.push_wrapped(el, "`"),
            "li" => {
                self.ensure_line_break();
                self.text.push_str("- ");
                self.walk_children(el);
                self.ensure_line_break();
            }
            "td" | "th" => {
                self.walk_children(el);
                self.push_inline_text(" ");
            }
            _ => match block_kind(name) {
                BlockKind::Spaced => {
                    self.ensure_blank_line();
                    self.walk_children(el);
                    self.ensure_blank_line();
                }
                BlockKind::Line => {
                    self.ensure_line_break();
                    self.walk_children(el);
                    self.ensure_line_break();
                }
                BlockKind::Inline => self.walk_children(el),
            },
        }
    }

    /// Collapse whitespace runs like rendered text would, keeping word
    /// boundaries that the markup implies.
    fn push_inline_text(&mut self, raw: &str) {
        if raw.trim().is_empty() {
            if self.needs_space() && !raw.is_empty() {
                self.text.push(' ');
            }
            return;
        }
        if raw.starts_with(char::is_whitespace) && self.needs_space() {
            self.text.push(' ');
        }
        let mut first = true;
        for word in raw.split_whitespace() {
            if !first {
                self.text.push(' ');
            }
            self.text.push_str(word);
            first = false;
        }
        if raw.ends_with(char::is_whitespace) {
            self.text.push(' ');
        }
    }

    fn push_wrapped(&mut self, el: ElementRef<'_>, marker: &str) {
        let inner = collapse_ws(&dom::text_content(el));
        if inner.is_empty() {
            return;
        }
        self.text.push_str(marker);
        self.text.push_str(&inner);
        self.text.push_str(marker);
    }

    fn push_link(&mut self, el: ElementRef<'_>) {
        let text = collapse_ws(&dom::text_content(el));
        let href = el.value().attr("href").unwrap_or("");
        if !text.is_empty() && !href.is_empty() && text != href {
            self.text.push_str(&format!("[{text}]({href})"));
        } else if !text.is_empty() {
            self.push_inline_text(&text);
        }
    }

    fn push_code(&mut self, pre: ElementRef<'_>) {
        let lang = code_language(pre);
        let mut code = String::new();
        collect_code_text(pre, &mut code);
        let code = code.trim();
        if code.is_empty() {
            return;
        }
        self.flush_text();
        self.segments.push(ContentSegment::Code {
            lang,
            text: code.to_string(),
        });
    }

    fn media_text(&self, el: ElementRef<'_>, name: &str) -> String {
        match name {
            "img" => {
                let alt = el.value().attr("alt").map(str::trim).unwrap_or("");
                if let ImagePolicy::Extract { assets_dir } = self.images
                    && let Some(src) = el.value().attr("src")
                    && src.starts_with("data:")
                {
                    match write_data_url_asset(src, assets_dir) {
                        Ok(filename) => {
                            let label = if alt.is_empty() { "Image" } else { alt };
                            return format!("![{label}](assets/{filename})");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "could not extract inline image");
                        }
                    }
                }
                if alt.is_empty() {
                    "[Image]".to_string()
                } else {
                    format!("[Image: {alt}]")
                }
            }
            "canvas" => "[Canvas/Chart]".to_string(),
            "video" => "[Video]".to_string(),
            "audio" => "[Audio]".to_string(),
            _ => "[Media]".to_string(),
        }
    }

    fn needs_space(&self) -> bool {
        self.text.chars().last().is_some_and(|c| !c.is_whitespace())
    }

    fn ensure_line_break(&mut self) {
        while self.text.ends_with(' ') {
            self.text.pop();
        }
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn ensure_blank_line(&mut self) {
        self.ensure_line_break();
        if !self.text.is_empty() && !self.text.ends_with("\n\n") {
            self.text.push('\n');
        }
    }

    fn flush_text(&mut self) {
        let cleaned = clean_markdown(&self.text);
        self.text.clear();
        if !cleaned.is_empty() {
            self.segments.push(ContentSegment::Text(cleaned));
        }
    }
}

/// Elements that never contribute content. The extended class list only
/// applies to Gemini, whose action toolbars sit inside the message body.
fn is_stripped(el: ElementRef<'_>, name: &str, platform: Platform) -> bool {
    if matches!(name, "button" | "svg" | "script" | "style" | "noscript") {
        return true;
    }
    if platform == Platform::Gemini {
        let class = dom::class_text(el);
        if ["copy", "edit", "regenerate", "more"]
            .iter()
            .any(|c| class.contains(c))
        {
            return true;
        }
        if dom::attr_contains(el, "aria-label", "copy") {
            return true;
        }
    }
    false
}

/// Language tag for a `<pre>` block: `language-*` class first, then
/// `data-language` / `data-lang` on the block or its `<code>` child.
fn code_language(pre: ElementRef<'_>) -> Option<String> {
    if let Some(code_sel) = dom::selector("code") {
        for code in pre.select(&code_sel) {
            if let Some(class) = code.value().attr("class")
                && let Some(caps) = LANGUAGE_CLASS_RE.captures(class)
            {
                return Some(caps[1].to_string());
            }
            for attr in ["data-language", "data-lang"] {
                if let Some(lang) = code.value().attr(attr) {
                    return Some(lang.to_string());
                }
            }
        }
    }
    for attr in ["data-language", "data-lang"] {
        if let Some(lang) = pre.value().attr(attr) {
            return Some(lang.to_string());
        }
    }
    None
}

/// Text inside a `<pre>`, whitespace verbatim. Copy buttons and the sticky
/// header row some UIs render above code are skipped.
fn collect_code_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                let name = e.name();
                if matches!(name, "button" | "svg" | "script" | "style" | "noscript") {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    if dom::class_text(child_el).contains("copy") {
                        continue;
                    }
                    collect_code_text(child_el, out);
                    if matches!(name, "div" | "p") && !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Decode one `data:` URL and persist it under `assets_dir`, named by content
/// hash so repeated exports stay idempotent. Returns the bare filename.
fn write_data_url_asset(src: &str, assets_dir: &Path) -> Result<String> {
    let rest = src.strip_prefix("data:").ok_or_else(|| eyre!("not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| eyre!("malformed data URL"))?;
    if !meta.ends_with(";base64") {
        bail!("unsupported data URL encoding: {meta}");
    }
    let bytes = BASE64.decode(payload.trim())?;
    if bytes.is_empty() {
        bail!("empty image payload");
    }

    let ext = infer::get(&bytes)
        .map(|t| t.extension().to_string())
        .unwrap_or_else(|| extension_from_mime(meta));
    let digest = Sha256::digest(&bytes);
    let hex = format!("{digest:x}");
    let filename = format!("{}.{}", &hex[..8], ext);

    std::fs::create_dir_all(assets_dir)?;
    let path = assets_dir.join(&filename);
    if !path.exists() {
        std::fs::write(&path, &bytes)?;
    }
    Ok(filename)
}

fn extension_from_mime(meta: &str) -> String {
    let subtype = meta
        .split(';')
        .next()
        .and_then(|mime| mime.split('/').nth(1))
        .unwrap_or("bin");
    let subtype = subtype.split('+').next().unwrap_or("bin");
    match subtype {
        "jpeg" => "jpg".to_string(),
        "" => "bin".to_string(),
        other => other.to_string(),
    }
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Final text cleanup: double lone backslashes so they survive Markdown,
/// collapse runs of blank lines, and undo HTML entities that leaked through
/// as literal text.
fn clean_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('\\') | Some('*') | Some('_') | Some('`') => escaped.push('\\'),
                _ => escaped.push_str("\\\\"),
            }
        } else {
            escaped.push(c);
        }
    }
    let collapsed = EXCESS_NEWLINES_RE.replace_all(&escaped, "\n\n");
    collapsed
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn segments_of(body: &str, platform: Platform) -> Vec<ContentSegment> {
        let doc = Html::parse_document(&format!(
            r#"<html><body><div id="content">{body}</div></body></html>"#
        ));
        let root = doc
            .select(&Selector::parse("#content").unwrap())
            .next()
            .unwrap();
        extract_segments(root, platform, ImagePolicy::Placeholder)
    }

    fn single_text(body: &str) -> String {
        let segs = segments_of(body, Platform::ChatGpt);
        assert_eq!(segs.len(), 1, "expected one text segment, got {segs:?}");
        match &segs[0] {
            ContentSegment::Text(t) => t.clone(),
            other => panic!("expected text segment, got {other:?}"),
        }
    }

    #[test]
    fn code_block_with_language_class() {
        let segs = segments_of(
            "<p>Try this:</p><pre><code class=\"language-python\">print('hi')\nprint('bye')</code></pre>",
            Platform::ChatGpt,
        );
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0], ContentSegment::Text("Try this:".into()));
        assert_eq!(
            segs[1],
            ContentSegment::Code {
                lang: Some("python".into()),
                text: "print('hi')\nprint('bye')".into()
            }
        );
    }

    #[test]
    fn code_language_from_data_attribute() {
        let segs = segments_of(
            r#"<pre data-lang="rust"><code>fn main() {}</code></pre>"#,
            Platform::ChatGpt,
        );
        assert_eq!(
            segs,
            vec![ContentSegment::Code {
                lang: Some("rust".into()),
                text: "fn main() {}".into()
            }]
        );
    }

    #[test]
    fn code_block_skips_copy_header() {
        let segs = segments_of(
            r#"<pre><div class="copy-header">python<button>Copy code</button></div><code>x = 1</code></pre>"#,
            Platform::ChatGpt,
        );
        assert_eq!(
            segs,
            vec![ContentSegment::Code {
                lang: None,
                text: "x = 1".into()
            }]
        );
    }

    #[test]
    fn media_placeholders() {
        let text = single_text(
            r#"<p><img alt="a diagram"> and <img src="x.png"> and <canvas></canvas> and <video></video></p>"#,
        );
        assert_eq!(
            text,
            "[Image: a diagram] and [Image] and [Canvas/Chart] and [Video]"
        );
    }

    #[test]
    fn links_become_markdown() {
        let text = single_text(
            r#"<p>see <a href="https://example.org/docs">the docs</a> or <a href="https://example.org/x">https://example.org/x</a></p>"#,
        );
        assert_eq!(
            text,
            "see [the docs](https://example.org/docs) or https://example.org/x"
        );
    }

    #[test]
    fn formatting_markers() {
        let text = single_text("<p>a <strong>bold</strong> and <em>slanted</em> <code>word()</code></p>");
        assert_eq!(text, "a **bold** and *slanted* `word()`");
    }

    #[test]
    fn list_items_get_dashes() {
        let text = single_text("<ul><li>first</li><li>second</li></ul>");
        assert_eq!(text, "- first\n- second");
    }

    #[test]
    fn paragraphs_separated_by_blank_line() {
        let text = single_text("<p>one</p><p>two</p>");
        assert_eq!(text, "one\n\ntwo");
    }

    #[test]
    fn whitespace_collapses_like_rendered_text() {
        let text = single_text("<p>a\n    lot   of\n  space</p>");
        assert_eq!(text, "a lot of space");
    }

    #[test]
    fn gemini_strips_action_chrome() {
        let segs = segments_of(
            r#"<p>answer text here</p><div class="copy-button-wrap">Copy</div><div class="regenerate-row">Regenerate</div>"#,
            Platform::Gemini,
        );
        assert_eq!(segs, vec![ContentSegment::Text("answer text here".into())]);
    }

    #[test]
    fn chatgpt_keeps_plain_divs() {
        let segs = segments_of(
            r#"<div>first line</div><div class="copy-ish">second line</div>"#,
            Platform::ChatGpt,
        );
        assert_eq!(
            segs,
            vec![ContentSegment::Text("first line\nsecond line".into())]
        );
    }

    #[test]
    fn clean_markdown_escapes_lone_backslashes() {
        assert_eq!(clean_markdown(r"C:\temp\file"), r"C:\\temp\\file");
        assert_eq!(clean_markdown(r"kept \* marker"), r"kept \* marker");
    }

    #[test]
    fn clean_markdown_collapses_newlines_and_entities() {
        assert_eq!(clean_markdown("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_markdown("&lt;tag&gt; &amp; more"), "<tag> & more");
    }

    #[test]
    fn extracts_data_url_image_to_assets() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        // 1x1 transparent PNG
        let png = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
        let doc = Html::parse_document(&format!(
            r#"<html><body><div id="c"><p>pic: <img src="data:image/png;base64,{png}" alt="dot"></p></div></body></html>"#
        ));
        let root = doc.select(&Selector::parse("#c").unwrap()).next().unwrap();
        let segs = extract_segments(
            root,
            Platform::ChatGpt,
            ImagePolicy::Extract {
                assets_dir: &assets,
            },
        );

        let ContentSegment::Text(text) = &segs[0] else {
            panic!("expected text segment");
        };
        assert!(text.starts_with("pic: ![dot](assets/"), "got: {text}");
        assert!(text.ends_with(".png)"), "got: {text}");

        let written: Vec<_> = std::fs::read_dir(&assets).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn bad_data_url_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Html::parse_document(
            r#"<html><body><div id="c"><img src="data:image/png;base64,!!!not-base64!!!"></div></body></html>"#,
        );
        let root = doc.select(&Selector::parse("#c").unwrap()).next().unwrap();
        let segs = extract_segments(
            root,
            Platform::ChatGpt,
            ImagePolicy::Extract {
                assets_dir: &dir.path().join("assets"),
            },
        );
        assert_eq!(segs, vec![ContentSegment::Text("[Image]".into())]);
    }
}
