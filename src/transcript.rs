//! Type definitions for a detected conversation transcript.
//!
//! Everything here is transient: a transcript lives only for the duration of a
//! single export run and owns plain strings, never references into the parsed
//! document.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The chat product a page was saved from.
///
/// The two platforms share one detection pipeline; everything that differs
/// between them (selector lists, labels, thresholds, heuristic tables) hangs
/// off this enum instead of living in per-exporter copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Gemini,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "ChatGPT",
            Platform::Gemini => "Gemini",
        }
    }

    /// Label used for assistant-authored messages in the rendered output.
    pub fn assistant_label(&self) -> &'static str {
        self.name()
    }

    /// Label used for user-authored messages in the rendered output.
    pub fn user_label(&self) -> &'static str {
        "You"
    }

    /// Host shown in the `**Source:**` line when the page itself carries no URL.
    pub fn source_host(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chat.openai.com",
            Platform::Gemini => "gemini.google.com",
        }
    }

    pub fn home_url(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "https://chat.openai.com/",
            Platform::Gemini => "https://gemini.google.com/",
        }
    }

    pub fn default_title(&self) -> String {
        format!("Conversation with {}", self.name())
    }

    /// Placeholder titles that should never win the title cascade.
    pub fn generic_titles(&self) -> &'static [&'static str] {
        match self {
            Platform::ChatGpt => &["chatgpt", "new chat", "untitled"],
            Platform::Gemini => &["gemini", "new chat", "untitled", "chat", "bard"],
        }
    }

    /// Filename stem used when the title slugifies to nothing.
    pub fn fallback_stem(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chatgpt-conversation",
            Platform::Gemini => "gemini-conversation",
        }
    }

    /// Inclusive bounds on raw candidate text length. Anything outside is
    /// treated as UI chrome or a rendering accident, not a message.
    pub fn candidate_len_bounds(&self) -> (usize, usize) {
        match self {
            Platform::ChatGpt => (10, 100_000),
            Platform::Gemini => (30, 100_000),
        }
    }

    /// Minimum whitespace-separated word count for a candidate.
    pub fn min_candidate_words(&self) -> usize {
        match self {
            Platform::ChatGpt => 3,
            Platform::Gemini => 5,
        }
    }

    /// Minimum cleaned-content length; shorter messages are dropped as
    /// leaked UI text.
    pub fn min_message_len(&self) -> usize {
        match self {
            Platform::ChatGpt => 20,
            Platform::Gemini => 30,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Senders
// ---------------------------------------------------------------------------

/// Who authored a message block, as far as the heuristics can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    User,
    Assistant,
    System,
    Unknown,
}

impl SenderKind {
    /// Display label for the rendered output.
    pub fn label(&self, platform: Platform) -> &'static str {
        match self {
            SenderKind::User => platform.user_label(),
            SenderKind::Assistant => platform.assistant_label(),
            SenderKind::System => "System",
            SenderKind::Unknown => "Unknown",
        }
    }

    /// CSS class used by the printable HTML template.
    pub fn css_class(&self) -> &'static str {
        match self {
            SenderKind::User => "user",
            SenderKind::Assistant => "assistant",
            SenderKind::System => "system",
            SenderKind::Unknown => "unknown",
        }
    }

    /// Classify a free-form sender label ("You", "ChatGPT:", "assistant", ...).
    pub fn classify_label(label: &str) -> SenderKind {
        let name = label.to_lowercase();
        if name.contains("you") || name.contains("user") || name.contains("human") {
            SenderKind::User
        } else if name.contains("chatgpt")
            || name.contains("gemini")
            || name.contains("bard")
            || name.contains("assistant")
            || name.contains("ai")
        {
            SenderKind::Assistant
        } else if name.contains("system") {
            SenderKind::System
        } else {
            SenderKind::Unknown
        }
    }

    pub fn flipped(&self) -> SenderKind {
        match self {
            SenderKind::User => SenderKind::Assistant,
            SenderKind::Assistant => SenderKind::User,
            other => *other,
        }
    }
}

/// The strategy that produced a sender classification. Reported by
/// `--analyze`; also consulted when repairing alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectMethod {
    /// `data-message-author-role` attribute.
    AuthorRole,
    /// Avatar image alt/src/class patterns.
    Avatar,
    /// Leading "You:" / "ChatGPT:" style label in the text.
    TextualLabel,
    /// Phrase-frequency heuristics over the message body.
    ContentPhrases,
    /// Structural signals (code blocks, lists, response-container classes).
    Structural,
    /// Short-question-then-long-answer length patterns.
    LengthDelta,
    /// Even/odd index alternation fallback.
    Alternation,
    /// Rewritten during low-confidence alternation repair.
    PatternCorrection,
}

impl DetectMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectMethod::AuthorRole => "author-role",
            DetectMethod::Avatar => "avatar",
            DetectMethod::TextualLabel => "textual-label",
            DetectMethod::ContentPhrases => "content-phrases",
            DetectMethod::Structural => "structural",
            DetectMethod::LengthDelta => "length-delta",
            DetectMethod::Alternation => "alternation",
            DetectMethod::PatternCorrection => "pattern-correction",
        }
    }
}

/// A sender classification with its (uncalibrated, best-effort) confidence.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Attribution {
    pub kind: SenderKind,
    /// 0.0..=1.0. Comparisons against fixed thresholds only; never calibrated.
    pub confidence: f32,
    pub method: DetectMethod,
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// A cleaned slice of message content.
///
/// Code is kept separate from prose so that the Markdown renderer can emit
/// fenced blocks and the printable renderer `<pre>` blocks from the same
/// extraction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSegment {
    Text(String),
    Code { lang: Option<String>, text: String },
}

impl ContentSegment {
    pub fn is_empty(&self) -> bool {
        match self {
            ContentSegment::Text(t) => t.trim().is_empty(),
            ContentSegment::Code { text, .. } => text.trim().is_empty(),
        }
    }
}

/// Rough content classification, reported per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Code,
    Media,
    Links,
}

impl ContentType {
    pub fn of_segments(segments: &[ContentSegment]) -> ContentType {
        let mut text = String::new();
        for seg in segments {
            match seg {
                ContentSegment::Code { .. } => return ContentType::Code,
                ContentSegment::Text(t) => text.push_str(t),
            }
        }
        if text.contains("![") || text.contains("[Image") {
            ContentType::Media
        } else if text.contains("http://") || text.contains("https://") {
            ContentType::Links
        } else {
            ContentType::Text
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and the transcript
// ---------------------------------------------------------------------------

/// One detected message, cleaned and attributed.
#[derive(Debug, Clone)]
pub struct Message {
    /// Position among the raw candidates, before skips. Kept so that logs and
    /// the analyze report can point back at the page.
    pub index: usize,
    pub attribution: Attribution,
    pub segments: Vec<ContentSegment>,
}

impl Message {
    /// Total character count across all segments.
    pub fn content_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                ContentSegment::Text(t) => t.len(),
                ContentSegment::Code { text, .. } => text.len(),
            })
            .sum()
    }

    /// Segments flattened to plain text, code included, newline separated.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if !out.is_empty() {
                out.push('\n');
            }
            match seg {
                ContentSegment::Text(t) => out.push_str(t),
                ContentSegment::Code { text, .. } => out.push_str(text),
            }
        }
        out
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::of_segments(&self.segments)
    }

    pub fn has_code(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, ContentSegment::Code { .. }))
    }
}

/// Conversation-level metadata mined from the page.
#[derive(Debug, Clone, Default)]
pub struct TranscriptMeta {
    pub title: String,
    /// Best source URL the page itself reveals (canonical link, og:url, ...).
    pub source_url: Option<url::Url>,
    /// Conversation id from the URL path or data attributes, when present.
    pub conversation_id: Option<String>,
    /// Best-effort model name sniffed from the page text. Report only.
    pub model: Option<String>,
}

/// A fully detected conversation, ready for rendering.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub platform: Platform,
    pub meta: TranscriptMeta,
    pub messages: Vec<Message>,
}

impl Transcript {
    /// Source line target: the page URL when known, else the platform home.
    pub fn source_url_string(&self) -> String {
        self.meta
            .source_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.platform.home_url().to_string())
    }

    /// Host shown as the link text in the `**Source:**` line.
    pub fn source_host(&self) -> String {
        self.meta
            .source_url
            .as_ref()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| self.platform.source_host().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_label_covers_both_platforms() {
        assert_eq!(SenderKind::classify_label("You"), SenderKind::User);
        assert_eq!(SenderKind::classify_label("user:"), SenderKind::User);
        assert_eq!(SenderKind::classify_label("ChatGPT"), SenderKind::Assistant);
        assert_eq!(SenderKind::classify_label("Gemini"), SenderKind::Assistant);
        assert_eq!(SenderKind::classify_label("Bard"), SenderKind::Assistant);
        assert_eq!(SenderKind::classify_label("System"), SenderKind::System);
        assert_eq!(SenderKind::classify_label("Alice"), SenderKind::Unknown);
    }

    #[test]
    fn labels_follow_platform() {
        assert_eq!(SenderKind::Assistant.label(Platform::ChatGpt), "ChatGPT");
        assert_eq!(SenderKind::Assistant.label(Platform::Gemini), "Gemini");
        assert_eq!(SenderKind::User.label(Platform::Gemini), "You");
    }

    #[test]
    fn content_type_classification() {
        let code = vec![ContentSegment::Code {
            lang: Some("rust".into()),
            text: "fn main() {}".into(),
        }];
        assert_eq!(ContentType::of_segments(&code), ContentType::Code);

        let media = vec![ContentSegment::Text("[Image: diagram]".into())];
        assert_eq!(ContentType::of_segments(&media), ContentType::Media);

        let links = vec![ContentSegment::Text(
            "see [docs](https://example.org/a)".into(),
        )];
        assert_eq!(ContentType::of_segments(&links), ContentType::Links);

        let text = vec![ContentSegment::Text("plain words".into())];
        assert_eq!(ContentType::of_segments(&text), ContentType::Text);
    }

    #[test]
    fn thresholds_differ_per_platform() {
        assert_eq!(Platform::ChatGpt.candidate_len_bounds().0, 10);
        assert_eq!(Platform::Gemini.candidate_len_bounds().0, 30);
        assert!(Platform::Gemini.min_candidate_words() > Platform::ChatGpt.min_candidate_words());
    }
}
