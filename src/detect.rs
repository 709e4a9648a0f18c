//! Message detection over a parsed chat page.
//!
//! Raw candidates come from the selector cascade; this module filters out UI
//! chrome, drops nested and duplicate candidates, classifies each sender
//! through a tiered heuristic cascade, and repairs obviously wrong sender
//! sequences afterwards. Every decision lands in a [`DetectionReport`] so that
//! `--analyze` can show why an export looks the way it does.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use serde::Serialize;

use crate::cascade;
use crate::content::{self, ImagePolicy};
use crate::dom;
use crate::meta;
use crate::transcript::{Attribution, DetectMethod, Message, Platform, SenderKind, Transcript};

static TEXTUAL_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(You|ChatGPT|Gemini|Assistant|System|User)[:.]?\s").unwrap()
});
static GEMINI_ASSISTANT_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(i understand|i can help|here's|i'll|let me|i'd be happy|certainly|of course|absolutely)")
        .unwrap()
});
static GEMINI_USER_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(can you|please help|how do i|i need|i want|help me|could you|explain|what is)")
        .unwrap()
});

const ASSISTANT_PHRASES: &[&str] = &[
    "i understand",
    "i can help",
    "here's",
    "let me",
    "i'll",
    "according to",
    "based on",
    "i think",
    "in my opinion",
    "i apologize",
    "i'm sorry",
    "i don't have",
    "i cannot",
];

const USER_PHRASES: &[&str] = &[
    "can you",
    "please",
    "help me",
    "i want",
    "i need",
    "how do i",
    "what is",
    "explain",
    "show me",
];

const AVATAR_USER_PATTERNS: &[&str] = &["user", "you", "human", "person"];
const AVATAR_ASSISTANT_PATTERNS: &[&str] =
    &["chatgpt", "gemini", "bard", "assistant", "ai", "bot"];

/// Below this, a sender classification counts as a guess.
const LOW_CONFIDENCE: f32 = 0.7;

/// How detection went for one page. Serialized by `--analyze`, summarized in
/// logs otherwise.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    /// Winning cascade strategy, `None` when nothing matched at all.
    pub strategy: Option<String>,
    pub selector: Option<String>,
    pub selector_confidence: f32,
    pub container_fallback: bool,
    /// Raw elements the winning selector returned.
    pub candidates: usize,
    /// Candidates that survived the validity filter and nested dedup.
    pub valid: usize,
    /// Messages in the final transcript.
    pub kept: usize,
    pub skipped_short: usize,
    pub skipped_duplicate: usize,
    pub consecutive_repairs: usize,
    pub pattern_corrected: bool,
    pub sender_methods: BTreeMap<String, usize>,
    pub mean_sender_confidence: f32,
    pub overall_confidence: f32,
}

/// Run the whole pipeline over a parsed page: resolve the platform, detect
/// and clean messages, mine conversation metadata.
pub fn extract_transcript(
    doc: &Html,
    platform_override: Option<Platform>,
    source_override: Option<url::Url>,
    images: ImagePolicy<'_>,
) -> (Transcript, DetectionReport) {
    let platform = meta::detect_platform(doc, platform_override, source_override.as_ref());
    let (messages, report) = detect(doc, platform, images);
    let meta = meta::extract_meta(doc, platform, source_override);
    (
        Transcript {
            platform,
            meta,
            messages,
        },
        report,
    )
}

/// Detect all messages in `doc`. An empty result is not an error here; the
/// caller decides what a message-less page means.
pub fn detect(
    doc: &Html,
    platform: Platform,
    images: ImagePolicy<'_>,
) -> (Vec<Message>, DetectionReport) {
    let mut report = DetectionReport::default();

    let Some(set) = cascade::message_candidates(doc, platform) else {
        tracing::warn!("no message candidates on page");
        return (Vec::new(), report);
    };
    report.strategy = Some(set.strategy.to_string());
    report.selector = Some(set.selector.clone());
    report.selector_confidence = set.confidence;
    report.container_fallback = set.via_container_fallback;
    report.candidates = set.elements.len();

    // Validity filter, then nested dedup against the surviving set.
    let valid: Vec<_> = set
        .elements
        .iter()
        .copied()
        .filter(|el| is_valid_candidate(*el, platform))
        .collect();
    let top_level: Vec<_> = valid
        .iter()
        .copied()
        .filter(|el| {
            !valid
                .iter()
                .any(|other| other.id() != el.id() && dom::is_descendant_of(*el, *other))
        })
        .collect();
    report.valid = top_level.len();

    let texts: Vec<String> = top_level.iter().map(|el| dom::text_of(*el)).collect();

    let mut messages: Vec<Message> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (index, el) in top_level.iter().enumerate() {
        let attribution = identify_sender(*el, &texts, index, platform);
        let content_el = cascade::content_element(*el);
        let segments = content::extract_segments(content_el, platform, images);

        let message = Message {
            index,
            attribution,
            segments,
        };
        if message.content_len() < platform.min_message_len() {
            tracing::debug!(index, "skipping message: too short after cleaning");
            report.skipped_short += 1;
            continue;
        }
        if !seen.insert(dedup_key(&message.plain_text())) {
            tracing::debug!(index, "skipping message: duplicate content");
            report.skipped_duplicate += 1;
            continue;
        }
        messages.push(message);
    }

    report.consecutive_repairs = repair_consecutive(&mut messages, platform);
    report.pattern_corrected = apply_pattern_correction(&mut messages);

    for msg in &messages {
        *report
            .sender_methods
            .entry(msg.attribution.method.as_str().to_string())
            .or_insert(0) += 1;
    }
    report.kept = messages.len();
    report.mean_sender_confidence = if messages.is_empty() {
        0.0
    } else {
        messages
            .iter()
            .map(|m| m.attribution.confidence)
            .sum::<f32>()
            / messages.len() as f32
    };
    report.overall_confidence = overall_confidence(&report, !messages.is_empty());

    (messages, report)
}

/// Container found + messages found + scaled mean sender confidence.
fn overall_confidence(report: &DetectionReport, any_messages: bool) -> f32 {
    let container = if report.candidates > 0 { 0.3 } else { 0.0 };
    let messages = if any_messages { 0.3 } else { 0.0 };
    (container + messages + report.mean_sender_confidence * 0.4).min(1.0)
}

fn is_valid_candidate(el: scraper::ElementRef<'_>, platform: Platform) -> bool {
    let text = dom::text_of(el);
    let (min_len, max_len) = platform.candidate_len_bounds();
    if text.len() < min_len || text.len() > max_len {
        return false;
    }
    if dom::word_count(&text) < platform.min_candidate_words() {
        return false;
    }
    match platform {
        Platform::ChatGpt => {
            if let Some(sel) = dom::selector("button, input, textarea")
                && dom::has_descendant(el, &sel)
            {
                return false;
            }
        }
        Platform::Gemini => {
            if let Some(sel) = dom::selector(r#"input[type="text"], textarea"#)
                && dom::has_descendant(el, &sel)
            {
                return false;
            }
            if el
                .value()
                .classes()
                .any(|c| c == "typing" || c == "loading")
            {
                return false;
            }
        }
    }
    true
}

/// Normalized content prefix used for duplicate suppression.
fn dedup_key(text: &str) -> String {
    let prefix: String = text.chars().take(100).collect();
    prefix.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The sender cascade. Tiers are ordered by trust; the first one that
/// produces a verdict wins.
fn identify_sender(
    el: scraper::ElementRef<'_>,
    texts: &[String],
    index: usize,
    platform: Platform,
) -> Attribution {
    if let Some(hit) = sender_from_author_role(el) {
        return hit;
    }
    if let Some(hit) = sender_from_avatar(el) {
        return hit;
    }
    let text = &texts[index];
    if let Some(hit) = sender_from_label(text) {
        return hit;
    }
    if let Some(hit) = sender_from_phrases(text, platform) {
        return hit;
    }
    if platform == Platform::Gemini
        && let Some(hit) = sender_from_structure(el, texts, index)
    {
        return hit;
    }
    Attribution {
        kind: if index % 2 == 0 {
            SenderKind::User
        } else {
            SenderKind::Assistant
        },
        confidence: 0.6,
        method: DetectMethod::Alternation,
    }
}

fn sender_from_author_role(el: scraper::ElementRef<'_>) -> Option<Attribution> {
    let role = el.value().attr("data-message-author-role").map(str::to_string).or_else(|| {
        let sel = dom::selector("[data-message-author-role]")?;
        el.select(&sel)
            .next()
            .and_then(|inner| inner.value().attr("data-message-author-role"))
            .map(str::to_string)
    })?;
    let kind = if role == "user" {
        SenderKind::User
    } else {
        SenderKind::Assistant
    };
    Some(Attribution {
        kind,
        confidence: 0.95,
        method: DetectMethod::AuthorRole,
    })
}

fn sender_from_avatar(el: scraper::ElementRef<'_>) -> Option<Attribution> {
    let sel = dom::selector("img")?;
    for img in el.select(&sel) {
        let mut haystack = String::new();
        for attr in ["alt", "src", "class"] {
            if let Some(v) = img.value().attr(attr) {
                haystack.push_str(&v.to_lowercase());
                haystack.push(' ');
            }
        }
        let is_user = AVATAR_USER_PATTERNS.iter().any(|p| haystack.contains(p));
        let is_assistant = AVATAR_ASSISTANT_PATTERNS
            .iter()
            .any(|p| haystack.contains(p));
        // Ambiguous avatars prove nothing, keep looking.
        let kind = match (is_user, is_assistant) {
            (true, false) => SenderKind::User,
            (false, true) => SenderKind::Assistant,
            _ => continue,
        };
        return Some(Attribution {
            kind,
            confidence: 0.8,
            method: DetectMethod::Avatar,
        });
    }
    None
}

fn sender_from_label(text: &str) -> Option<Attribution> {
    let caps = TEXTUAL_LABEL_RE.captures(text.trim_start())?;
    Some(Attribution {
        kind: SenderKind::classify_label(&caps[1]),
        confidence: 0.9,
        method: DetectMethod::TextualLabel,
    })
}

fn sender_from_phrases(text: &str, platform: Platform) -> Option<Attribution> {
    let lower = text.to_lowercase();

    if platform == Platform::Gemini {
        let start: String = lower.chars().take(200).collect();
        if GEMINI_ASSISTANT_START_RE.is_match(&start) {
            return Some(Attribution {
                kind: SenderKind::Assistant,
                confidence: 0.7,
                method: DetectMethod::ContentPhrases,
            });
        }
        if GEMINI_USER_START_RE.is_match(&start) {
            return Some(Attribution {
                kind: SenderKind::User,
                confidence: 0.7,
                method: DetectMethod::ContentPhrases,
            });
        }
    }

    let assistant_hits = ASSISTANT_PHRASES.iter().filter(|p| lower.contains(*p)).count();
    let user_hits = USER_PHRASES.iter().filter(|p| lower.contains(*p)).count();
    let (kind, hits) = if assistant_hits > user_hits {
        (SenderKind::Assistant, assistant_hits)
    } else if user_hits > assistant_hits {
        (SenderKind::User, user_hits)
    } else {
        return None;
    };
    Some(Attribution {
        kind,
        confidence: (0.4 + hits as f32 * 0.1).min(LOW_CONFIDENCE),
        method: DetectMethod::ContentPhrases,
    })
}

/// Gemini-only structural signals, weakest tier before plain alternation.
fn sender_from_structure(
    el: scraper::ElementRef<'_>,
    texts: &[String],
    index: usize,
) -> Option<Attribution> {
    let text_len = texts[index].len();

    let has_code = dom::selector("pre, code").is_some_and(|s| dom::has_descendant(el, &s));
    let has_lists = dom::selector("ul, ol, li").is_some_and(|s| dom::has_descendant(el, &s));
    if has_code && has_lists && text_len > 200 {
        return Some(Attribution {
            kind: SenderKind::Assistant,
            confidence: 0.6,
            method: DetectMethod::Structural,
        });
    }

    let own_class = dom::class_text(el);
    let parent_class = el
        .parent()
        .and_then(scraper::ElementRef::wrap)
        .map(dom::class_text)
        .unwrap_or_default();
    let is_response_container = [&own_class, &parent_class]
        .iter()
        .any(|c| c.contains("model-response") || c.contains("assistant"));
    let is_response_tag = el.value().name() == "model-response";
    if is_response_container || is_response_tag {
        return Some(Attribution {
            kind: SenderKind::Assistant,
            confidence: 0.75,
            method: DetectMethod::Structural,
        });
    }

    if index > 0 {
        let prev_len = texts[index - 1].len();
        if prev_len < 100 && text_len > 300 {
            return Some(Attribution {
                kind: SenderKind::Assistant,
                confidence: 0.55,
                method: DetectMethod::LengthDelta,
            });
        }
        if prev_len > 300 && text_len < 100 {
            return Some(Attribution {
                kind: SenderKind::User,
                confidence: 0.55,
                method: DetectMethod::LengthDelta,
            });
        }
    }
    None
}

/// Fix runs of the same sender. Chat transcripts alternate; two identical
/// senders in a row usually mean a missed or merged message.
fn repair_consecutive(messages: &mut [Message], platform: Platform) -> usize {
    let mut repairs = 0;
    for i in 1..messages.len() {
        let prev_kind = messages[i - 1].attribution.kind;
        let cur_kind = messages[i].attribution.kind;
        if prev_kind != cur_kind || !matches!(cur_kind, SenderKind::User | SenderKind::Assistant) {
            continue;
        }
        match platform {
            Platform::ChatGpt => {
                messages[i].attribution.kind = cur_kind.flipped();
            }
            Platform::Gemini => {
                let cur_len = messages[i].content_len();
                let prev_len = messages[i - 1].content_len();
                if cur_len > prev_len * 2 && cur_len > 500 {
                    messages[i].attribution.kind = SenderKind::Assistant;
                } else if prev_len > cur_len * 2 && prev_len > 500 {
                    messages[i - 1].attribution.kind = SenderKind::Assistant;
                    messages[i].attribution.kind = SenderKind::User;
                } else {
                    messages[i].attribution.kind = cur_kind.flipped();
                }
            }
        }
        tracing::debug!(index = messages[i].index, "repaired consecutive sender run");
        repairs += 1;
    }
    repairs
}

/// When most classifications are guesses, trust the conversation shape more
/// than the guesses: rewrite every low-confidence sender by strict
/// alternation starting from the user.
fn apply_pattern_correction(messages: &mut [Message]) -> bool {
    if messages.is_empty() {
        return false;
    }
    let low = messages
        .iter()
        .filter(|m| m.attribution.confidence < LOW_CONFIDENCE)
        .count();
    if low * 2 <= messages.len() {
        return false;
    }
    tracing::warn!(
        low,
        total = messages.len(),
        "mostly low-confidence senders, applying alternation fix"
    );
    let mut expected = SenderKind::User;
    for msg in messages.iter_mut() {
        if msg.attribution.confidence < LOW_CONFIDENCE {
            msg.attribution = Attribution {
                kind: expected,
                confidence: 0.8,
                method: DetectMethod::PatternCorrection,
            };
        }
        expected = expected.flipped();
    }
    true
}
