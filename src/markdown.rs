//! Markdown rendering with YAML frontmatter.
//!
//! The frontmatter carries enough state (`id`, `content_hash`,
//! `extract_images`) for later runs to recognize their own output and skip
//! unchanged conversations.

use std::io::Write;

use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;

use crate::transcript::{ContentSegment, Platform, Transcript};

#[derive(Serialize)]
pub struct Frontmatter<'a> {
    /// Conversation id when the page reveals one, else derived from the input
    /// file. Ownership key for incremental runs.
    pub id: &'a str,
    pub title: &'a str,
    pub platform: Platform,
    pub exported_at: DateTime<Utc>,
    pub source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: usize,
    pub content_hash: &'a str,
    pub extract_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a [String]>,
}

pub fn render_markdown<W: Write>(
    writer: &mut W,
    transcript: &Transcript,
    fm: &Frontmatter<'_>,
) -> Result<()> {
    writeln!(writer, "---")?;
    let yaml = serde_yaml::to_string(fm)?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "---")?;
    writeln!(writer)?;

    writeln!(writer, "# {}", transcript.meta.title)?;
    writeln!(writer)?;
    writeln!(writer, "**Date:** {}", fm.exported_at.format("%Y-%m-%d"))?;
    writeln!(
        writer,
        "**Source:** [{}]({})",
        transcript.source_host(),
        transcript.source_url_string()
    )?;
    writeln!(writer)?;
    writeln!(writer, "---")?;

    // Blank line before each block, not after: the closing rule is the last
    // line of the file.
    for message in &transcript.messages {
        writeln!(writer)?;
        writeln!(
            writer,
            "### **{}**",
            message.attribution.kind.label(transcript.platform)
        )?;
        writeln!(writer)?;
        write_segments(writer, &message.segments)?;
        writeln!(writer)?;
        writeln!(writer, "---")?;
    }

    Ok(())
}

fn write_segments<W: Write>(writer: &mut W, segments: &[ContentSegment]) -> Result<()> {
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            writeln!(writer)?;
        }
        match segment {
            ContentSegment::Text(text) => writeln!(writer, "{}", text)?,
            ContentSegment::Code { lang, text } => {
                writeln!(writer, "```{}", lang.as_deref().unwrap_or(""))?;
                writeln!(writer, "{}", text)?;
                writeln!(writer, "```")?;
            }
        }
    }
    Ok(())
}
