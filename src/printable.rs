//! Printable HTML rendering.
//!
//! Produces a standalone page styled for the browser's print-to-PDF dialog:
//! alternating message cards, dark code blocks, and an instruction box that
//! `@media print` hides. Code segments render as real `<pre>` blocks instead
//! of being flattened into the surrounding prose.

use std::io::Write;

use chrono::{DateTime, Utc};
use eyre::Result;

use crate::transcript::{ContentSegment, Transcript};

const STYLE: &str = r#"
        @media print {
            body { margin: 0; }
            .no-print { display: none; }
            .message { page-break-inside: avoid; }
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
            line-height: 1.6;
            color: #333;
            max-width: 800px;
            margin: 0 auto;
            padding: 40px 20px;
            background: white;
        }

        h1 {
            color: #2c3e50;
            border-bottom: 3px solid #3498db;
            padding-bottom: 10px;
            margin-bottom: 30px;
        }

        .metadata {
            color: #666;
            font-size: 14px;
            margin-bottom: 30px;
            padding-bottom: 20px;
            border-bottom: 1px solid #e0e0e0;
        }

        .message {
            margin: 25px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 8px;
            page-break-inside: avoid;
        }

        .message.user {
            background: #e3f2fd;
            margin-left: 40px;
        }

        .message.assistant {
            background: #f3f4f6;
            margin-right: 40px;
        }

        .sender {
            font-weight: bold;
            color: #2c3e50;
            margin-bottom: 10px;
            font-size: 14px;
            text-transform: uppercase;
            letter-spacing: 0.5px;
        }

        .content {
            color: #333;
            white-space: pre-wrap;
            word-wrap: break-word;
        }

        .code-block {
            background: #282c34;
            color: #abb2bf;
            padding: 15px;
            border-radius: 5px;
            overflow-x: auto;
            font-family: "Courier New", monospace;
            font-size: 14px;
            margin: 10px 0;
            white-space: pre;
        }

        .instructions {
            background: #fff3cd;
            border: 2px solid #ffc107;
            border-radius: 8px;
            padding: 20px;
            margin: 30px 0;
        }

        .instructions h3 {
            margin-top: 0;
            color: #856404;
        }

        @media screen {
            .instructions {
                position: sticky;
                top: 20px;
                z-index: 1000;
            }
        }
    "#;

const INSTRUCTIONS: &str = r#"    <div class="instructions no-print">
        <h3>&#128196; Convert to PDF</h3>
        <ol>
            <li>Press <strong>Ctrl+P</strong> (Windows/Linux) or <strong>Cmd+P</strong> (Mac)</li>
            <li>Set "Destination" to <strong>"Save as PDF"</strong></li>
            <li>Choose your preferred settings (recommend "Letter" or "A4" size)</li>
            <li>Click <strong>"Save"</strong></li>
        </ol>
        <p><em>This instruction box will not appear in the PDF.</em></p>
    </div>
"#;

pub fn render_html<W: Write>(
    writer: &mut W,
    transcript: &Transcript,
    exported_at: DateTime<Utc>,
) -> Result<()> {
    let title = escape_html(&transcript.meta.title);
    let source = escape_html(&transcript.source_url_string());

    writeln!(writer, "<!DOCTYPE html>")?;
    writeln!(writer, "<html>")?;
    writeln!(writer, "<head>")?;
    writeln!(writer, r#"    <meta charset="UTF-8">"#)?;
    writeln!(writer, "    <title>{}</title>", title)?;
    writeln!(writer, "    <style>{}</style>", STYLE)?;
    writeln!(writer, "</head>")?;
    writeln!(writer, "<body>")?;
    write!(writer, "{}", INSTRUCTIONS)?;
    writeln!(writer, "    <h1>{}</h1>", title)?;
    writeln!(writer, r#"    <div class="metadata">"#)?;
    writeln!(
        writer,
        "        <p><strong>Date:</strong> {}</p>",
        exported_at.format("%Y-%m-%d")
    )?;
    writeln!(
        writer,
        r#"        <p><strong>Source:</strong> <a href="{}">{}</a></p>"#,
        source, source
    )?;
    writeln!(
        writer,
        "        <p><strong>Messages:</strong> {}</p>",
        transcript.messages.len()
    )?;
    writeln!(writer, "    </div>")?;
    writeln!(writer, r#"    <div class="conversation">"#)?;

    for message in &transcript.messages {
        let sender = message.attribution.kind.label(transcript.platform);
        writeln!(
            writer,
            r#"        <div class="message {}">"#,
            message.attribution.kind.css_class()
        )?;
        writeln!(
            writer,
            r#"            <div class="sender">{}</div>"#,
            escape_html(sender)
        )?;
        // Single line on purpose: the content div is `white-space: pre-wrap`,
        // so indentation inside it would show up in the output.
        writeln!(
            writer,
            r#"            <div class="content">{}</div>"#,
            segments_html(&message.segments)
        )?;
        writeln!(writer, "        </div>")?;
    }

    writeln!(writer, "    </div>")?;
    writeln!(writer, "</body>")?;
    writeln!(writer, "</html>")?;

    Ok(())
}

fn segments_html(segments: &[ContentSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        if !out.is_empty() {
            out.push('\n');
        }
        match segment {
            ContentSegment::Text(text) => out.push_str(&escape_html(text)),
            ContentSegment::Code { text, .. } => {
                out.push_str("<pre class=\"code-block\">");
                out.push_str(&escape_html(text));
                out.push_str("</pre>");
            }
        }
    }
    out
}

/// Ampersands first, otherwise the entities produced by the other
/// replacements get double-escaped.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
