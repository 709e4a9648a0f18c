//! # chat-page-export
//!
//! A CLI tool that turns saved ChatGPT and Gemini pages into local Markdown
//! files or printable HTML.
//!
//! ## What it does
//!
//! Neither product offers a real export, so people save the page instead
//! (`Ctrl+S` in the browser). This tool parses those saved pages, finds the
//! conversation inside the app markup through a cascade of selectors, works
//! out who said what with layered heuristics, cleans the content, and writes
//! each conversation as a standalone Markdown file with YAML frontmatter, or
//! as a styled HTML page ready for the browser's print-to-PDF dialog.
//!
//! The saved pages are only ever read.
//!
//! ## Incremental export
//!
//! On repeated runs, existing files are checked against the newly detected
//! content using hashes embedded in the frontmatter. Unchanged conversations
//! are skipped. Conversations whose pages changed are re-exported in place,
//! following title renames.
//!
//! ## Usage
//!
//! ```sh
//! # Export every saved page in a directory to Markdown
//! chat-page-export ~/Downloads/chats --out-dir ~/notes/ai-chats
//!
//! # Printable HTML with extracted images, tagged for Obsidian
//! chat-page-export page.html --format both --extract-images --tags chatgpt,llm
//!
//! # See why a page detects badly
//! chat-page-export broken.html --analyze
//! ```
//!
//! Preferences can be persisted in `~/.config/chat-page-export/config.toml`.
//!
//! ## Compatibility
//!
//! Tracks the (undocumented, frequently rearranged) ChatGPT and Gemini DOM.
//! When a redesign breaks detection, run `--analyze` on the saved page and
//! open an issue with the report.

pub mod analyze;
pub mod cascade;
pub mod content;
pub mod detect;
pub mod dom;
pub mod markdown;
pub mod meta;
pub mod parallel;
pub mod printable;
#[cfg(feature = "sequential")]
pub mod sequential;
pub mod transcript;
pub mod utils;
