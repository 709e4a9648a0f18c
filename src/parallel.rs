use crate::content::ImagePolicy;
use crate::detect;
use crate::markdown::{self, Frontmatter};
use crate::printable;
use crate::transcript::Platform;
use crate::utils::{self, ExportConfig, ProcessResult};
use chrono::{NaiveDate, Utc};
use crossbeam_channel::{SendTimeoutError, bounded};
use eyre::{Context, Result, eyre};
use scraper::Html;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn execute(config: ExportConfig) -> Result<()> {
    fs::create_dir_all(&config.out_dir).wrap_err("Failed to create output dir")?;
    if config.extract_images {
        fs::create_dir_all(config.out_dir.join("assets"))
            .wrap_err("Failed to create assets dir")?;
    }

    let inputs = utils::gather_inputs(&config.inputs)?;
    if inputs.is_empty() {
        return Err(eyre!("No input pages found"));
    }

    let (tx, rx) = bounded::<PathBuf>(512);
    let count_created = AtomicUsize::new(0);
    let count_updated = AtomicUsize::new(0);
    let count_skipped = AtomicUsize::new(0);
    let count_errors = AtomicUsize::new(0);
    let n_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8);

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let rx = rx.clone();
            let (config, count_created, count_updated, count_skipped, count_errors) = (
                &config,
                &count_created,
                &count_updated,
                &count_skipped,
                &count_errors,
            );

            s.spawn(move || {
                while let Ok(path) = rx.recv() {
                    match export_page(&path, config) {
                        Ok(ProcessResult::Created) => {
                            count_created.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ProcessResult::Updated) => {
                            count_updated.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ProcessResult::Skipped) => {
                            count_skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            count_errors.fetch_add(1, Ordering::Relaxed);
                            eprintln!("Error [{}]: {:#}", short_name(&path), e);
                        }
                    }
                }
            });
        }

        drop(rx);

        'outer: for path in inputs {
            let mut pending = path;
            loop {
                match tx.send_timeout(pending, Duration::from_millis(50)) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Disconnected(_)) => break 'outer,
                    Err(SendTimeoutError::Timeout(r)) => {
                        pending = r;
                    }
                }
            }
        }

        drop(tx);
    });

    let created = count_created.load(Ordering::Relaxed);
    let updated = count_updated.load(Ordering::Relaxed);
    let skipped = count_skipped.load(Ordering::Relaxed);
    let errors = count_errors.load(Ordering::Relaxed);

    if !config.quiet {
        let mut summary = format!(
            "Done. {} created, {} updated, {} skipped.",
            created, updated, skipped
        );
        if errors > 0 {
            summary.push_str(&format!(" Completed with {} error(s).", errors));
        }
        eprintln!("{}", summary);
    }

    if created + updated + skipped == 0 && errors > 0 {
        return Err(eyre!("All {} page(s) failed to export", errors));
    }

    Ok(())
}

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ── Per-page processing ───────────────────────────────────────────────────────

fn export_page(input: &Path, config: &ExportConfig) -> Result<ProcessResult> {
    let bytes = fs::read(input)
        .wrap_err_with(|| format!("Failed to read: {}", input.display()))?;
    // Saved pages carry whatever encoding the browser wrote; decode lossily.
    let html = String::from_utf8_lossy(&bytes);
    let doc = Html::parse_document(&html);

    let assets_dir = config.out_dir.join("assets");
    let images = if config.extract_images {
        ImagePolicy::Extract {
            assets_dir: &assets_dir,
        }
    } else {
        ImagePolicy::Placeholder
    };

    let (transcript, report) =
        detect::extract_transcript(&doc, config.platform, config.source_url.clone(), images);
    if transcript.messages.is_empty() {
        return Err(eyre!(
            "No messages found. The page structure may have changed."
        ));
    }
    tracing::debug!(
        input = %input.display(),
        strategy = report.strategy.as_deref().unwrap_or("none"),
        kept = report.kept,
        confidence = report.overall_confidence,
        "detected messages"
    );

    let id = utils::document_id(input, &transcript.meta);
    let hash = utils::content_hash(&transcript);
    let existing_path = if config.format.wants_markdown() {
        utils::find_existing_file(&config.out_dir, &id)
    } else {
        None
    };

    // Idempotency: the frontmatter of a previous export carries the hash of
    // what was rendered. Same content, same image policy, nothing to do.
    if !config.force
        && let Some(ref existing) = existing_path
        && let Some(fm) = utils::parse_existing_frontmatter(existing)
        && fm.content_hash.as_deref() == Some(hash.as_str())
        && fm.extract_images == config.extract_images
        && (!config.format.wants_html()
            || existing.with_extension("html").try_exists().unwrap_or(false))
    {
        if config.verbose {
            eprintln!("Skipped: {}", short_name(existing));
        }
        return Ok(ProcessResult::Skipped);
    }

    let exported_at = Utc::now();
    let date = exported_at.date_naive();

    // New conversations claim their filename atomically; updates reuse the
    // stem already owned by this id and follow title or date changes.
    let (stem, mut claimed, result_variant) = match existing_path {
        None => {
            let (stem, file) =
                claim_output(&id, &transcript.meta.title, transcript.platform, date, config)?;
            (stem, Some(file), ProcessResult::Created)
        }
        Some(ref old_path) => {
            let stem = reuse_stem(&id, &transcript.meta.title, transcript.platform, date, config);
            rename_outputs(old_path, &stem, config);
            (stem, None, ProcessResult::Updated)
        }
    };
    let desired_md = config.out_dir.join(format!("{}.md", stem));
    let desired_html = config.out_dir.join(format!("{}.html", stem));

    let source = transcript.source_url_string();
    if config.format.wants_markdown() {
        let fm = Frontmatter {
            id: &id,
            title: &transcript.meta.title,
            platform: transcript.platform,
            exported_at,
            source: &source,
            model: transcript.meta.model.as_deref(),
            messages: transcript.messages.len(),
            content_hash: &hash,
            extract_images: config.extract_images,
            tags: config.tags.as_deref(),
        };
        let md_file = match claimed.take() {
            Some(f) => f,
            None => File::create(&desired_md)
                .wrap_err_with(|| format!("Failed to create: {}", desired_md.display()))?,
        };
        let mut writer = BufWriter::new(md_file);
        markdown::render_markdown(&mut writer, &transcript, &fm)?;
        writer.flush()?;
    }
    if config.format.wants_html() {
        let html_file = match claimed.take() {
            Some(f) => f,
            None => File::create(&desired_html)
                .wrap_err_with(|| format!("Failed to create: {}", desired_html.display()))?,
        };
        let mut writer = BufWriter::new(html_file);
        printable::render_html(&mut writer, &transcript, exported_at)?;
        writer.flush()?;
    }

    if config.verbose {
        let label = if config.format.wants_markdown() {
            format!("{}.md", stem)
        } else {
            format!("{}.html", stem)
        };
        match result_variant {
            ProcessResult::Created => eprintln!("Created: {}", label),
            ProcessResult::Updated => eprintln!("Updated: {}", label),
            ProcessResult::Skipped => {}
        }
    }

    Ok(result_variant)
}

// Claim an output filename for a new conversation. `create_new` makes the
// claim atomic: when two pages share a slug and export date, exactly one
// worker wins each candidate name and the loser moves to the next suffix.
// The returned handle is the file for the primary format.
fn claim_output(
    id: &str,
    title: &str,
    platform: Platform,
    date: NaiveDate,
    config: &ExportConfig,
) -> Result<(String, File)> {
    let base = utils::slug_stem(title, platform, date);
    let ext = if config.format.wants_markdown() {
        "md"
    } else {
        "html"
    };

    for n in 1..100u32 {
        let stem = if n == 1 {
            base.clone()
        } else {
            format!("{}-{}", base, n)
        };
        let path = config.out_dir.join(format!("{}.{}", stem, ext));
        match File::options().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((stem, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Taken by another conversation, try the next suffix
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("Failed to create: {}", path.display()));
            }
        }
    }

    // Digest suffix; unique per conversation
    let stem = format!("{}-{}", base, utils::short_id(id));
    let path = config.out_dir.join(format!("{}.{}", stem, ext));
    let file = File::create(&path)
        .wrap_err_with(|| format!("Failed to create: {}", path.display()))?;
    Ok((stem, file))
}

// A conversation that already has an export keeps its stem unless the title
// or date moved on, in which case the first free (or self-owned) name wins.
fn reuse_stem(
    id: &str,
    title: &str,
    platform: Platform,
    date: NaiveDate,
    config: &ExportConfig,
) -> String {
    let base = utils::slug_stem(title, platform, date);

    for n in 1..100u32 {
        let stem = if n == 1 {
            base.clone()
        } else {
            format!("{}-{}", base, n)
        };
        let path = config.out_dir.join(format!("{}.md", stem));
        match path.try_exists() {
            Ok(false) => return stem,
            Ok(true) => {
                if let Some(fm) = utils::parse_existing_frontmatter(&path)
                    && fm.id == id
                {
                    return stem;
                }
                // Taken by another conversation, try the next suffix
            }
            Err(_) => return stem,
        }
    }

    format!("{}-{}", base, utils::short_id(id))
}

fn rename_outputs(old_path: &Path, stem: &str, config: &ExportConfig) {
    let desired_md = config.out_dir.join(format!("{}.md", stem));
    if old_path != desired_md.as_path() {
        if let Err(e) = fs::rename(old_path, &desired_md) {
            eprintln!(
                "Warning: rename failed {} -> {}: {}",
                old_path.display(),
                desired_md.display(),
                e
            );
        }
        let old_html = old_path.with_extension("html");
        if old_html.try_exists().unwrap_or(false) {
            let desired_html = config.out_dir.join(format!("{}.html", stem));
            if let Err(e) = fs::rename(&old_html, &desired_html) {
                eprintln!(
                    "Warning: rename failed {} -> {}: {}",
                    old_html.display(),
                    desired_html.display(),
                    e
                );
            }
        }
    }
}
