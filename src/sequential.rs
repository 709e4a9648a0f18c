use crate::content::ImagePolicy;
use crate::detect;
use crate::markdown::{self, Frontmatter};
use crate::printable;
use crate::transcript::Platform;
use crate::utils::{self, ExportConfig, ProcessResult};
use chrono::{NaiveDate, Utc};
use eyre::{Context, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use scraper::Html;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// The main entry point for the sequential export logic. One page at a time
/// behind a progress bar; same semantics as the parallel driver.
pub fn execute(config: ExportConfig) -> Result<()> {
    fs::create_dir_all(&config.out_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.out_dir.display()
        )
    })?;
    if config.extract_images {
        fs::create_dir_all(config.out_dir.join("assets"))
            .wrap_err("Failed to create assets directory")?;
    }

    let inputs = utils::gather_inputs(&config.inputs)?;
    if inputs.is_empty() {
        return Err(eyre!("No input pages found"));
    }
    let total = inputs.len() as u64;

    let mut file_index = utils::build_file_index(&config.out_dir);

    let pb = if config.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
            )
            .unwrap()
            .progress_chars("=>-"),
        );
        bar.println(format!("Found {} pages.", total));
        bar
    };

    let mut registry: HashMap<String, String> = HashMap::new();
    let mut count_created = 0usize;
    let mut count_updated = 0usize;
    let mut count_skipped = 0usize;
    let mut count_errors = 0usize;

    for path in &inputs {
        match export_page(path, &config, &mut registry, &mut file_index, &pb) {
            Ok(ProcessResult::Created) => count_created += 1,
            Ok(ProcessResult::Updated) => count_updated += 1,
            Ok(ProcessResult::Skipped) => count_skipped += 1,
            Err(e) => {
                count_errors += 1;
                pb.println(format!("Error [{}]: {:#}", short_name(path), e));
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();

    if !config.quiet {
        let mut summary = format!(
            "Done. {} created, {} updated, {} skipped.",
            count_created, count_updated, count_skipped
        );
        if count_errors > 0 {
            summary.push_str(&format!(" Completed with {} error(s).", count_errors));
        }
        eprintln!("{}", summary);
    }

    if count_created + count_updated + count_skipped == 0 && count_errors > 0 {
        return Err(eyre!("All {} page(s) failed to export", count_errors));
    }

    Ok(())
}

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// Allocate a stem through the in-run registry (stem → id), falling back to
// numbered suffixes when two conversations share a title and date. The file
// index guards against stems already owned by other conversations on disk.
fn allocate_stem(
    id: &str,
    title: &str,
    platform: Platform,
    date: NaiveDate,
    config: &ExportConfig,
    registry: &mut HashMap<String, String>,
    file_index: &HashMap<String, PathBuf>,
) -> String {
    let base = utils::slug_stem(title, platform, date);

    for n in 1..100u32 {
        let stem = if n == 1 {
            base.clone()
        } else {
            format!("{}-{}", base, n)
        };
        match registry.get(&stem) {
            Some(owner) if owner == id => return stem,
            Some(_) => continue,
            None => {}
        }
        let md = config.out_dir.join(format!("{}.md", stem));
        let taken_on_disk = file_index.iter().any(|(fid, p)| fid != id && *p == md);
        if taken_on_disk {
            continue;
        }
        registry.insert(stem.clone(), id.to_string());
        return stem;
    }

    // Digest suffix; unique per conversation
    format!("{}-{}", base, utils::short_id(id))
}

fn export_page(
    input: &Path,
    config: &ExportConfig,
    registry: &mut HashMap<String, String>,
    file_index: &mut HashMap<String, PathBuf>,
    pb: &ProgressBar,
) -> Result<ProcessResult> {
    let bytes = fs::read(input)
        .wrap_err_with(|| format!("Failed to read: {}", input.display()))?;
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
        file_index.get(&id).cloned()
    } else {
        None
    };

    if !config.force
        && let Some(ref existing) = existing_path
        && let Some(fm) = utils::parse_existing_frontmatter(existing)
        && fm.content_hash.as_deref() == Some(hash.as_str())
        && fm.extract_images == config.extract_images
        && (!config.format.wants_html()
            || existing.with_extension("html").try_exists().unwrap_or(false))
    {
        if config.verbose {
            pb.println(format!("Skipped:  {}", short_name(existing)));
        }
        return Ok(ProcessResult::Skipped);
    }

    let exported_at = Utc::now();
    let stem = allocate_stem(
        &id,
        &transcript.meta.title,
        transcript.platform,
        exported_at.date_naive(),
        config,
        registry,
        file_index,
    );
    let desired_md = config.out_dir.join(format!("{}.md", stem));
    let desired_html = config.out_dir.join(format!("{}.html", stem));
    let result_variant = if existing_path.is_none() {
        ProcessResult::Created
    } else {
        ProcessResult::Updated
    };

    // Rename if the slug or export date changed
    if let Some(ref existing) = existing_path
        && existing != &desired_md
    {
        if let Err(e) = fs::rename(existing, &desired_md) {
            pb.println(format!(
                "Warning: could not rename {} to {}: {}",
                existing.display(),
                desired_md.display(),
                e
            ));
        }
        let old_html = existing.with_extension("html");
        if old_html.try_exists().unwrap_or(false)
            && let Err(e) = fs::rename(&old_html, &desired_html)
        {
            pb.println(format!(
                "Warning: could not rename {} to {}: {}",
                old_html.display(),
                desired_html.display(),
                e
            ));
        }
    }

    // Update the index so subsequent lookups reflect the rename
    if config.format.wants_markdown() {
        file_index.insert(id.clone(), desired_md.clone());
    }

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
        let md_file = File::create(&desired_md)
            .wrap_err_with(|| format!("Failed to create: {}", desired_md.display()))?;
        let mut writer = BufWriter::new(md_file);
        markdown::render_markdown(&mut writer, &transcript, &fm)
            .wrap_err("Failed to write markdown")?;
        writer.flush().wrap_err("Failed to flush markdown file")?;
    }
    if config.format.wants_html() {
        let html_file = File::create(&desired_html)
            .wrap_err_with(|| format!("Failed to create: {}", desired_html.display()))?;
        let mut writer = BufWriter::new(html_file);
        printable::render_html(&mut writer, &transcript, exported_at)
            .wrap_err("Failed to write printable HTML")?;
        writer.flush().wrap_err("Failed to flush HTML file")?;
    }

    if config.verbose {
        let label = if config.format.wants_markdown() {
            format!("{}.md", stem)
        } else {
            format!("{}.html", stem)
        };
        match result_variant {
            ProcessResult::Created => pb.println(format!("Created:  {}", label)),
            ProcessResult::Updated => pb.println(format!("Updated:  {}", label)),
            ProcessResult::Skipped => unreachable!(),
        }
    }

    Ok(result_variant)
}
