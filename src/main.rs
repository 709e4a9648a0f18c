use chat_page_export::analyze;
use chat_page_export::transcript::Platform;
use chat_page_export::utils::{ExportConfig, OutputFormat};
use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Export ChatGPT and Gemini conversations from saved HTML pages to
/// Markdown files or printable HTML.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Saved pages (.html) or directories containing them.
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory to write exports into.
    /// Defaults to ./chat-page-export if not set in config.
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Output format: markdown, printable HTML, or both.
    #[arg(long, value_enum, value_name = "FORMAT")]
    format: Option<OutputFormat>,

    /// Force the platform instead of detecting it per page.
    #[arg(long, value_enum, value_name = "PLATFORM")]
    platform: Option<PlatformArg>,

    /// Conversation URL to record when the saved page does not reveal one.
    #[arg(long, value_name = "URL")]
    source_url: Option<String>,

    /// Comma-separated tags to add to frontmatter (e.g. "chatgpt,llm").
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    tags: Option<Vec<String>>,

    /// Decode embedded data: images into an assets/ directory
    /// instead of leaving placeholders.
    #[arg(long)]
    extract_images: bool,

    /// Print a JSON detection report per page instead of exporting.
    #[arg(long)]
    analyze: bool,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/chat-page-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overwrite existing files even if their content is unchanged.
    #[arg(short, long)]
    force: bool,

    /// Print each file written or skipped.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress standard output (progress bars, summaries).
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PlatformArg {
    Auto,
    Chatgpt,
    Gemini,
}

impl PlatformArg {
    fn resolve(self) -> Option<Platform> {
        match self {
            PlatformArg::Auto => None,
            PlatformArg::Chatgpt => Some(Platform::ChatGpt),
            PlatformArg::Gemini => Some(Platform::Gemini),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    out_dir: Option<PathBuf>,
    format: Option<OutputFormat>,
    tags: Option<Vec<String>>,
    extract_images: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join("chat-page-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose {
                    "debug"
                } else if cli.quiet {
                    "error"
                } else {
                    "warn"
                })
            }),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve out_dir (CLI > Config > Default)
    let out_dir = cli
        .out_dir
        .or(file_cfg.out_dir)
        .unwrap_or_else(|| PathBuf::from("chat-page-export"));

    // 3. Resolve format (CLI > Config > Markdown)
    let format = cli
        .format
        .or(file_cfg.format)
        .unwrap_or(OutputFormat::Markdown);

    // 4. Resolve tags and image policy (CLI > Config)
    let tags = cli.tags.or(file_cfg.tags);
    let extract_images = cli.extract_images || file_cfg.extract_images.unwrap_or(false);

    // 5. Parse the source URL override up front so bad values fail fast
    let source_url = cli
        .source_url
        .as_deref()
        .map(|raw| url::Url::parse(raw).wrap_err_with(|| format!("Invalid --source-url: {}", raw)))
        .transpose()?;

    // 6. Build the Export Config
    let config = ExportConfig {
        inputs: cli.inputs,
        out_dir,
        format,
        platform: cli.platform.and_then(PlatformArg::resolve),
        source_url,
        tags,
        extract_images,
        force: cli.force,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    // 7. Run the Business Logic
    if cli.analyze {
        return analyze::run(&config);
    }

    #[cfg(feature = "sequential")]
    return chat_page_export::sequential::execute(config);

    #[cfg(not(feature = "sequential"))]
    chat_page_export::parallel::execute(config)
}
