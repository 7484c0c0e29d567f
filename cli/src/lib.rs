//! subfont CLI (made by FontLab https://www.fontlab.com/)

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use regex::Regex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use subfont_core::config::{CacheLayout, ServeConfig};
use subfont_core::output::{write_json_pretty, write_ndjson};
use subfont_core::service::FontService;
use subfont_core::sources::FontSource;
use subfont_core::warm::{discover, warm, WarmOptions, WarmedFont};

mod config;
pub mod server;

use crate::config::{normalize_mount, FileConfig, DEFAULT_BIND, DEFAULT_MOUNT};

/// CLI entrypoint for subfont.
#[derive(Debug, Parser)]
#[command(
    name = "subfont",
    about = "On-demand web font subsetting (made by FontLab https://www.fontlab.com/)"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        action = ArgAction::SetTrue
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve subset fonts over HTTP
    Serve(ServeArgs),
    /// List the source fonts a root can serve
    List(ListArgs),
    /// Pre-build the subset for a text across every source
    Build(BuildArgs),
}

/// Options shaping where artifacts go and what the CSS points at.
#[derive(Debug, Default, Args)]
struct CacheArgs {
    /// Cache directory under the root
    #[arg(long = "dest", value_hint = ValueHint::Other)]
    dest: Option<String>,

    /// URL prefix for font files inside generated CSS
    #[arg(long = "font-path", value_hint = ValueHint::Url)]
    font_path: Option<String>,

    /// Inline the TrueType subset into the CSS as a data URI
    #[arg(long = "base64", action = ArgAction::SetTrue)]
    base64: bool,

    /// Cache layout under the destination directory
    #[arg(long = "layout", value_enum)]
    layout: Option<LayoutArg>,
}

impl CacheArgs {
    fn apply(&self, config: &mut ServeConfig) {
        if let Some(dest) = &self.dest {
            config.dest = dest.clone();
        }
        if let Some(font_path) = &self.font_path {
            config.font_path = Some(font_path.clone());
        }
        config.base64 |= self.base64;
        if let Some(layout) = self.layout {
            config.layout = layout.into();
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LayoutArg {
    Flat,
    Nested,
}

impl From<LayoutArg> for CacheLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Flat => CacheLayout::Flat,
            LayoutArg::Nested => CacheLayout::Nested,
        }
    }
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Directory holding the source .ttf files
    #[arg(
        value_hint = ValueHint::DirPath,
        required_unless_present = "config"
    )]
    root: Option<PathBuf>,

    /// Address to listen on
    #[arg(long = "bind", value_hint = ValueHint::Other)]
    bind: Option<String>,

    /// URL prefix the middleware answers under
    #[arg(long = "mount", value_hint = ValueHint::Other)]
    mount: Option<String>,

    /// Gzip responses for clients that accept it
    #[arg(long = "gzip", action = ArgAction::SetTrue)]
    gzip: bool,

    /// TOML file with defaults; flags win over it
    #[arg(short = 'c', long = "config", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(flatten)]
    cache: CacheArgs,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Directory holding the source .ttf files
    #[arg(value_hint = ValueHint::DirPath)]
    root: PathBuf,

    /// Cache directory under the root, skipped while scanning
    #[arg(long = "dest", value_hint = ValueHint::Other)]
    dest: Option<String>,

    /// Regex patterns that must match the font file stem
    #[arg(short = 'n', long = "name", value_hint = ValueHint::Other)]
    name_patterns: Vec<String>,

    /// Follow symlinks while walking the root
    #[arg(long = "follow-symlinks", action = ArgAction::SetTrue)]
    follow_symlinks: bool,

    /// Emit a single JSON array
    #[arg(
        long = "json",
        action = ArgAction::SetTrue,
        conflicts_with = "ndjson"
    )]
    json: bool,

    /// Emit newline-delimited JSON
    #[arg(long = "ndjson", action = ArgAction::SetTrue)]
    ndjson: bool,
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Directory holding the source .ttf files
    #[arg(value_hint = ValueHint::DirPath)]
    root: PathBuf,

    /// Characters every subset must contain
    #[arg(short = 't', long = "text")]
    text: String,

    /// font-family written into the generated CSS
    #[arg(long = "family", value_hint = ValueHint::Other)]
    family: Option<String>,

    /// Regex patterns that must match the font file stem
    #[arg(short = 'n', long = "name", value_hint = ValueHint::Other)]
    name_patterns: Vec<String>,

    /// Worker threads (defaults to one per core)
    #[arg(
        short = 'j',
        long = "jobs",
        value_parser = clap::value_parser!(usize)
    )]
    jobs: Option<usize>,

    /// Follow symlinks while walking the root
    #[arg(long = "follow-symlinks", action = ArgAction::SetTrue)]
    follow_symlinks: bool,

    /// Emit a single JSON array
    #[arg(
        long = "json",
        action = ArgAction::SetTrue,
        conflicts_with = "ndjson"
    )]
    json: bool,

    /// Emit newline-delimited JSON
    #[arg(long = "ndjson", action = ArgAction::SetTrue)]
    ndjson: bool,

    #[command(flatten)]
    cache: CacheArgs,
}

/// Everything `serve` needs once flags and the config file are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServeSettings {
    bind: String,
    mount: String,
    config: ServeConfig,
}

/// Parse CLI args and execute the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::List(args) => run_list(args),
        Command::Build(args) => run_build(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "subfont=debug,tower_http=debug"
    } else {
        "subfont=info,tower_http=info"
    };

    // a subscriber may already be installed when embedded
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let settings = serve_settings(&args)?;
    let service = FontService::new(settings.config).context("invalid serve configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(server::serve(&settings.bind, &settings.mount, service))
}

fn serve_settings(args: &ServeArgs) -> Result<ServeSettings> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mut config = file.serve;
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    config.gzip |= args.gzip;
    args.cache.apply(&mut config);

    if config.root.as_os_str().is_empty() {
        bail!("no font root given: pass ROOT or set [serve] root");
    }

    let bind = args
        .bind
        .clone()
        .or(file.bind)
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let mount = normalize_mount(
        args.mount
            .as_deref()
            .or(file.mount.as_deref())
            .unwrap_or(DEFAULT_MOUNT),
    );

    Ok(ServeSettings {
        bind,
        mount,
        config,
    })
}

fn run_list(args: ListArgs) -> Result<()> {
    let mut config = ServeConfig::new(&args.root);
    if let Some(dest) = &args.dest {
        config.dest = dest.clone();
    }
    let service = FontService::new(config).context("invalid root or dest")?;
    let opts = WarmOptions {
        follow_symlinks: args.follow_symlinks,
        name_patterns: compile_patterns(&args.name_patterns)?,
        ..WarmOptions::default()
    };

    let sources = discover(&service, &opts)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.ndjson {
        write_ndjson(&sources, &mut handle)?;
    } else if args.json {
        write_json_pretty(&sources, &mut handle)?;
    } else {
        write_sources(&sources, &mut handle)?;
    }
    Ok(())
}

fn run_build(args: BuildArgs) -> Result<()> {
    let mut config = ServeConfig::new(&args.root);
    args.cache.apply(&mut config);
    let service = FontService::new(config).context("invalid build configuration")?;
    let opts = WarmOptions {
        follow_symlinks: args.follow_symlinks,
        jobs: args.jobs,
        name_patterns: compile_patterns(&args.name_patterns)?,
        family: args.family.clone(),
    };

    let warmed = warm(&service, &args.text, &opts)?;
    info!(fonts = warmed.len(), "cache warmed");

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.ndjson {
        write_ndjson(&warmed, &mut handle)?;
    } else if args.json {
        write_json_pretty(&warmed, &mut handle)?;
    } else {
        write_warmed(&warmed, &mut handle)?;
    }
    Ok(())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid regex: {p}")))
        .collect()
}

fn write_sources(sources: &[FontSource], mut w: impl Write) -> Result<()> {
    for source in sources {
        writeln!(w, "{}", source.key)?;
    }
    Ok(())
}

fn write_warmed(warmed: &[WarmedFont], mut w: impl Write) -> Result<()> {
    for font in warmed {
        writeln!(
            w,
            "{}  {}  {} artifacts",
            font.source,
            font.artifacts.hash,
            font.artifacts.len()
        )?;
    }
    Ok(())
}
