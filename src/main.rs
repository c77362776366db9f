//! epubscrub - EPUB sanitizer CLI

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use epubscrub::{Config, Sanitizer};

const EXIT_MISSING_INPUT: u8 = 3;
const EXIT_FAILURE: u8 = 4;

#[derive(Parser)]
#[command(name = "epubscrub")]
#[command(version, about = "Deterministic pre-flight cleanup for EPUB files", long_about = None)]
#[command(after_help = "EXAMPLES:
    epubscrub book.epub clean.epub                  Sanitize with the default filter
    epubscrub --filter=default,kobo book.epub out.epub
    epubscrub --overwrite book.epub                 Sanitize in place")]
struct Cli {
    /// Input EPUB file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output EPUB file
    #[arg(value_name = "OUTPUT", required_unless_present = "overwrite")]
    output: Option<PathBuf>,

    /// Comma-separated filter list ('all' = every filter)
    #[arg(long, default_value = "default")]
    filter: String,

    /// Compression level for exported entries (0-9)
    #[arg(long, default_value_t = 6)]
    compress: i64,

    /// Cache backend: ram or disk
    #[arg(long, default_value = "ram")]
    cache: String,

    /// Concurrency mode: single or multi
    #[arg(long, default_value = "single")]
    threads: String,

    /// Target EPUB version: 0 (auto), 2, or 3
    #[arg(long = "epub-ver", default_value_t = 0)]
    epub_ver: i64,

    /// Suppress repairs that could drop reader-visible content
    #[arg(long = "publisher-mode")]
    publisher_mode: bool,

    /// Write the sanitized file over the input file
    #[arg(long)]
    overwrite: bool,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.quiet {
        tracing_subscriber::fmt()
            .with_target(false)
            .without_time()
            .init();
    }

    if !cli.input.is_file() {
        eprintln!("error: input file {} does not exist", cli.input.display());
        return ExitCode::from(EXIT_MISSING_INPUT);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::new();
    config.load("filter", &cli.filter);
    config.load("compress", &cli.compress.to_string());
    config.load("cache", &cli.cache);
    config.load("threads", &cli.threads);
    config.load("epubVer", &cli.epub_ver.to_string());
    config.load("publisherMode", &cli.publisher_mode.to_string());
    config.load("overwrite", &cli.overwrite.to_string());

    let input = File::open(&cli.input)?;
    let sanitizer = Sanitizer::new(config);

    if cli.overwrite {
        // Sanitize through a temp file so a crash never clobbers the input.
        let dir = cli.input.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        sanitizer.sanitize(input, temp.as_file_mut())?;
        temp.persist(&cli.input)?;
    } else {
        let output_path = cli.output.as_ref().expect("output required");
        let output = File::create(output_path)?;
        sanitizer.sanitize(input, output)?;
    }
    Ok(())
}
