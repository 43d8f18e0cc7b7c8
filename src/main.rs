use anyhow::{Context, Result};
use ciphr::arxiv::ArxivClient;
use ciphr::config::{Config, DEFAULT_LLM_RESULTS_FILE};
use ciphr::extract::PdfExtractor;
use ciphr::llm::GeminiClient;
use ciphr::notify::configured_sinks;
use ciphr::pipeline::{self, RunReport};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Fetch new papers and write the files for an external LLM step
    Collect,
    /// Read the LLM results and update the table
    Process,
    /// Collect, then process if LLM results are already available
    Full,
    /// Run everything in one process, calling the Gemini API directly
    Local,
}

/// Scrape new arXiv papers, ask an LLM about them and keep a markdown table of the answers
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Comma-separated arXiv categories (e.g., hep-ph,hep-ex)
    #[arg(short, long)]
    tags: Option<String>,
    /// Number of new papers to add
    #[arg(short = 'n', long)]
    max_results: Option<usize>,
    /// Largest batch to fetch while looking past duplicates
    #[arg(long)]
    max_expansion_results: Option<usize>,
    /// Directory for the table and intermediate files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Name of the markdown table
    #[arg(short = 'f', long)]
    output_filename: Option<String>,
    #[arg(short, long, value_enum, default_value_t = Mode::Local)]
    mode: Mode,
    /// LLM results file, relative to the output directory
    #[arg(long, default_value = DEFAULT_LLM_RESULTS_FILE)]
    llm_results_file: PathBuf,
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Send webhook and CMS notifications
    #[arg(long)]
    notify: bool,
    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = if args.verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    config.apply_env();

    if let Some(tags) = &args.tags {
        config.set_tags(tags);
    }
    if let Some(n) = args.max_results {
        config.max_results = n;
    }
    if let Some(m) = args.max_expansion_results {
        config.max_expansion_results = m;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(name) = &args.output_filename {
        config.output_filename = name.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_report(report: &RunReport) {
    if report.is_partial() {
        warn!("Fewer new papers than requested were available");
    }
    println!("{}", report.summary());
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(&args)?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", config.output_dir))?;
    info!("Running in {:?} mode with tags {:?}", args.mode, config.tags);

    let sinks = if args.notify {
        configured_sinks(&config)?
    } else {
        Vec::new()
    };
    let results_path = config.output_dir.join(&args.llm_results_file);

    match args.mode {
        Mode::Collect | Mode::Full => {
            let source = ArxivClient::new(&config)?;
            let extractor = PdfExtractor::new(&config)?;
            let collection = pipeline::collect(&config, &source, &extractor).context("Data collection failed")?;
            info!(
                "Collected {} papers into {:?} for {:?}",
                collection.papers.len(),
                config.papers_data_path(),
                collection.target
            );
            if collection.search.is_partial() {
                warn!(
                    "Only {} of {} requested new papers were found",
                    collection.search.papers.len(),
                    collection.search.requested
                );
            }

            if args.mode == Mode::Full {
                if results_path.exists() {
                    let mut report = pipeline::process(&config, &results_path, &sinks).context("Result processing failed")?;
                    report.search = Some(collection.search);
                    print_report(&report);
                } else {
                    info!(
                        "No LLM results at {:?}. Answer the prompts in {:?} and rerun with --mode process",
                        results_path,
                        config.prompts_path()
                    );
                }
            } else {
                println!(
                    "Collected {} new papers. Papers data: {:?}, prompts: {:?}",
                    collection.papers.len(),
                    config.papers_data_path(),
                    config.prompts_path()
                );
            }
        }
        Mode::Process => {
            let report = pipeline::process(&config, &results_path, &sinks).context("Result processing failed")?;
            print_report(&report);
        }
        Mode::Local => {
            let provider = GeminiClient::new(&config)?;
            let source = ArxivClient::new(&config)?;
            let extractor = PdfExtractor::new(&config)?;
            let report = pipeline::run_local(&config, &source, &extractor, &provider, &sinks)?;
            print_report(&report);
        }
    }

    Ok(())
}
