use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use paperplumber_core::{write_results, DriverOptions, ExtractionDriver, ExtractionSummary};
use paperplumber_library::{
    parse_category_filters, DownloadOptions, HttpDownloader, PaperLibrary, PaperRecord,
};
use tracing::info;

use crate::config::PlumberConfig;

const DATE_WIDTH: usize = 10;
const TITLE_WIDTH: usize = 50;
const AUTHORS_WIDTH: usize = 50;

pub fn list(path: &Path) -> Result<()> {
    let library = PaperLibrary::open(path)?;
    let papers = library.list_available()?;
    print!("{}", render_table(&papers));
    Ok(())
}

pub fn downloaded(path: &Path) -> Result<()> {
    let library = PaperLibrary::open(path)?;
    for name in library.list_downloaded()? {
        println!("{name}");
    }
    Ok(())
}

pub fn download(
    path: &Path,
    selected: bool,
    categories: &[String],
    proxy: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let library = PaperLibrary::open(path)?;
    let mut options = DownloadOptions {
        only_selected: selected,
        categories: parse_category_filters(categories)?,
        proxy,
        ..DownloadOptions::default()
    };
    if let Some(secs) = timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    let downloader = HttpDownloader::new(&options)?;
    let report = library.download(&downloader, &options)?;
    println!(
        "downloaded {} papers, {} failed (see {})",
        report.downloaded.len(),
        report.failed.len(),
        library.download_log_path().display()
    );
    Ok(())
}

pub struct ParseArgs {
    pub path: PathBuf,
    pub target: String,
    pub no_embedding_filter: bool,
    pub top_k: Option<usize>,
    pub jobs: Option<usize>,
    pub output: Option<PathBuf>,
}

pub fn parse(mut config: PlumberConfig, args: ParseArgs) -> Result<()> {
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    let library = PaperLibrary::open(&args.path)?;
    let papers = library.downloaded_paths()?;

    let options = DriverOptions {
        use_embedding_filter: !args.no_embedding_filter,
        top_k: config.top_k,
        jobs: config.jobs.max(1),
    };
    let inference = config.inference()?;
    let embedder = if options.use_embedding_filter {
        Some(config.embedder()?)
    } else {
        None
    };
    info!(
        provider = config.provider.as_str(),
        model = %config.model(),
        papers = papers.len(),
        "parsing downloaded papers"
    );
    let driver = ExtractionDriver::new(inference, embedder, options)?;
    let results = driver.run(&args.target, &papers)?;

    let output = args
        .output
        .unwrap_or_else(|| library.default_output_path());
    write_results(&output, &results)
        .with_context(|| format!("failed to write {}", output.display()))?;
    let summary = ExtractionSummary::from_results(&results);
    println!(
        "{} papers: {} with values, {} ambiguous, {} failed -> {}",
        summary.papers,
        summary.with_values,
        summary.ambiguous,
        summary.failed,
        output.display()
    );
    Ok(())
}

pub fn version() {
    println!("paperplumber {}", env!("CARGO_PKG_VERSION"));
}

fn render_table(papers: &[PaperRecord]) -> String {
    let mut out = format!(
        "{:<DATE_WIDTH$}  {:<TITLE_WIDTH$}  {}\n",
        "Date", "Title", "Authors"
    );
    for paper in papers {
        let date = paper
            .publication_date
            .map(|date| date.to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<DATE_WIDTH$}  {:<TITLE_WIDTH$}  {}\n",
            date,
            clip(&paper.title, TITLE_WIDTH),
            clip(&paper.authors.join(","), AUTHORS_WIDTH)
        ));
    }
    out
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}
