use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{LibraryError, Result};
use crate::model::{PaperRecord, PapersFile};
use crate::options::{DownloadOptions, SearchOptions};

pub const PAPERS_FILE: &str = "papers.json";
pub const PDF_DIR: &str = "pdfs";
pub const DOWNLOAD_LOG: &str = "download.log";
pub const OUTPUT_FILE: &str = "output.json";

/// Runs a literature search against external databases.
pub trait PaperSearch {
    fn search(&self, options: &SearchOptions) -> Result<Vec<PaperRecord>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// Fetches full texts for a set of records into `pdf_dir`.
pub trait PaperDownloader {
    fn download(
        &self,
        papers: &[PaperRecord],
        pdf_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadReport>;
}

/// A directory holding search results and downloaded PDFs:
///
/// ```text
/// <root>/papers.json
/// <root>/pdfs/*.pdf
/// <root>/pdfs/download.log
/// ```
#[derive(Debug, Clone)]
pub struct PaperLibrary {
    root: PathBuf,
}

impl PaperLibrary {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn papers_path(&self) -> PathBuf {
        self.root.join(PAPERS_FILE)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join(PDF_DIR)
    }

    pub fn download_log_path(&self) -> PathBuf {
        self.pdf_dir().join(DOWNLOAD_LOG)
    }

    pub fn default_output_path(&self) -> PathBuf {
        self.root.join(OUTPUT_FILE)
    }

    pub fn load(&self) -> Result<PapersFile> {
        let path = self.papers_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(LibraryError::NoSearchResults(path))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn list_available(&self) -> Result<Vec<PaperRecord>> {
        Ok(self.load()?.papers)
    }

    /// File names of the downloaded PDFs, sorted.
    pub fn list_downloaded(&self) -> Result<Vec<String>> {
        let dir = self.pdf_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(LibraryError::NoDownloads(dir))
            }
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".pdf") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn downloaded_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = self.pdf_dir();
        Ok(self
            .list_downloaded()?
            .into_iter()
            .map(|name| dir.join(name))
            .collect())
    }

    /// Validates `options`, runs the search and replaces `papers.json` with
    /// the results. Returns the number of records stored.
    pub fn search(&self, searcher: &dyn PaperSearch, options: &SearchOptions) -> Result<usize> {
        options.validate()?;
        info!(query = %options.query, "searching for papers");
        let papers = searcher.search(options)?;
        let count = papers.len();
        let file = PapersFile {
            query: Some(options.query.clone()),
            since: options.since,
            until: options.until,
            processed_at: Some(Utc::now()),
            papers,
            ..PapersFile::default()
        };
        self.store(&file)?;
        info!(papers = count, path = %self.papers_path().display(), "search results stored");
        Ok(count)
    }

    fn store(&self, file: &PapersFile) -> Result<()> {
        let path = self.papers_path();
        let tmp = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, file)?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Records that pass the selection and category filters of `options`.
    pub fn select(&self, options: &DownloadOptions) -> Result<Vec<PaperRecord>> {
        Ok(self
            .list_available()?
            .into_iter()
            .filter(|paper| !options.only_selected || paper.is_selected())
            .filter(|paper| paper.matches_categories(&options.categories))
            .collect())
    }

    pub fn download(
        &self,
        downloader: &dyn PaperDownloader,
        options: &DownloadOptions,
    ) -> Result<DownloadReport> {
        let papers = self.select(options)?;
        if papers.is_empty() {
            warn!("no papers match the download filters");
        }
        let pdf_dir = self.pdf_dir();
        fs::create_dir_all(&pdf_dir)?;
        let report = downloader.download(&papers, &pdf_dir, options)?;
        info!(
            requested = papers.len(),
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            "download finished"
        );
        Ok(report)
    }
}
