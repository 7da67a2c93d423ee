use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::error::{LibraryError, Result};
use crate::library::{DownloadReport, PaperDownloader, DOWNLOAD_LOG};
use crate::model::PaperRecord;
use crate::options::DownloadOptions;

const MAX_SLUG_LEN: usize = 80;
const USER_AGENT: &str = concat!("paperplumber/", env!("CARGO_PKG_VERSION"));

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// `<year>-<slugified title>.pdf`, with `unknown` standing in for a missing
/// publication date.
pub fn paper_file_name(paper: &PaperRecord) -> String {
    let year = paper
        .year()
        .map(|year| year.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let lowered = paper.title.to_lowercase();
    let slug = NON_WORD.replace_all(&lowered, "-");
    let mut slug = slug.trim_matches('-').to_string();
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    format!("{year}-{slug}.pdf")
}

pub fn looks_like_pdf(body: &[u8]) -> bool {
    body.starts_with(b"%PDF")
}

/// Downloads papers over HTTP, trying each candidate URL until one serves
/// a PDF.
pub struct HttpDownloader {
    http: HttpClient,
}

impl HttpDownloader {
    pub fn new(options: &DownloadOptions) -> Result<Self> {
        let mut builder = HttpClient::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = options.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| LibraryError::InvalidOption(format!("proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| LibraryError::Download(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/pdf")
            .send()
            .map_err(|e| LibraryError::Download(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LibraryError::Download(format!("{url}: HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .map_err(|e| LibraryError::Download(format!("{url}: {e}")))?;
        if !looks_like_pdf(&body) {
            return Err(LibraryError::Download(format!(
                "{url}: not a pdf (content-type '{content_type}')"
            )));
        }
        Ok(body.to_vec())
    }

    fn download_one(&self, paper: &PaperRecord, target: &Path) -> Result<String> {
        let urls = paper.download_urls();
        if urls.is_empty() {
            return Err(LibraryError::Download("no url or doi".to_string()));
        }
        let mut last_error = None;
        for url in urls {
            match self.fetch(&url) {
                Ok(body) => {
                    fs::write(target, body)?;
                    return Ok(url);
                }
                Err(err) => {
                    debug!(title = %paper.title, "{err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| LibraryError::Download("no candidate url".to_string())))
    }
}

impl PaperDownloader for HttpDownloader {
    fn download(
        &self,
        papers: &[PaperRecord],
        pdf_dir: &Path,
        _options: &DownloadOptions,
    ) -> Result<DownloadReport> {
        fs::create_dir_all(pdf_dir)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(pdf_dir.join(DOWNLOAD_LOG))?;
        writeln!(log, "------- {} -------", Utc::now().to_rfc3339())?;
        let mut report = DownloadReport::default();
        for paper in papers {
            let target: PathBuf = pdf_dir.join(paper_file_name(paper));
            match self.download_one(paper, &target) {
                Ok(url) => {
                    info!(title = %paper.title, file = %target.display(), "downloaded");
                    writeln!(log, "[DOWNLOADED] {} ({url})", paper.title)?;
                    report.downloaded.push(target);
                }
                Err(err) => {
                    warn!(title = %paper.title, "download failed: {err}");
                    writeln!(log, "[FAILED] {}: {err}", paper.title)?;
                    report.failed.push(paper.title.clone());
                }
            }
        }
        Ok(report)
    }
}
