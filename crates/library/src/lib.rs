//! On-disk paper library: search results in `papers.json`, full texts
//! under `pdfs/`.

mod download;
mod error;
mod library;
mod model;
mod options;

pub use download::{looks_like_pdf, paper_file_name, HttpDownloader};
pub use error::{LibraryError, Result};
pub use library::{
    DownloadReport, PaperDownloader, PaperLibrary, PaperSearch, DOWNLOAD_LOG, OUTPUT_FILE,
    PAPERS_FILE, PDF_DIR,
};
pub use model::{Categories, PaperRecord, PapersFile};
pub use options::{
    parse_category_filter, parse_category_filters, DownloadOptions, SearchOptions,
    DEFAULT_DOWNLOAD_TIMEOUT, KNOWN_DATABASES, PUBLICATION_TYPES,
};
