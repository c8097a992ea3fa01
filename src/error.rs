use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no documents to assemble")]
    NoDocuments,

    #[error("duplicate file identifier in document set: {0}")]
    DuplicateFile(String),

    #[error("no pages were assembled from {0} document(s)")]
    NothingAssembled(usize),

    #[error("table of contents has no nodes")]
    EmptyToc,

    #[error("layout error: {0}")]
    Layout(String),

    #[error("malformed PDF structure: {0}")]
    Structure(String),
}
