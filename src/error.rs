//! Error types for litwriter operations.

use thiserror::Error;

/// Errors that can occur while loading a book or writing a LIT file.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output stream does not support random access: {0}")]
    NotSeekable(std::io::Error),

    #[error("Duplicate directory entry: {0}")]
    DuplicateEntry(String),

    #[error("Directory does not fit in its chunk: {0}")]
    DirectoryOverflow(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
