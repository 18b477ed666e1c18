//! Export module for writing books.
//!
//! Provides the `Exporter` trait and the LIT implementation.
//!
//! # Architecture
//!
//! The `Exporter` trait uses a builder pattern:
//! - `new()` creates an exporter with default configuration
//! - `with_config()` allows customization
//! - `export()` writes to any `Write + Seek` destination
//!
//! # Example
//!
//! ```no_run
//! use litwriter::read_epub;
//! use litwriter::export::{Exporter, LitExporter};
//! use std::fs::File;
//!
//! let mut book = read_epub("input.epub")?;
//! let mut file = File::create("output.lit")?;
//! LitExporter::new().export(&mut book, &mut file)?;
//! # Ok::<(), litwriter::Error>(())
//! ```

use std::io::{Seek, Write};

use crate::book::Book;
use crate::error::Result;
use crate::lit::write_lit_with_config;

pub use crate::lit::LitConfig;

/// Trait for exporting books to specific formats.
///
/// Exporters use a builder pattern where configuration is held in the struct,
/// and the `export` method writes to any `Write + Seek` destination.
pub trait Exporter {
    /// Export the book to the provided writer.
    ///
    /// The writer can be:
    /// - `std::fs::File` for disk output
    /// - `std::io::Cursor<Vec<u8>>` for seekable in-memory output
    /// - Any other type implementing `Write + Seek`
    fn export<W: Write + Seek>(&self, book: &mut Book, writer: &mut W) -> Result<()>;
}

/// Microsoft Reader LIT exporter.
#[derive(Debug, Clone, Default)]
pub struct LitExporter {
    config: LitConfig,
}

impl LitExporter {
    /// Create a new LitExporter with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new LitExporter with custom configuration.
    pub fn with_config(config: LitConfig) -> Self {
        Self { config }
    }
}

impl Exporter for LitExporter {
    fn export<W: Write + Seek>(&self, book: &mut Book, writer: &mut W) -> Result<()> {
        write_lit_with_config(book, writer, &self.config)
    }
}
