//! # litwriter
//!
//! Writes Microsoft Reader `.lit` ebooks from Open eBook publications.
//!
//! ## Features
//!
//! - Load EPUB 2/3 archives into an OEB book model (manifest, spine, guide,
//!   metadata)
//! - Tokenize XHTML content and the package metadata into ReBinary streams
//! - LZX-compress and DES-wrap the storage sections of the ITOL/ITLS
//!   container
//! - Unprotected output: the DRM streams carry the "free" sealed-key stub
//!
//! ## Quick Start
//!
//! ```no_run
//! use litwriter::{read_epub, write_lit};
//!
//! let mut book = read_epub("input.epub").unwrap();
//! write_lit(&mut book, "output.lit").unwrap();
//! ```
//!
//! ## Building Books
//!
//! ```
//! use litwriter::{Book, ItemData, Metadata};
//! use litwriter::dom::parse_xml;
//!
//! let mut book = Book::new();
//! book.metadata = Metadata::new("My Book")
//!     .with_author("Author Name")
//!     .with_language("en");
//!
//! let dom = parse_xml("<html><body><p>Hello</p></body></html>").unwrap();
//! book.manifest.add("ch1", "chapter1.xhtml", "application/xhtml+xml", ItemData::Document(dom));
//! book.spine.push("ch1", true);
//!
//! let mut out = std::io::Cursor::new(Vec::new());
//! litwriter::write_lit_to_writer(&mut book, &mut out).unwrap();
//! assert_eq!(&out.get_ref()[..8], b"ITOLITLS");
//! ```

pub mod book;
pub mod css;
pub mod dom;
pub mod epub;
pub mod error;
pub mod export;
pub mod lit;
pub(crate) mod util;

pub use book::{Book, Guide, ItemData, Manifest, ManifestItem, Metadata, Spine};
pub use epub::{read_epub, read_epub_from_reader};
pub use error::{Error, Result};
pub use export::{Exporter, LitExporter};
pub use lit::{LitConfig, write_lit, write_lit_to_writer, write_lit_with_config};
