//! EPUB input.
//!
//! Loads an EPUB 2/3 archive into the OEB [`Book`](crate::book::Book) model
//! that the LIT writer consumes.

mod reader;

pub use reader::{read_epub, read_epub_from_reader};
