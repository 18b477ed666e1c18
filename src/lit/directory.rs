//! Directory entries and the section buffers they point into.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Number of storage sections.
pub const NUM_SECTIONS: usize = 4;

/// A named file or folder in the container directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub section: u32,
    pub offset: u64,
    pub size: u64,
}

impl DirEntry {
    pub fn is_folder(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Flat directory in insertion order, plus the four section buffers.
#[derive(Debug, Default)]
pub struct Directory {
    entries: Vec<DirEntry>,
    names: HashSet<String>,
    sections: [Vec<u8>; NUM_SECTIONS],
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: DirEntry) -> Result<()> {
        if !self.names.insert(entry.name.clone()) {
            return Err(Error::DuplicateEntry(entry.name));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Append `data` to `section` and record a file entry for it.
    ///
    /// Empty files get offset 0 and write nothing.
    pub fn add_file(&mut self, name: impl Into<String>, data: &[u8], section: usize) -> Result<()> {
        let buffer = &mut self.sections[section];
        let offset = if data.is_empty() {
            0
        } else {
            let offset = buffer.len() as u64;
            buffer.extend_from_slice(data);
            offset
        };
        self.push(DirEntry {
            name: name.into(),
            section: section as u32,
            offset,
            size: data.len() as u64,
        })
    }

    /// Record a folder entry. A trailing `/` is added when missing.
    pub fn add_folder(&mut self, name: impl Into<String>) -> Result<()> {
        self.add_folder_at(name, 0, 0)
    }

    /// Record a folder entry with explicit offset and size fields.
    pub fn add_folder_at(&mut self, name: impl Into<String>, offset: u64, size: u64) -> Result<()> {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        self.push(DirEntry {
            name,
            section: 0,
            offset,
            size,
        })
    }

    /// Record a folder entry unless one with that name already exists.
    pub fn ensure_folder(&mut self, name: impl Into<String>) {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        if !self.names.contains(&name) {
            self.names.insert(name.clone());
            self.entries.push(DirEntry {
                name,
                section: 0,
                offset: 0,
                size: 0,
            });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes written to a section so far.
    pub fn section(&self, section: usize) -> &[u8] {
        &self.sections[section]
    }

    /// Take the contents of a section, leaving it empty.
    pub fn take_section(&mut self, section: usize) -> Vec<u8> {
        std::mem::take(&mut self.sections[section])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_tracks_section_cursor() {
        let mut dir = Directory::new();
        dir.add_file("/a", b"hello", 0).unwrap();
        dir.add_file("/b", b"world!", 0).unwrap();
        dir.add_file("/c", b"xyz", 1).unwrap();

        assert_eq!(dir.get("/a").unwrap().offset, 0);
        assert_eq!(dir.get("/b").unwrap().offset, 5);
        assert_eq!(dir.get("/b").unwrap().size, 6);
        assert_eq!(dir.get("/c").unwrap().offset, 0);
        assert_eq!(dir.get("/c").unwrap().section, 1);
        assert_eq!(dir.section(0), b"helloworld!");
    }

    #[test]
    fn test_empty_file_writes_nothing() {
        let mut dir = Directory::new();
        dir.add_file("/a", b"abc", 0).unwrap();
        dir.add_file("/empty", b"", 0).unwrap();
        let entry = dir.get("/empty").unwrap();
        assert_eq!((entry.offset, entry.size), (0, 0));
        assert_eq!(dir.section(0).len(), 3);
    }

    #[test]
    fn test_folders() {
        let mut dir = Directory::new();
        dir.add_folder("/data").unwrap();
        assert!(dir.contains("/data/"));
        assert!(dir.get("/data/").unwrap().is_folder());

        dir.ensure_folder("/data/");
        dir.ensure_folder("/other");
        assert_eq!(dir.len(), 2);

        dir.add_folder_at("/", 7, 9).unwrap();
        let root = dir.get("/").unwrap();
        assert_eq!((root.offset, root.size), (7, 9));
    }

    #[test]
    fn test_duplicate_entry_is_an_error() {
        let mut dir = Directory::new();
        dir.add_file("/x", b"1", 0).unwrap();
        assert!(matches!(
            dir.add_file("/x", b"2", 0),
            Err(Error::DuplicateEntry(name)) if name == "/x"
        ));
        dir.add_folder("/f").unwrap();
        assert!(dir.add_folder("/f/").is_err());
    }
}
