//! Card file system navigation
//!
//! [`Path`] values address files, [`FileDescriptor`] describes what SELECT
//! FILE found, and [`enumerate`] walks a whole subtree.
//!
//! Enumeration is best effort. Every file visited becomes one
//! [`FileEntry`] in the resulting [`FileTree`]; a file that cannot be
//! selected or listed is recorded with its error, its subtree is skipped
//! and the walk continues with its siblings.

mod file;
mod path;

pub use file::{
    acl_slots, AccessRule, DfOperation, EfOperation, EfStructure, FileDescriptor, FileType,
    SelectedFile,
};
pub use path::{Path, MAX_PATH_SIZE, MF_ID};

use log::{debug, warn};

use crate::apdu::CardErrorKind;
use crate::card::Card;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct EnumerateOptions {
    /// Read the content of every working EF visited
    pub read_contents: bool,
}

/// Content of an elementary file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Binary(Vec<u8>),
    Records(Vec<Vec<u8>>),
}

#[derive(Debug)]
pub enum EntryStatus {
    Selected {
        file: SelectedFile,
        /// `None` when contents were not requested or the file has none
        content: Option<Result<FileContent>>,
        /// Set when the file is a directory whose children could not be listed
        listing_error: Option<Error>,
    },
    Failed(Error),
}

/// One visited file
#[derive(Debug)]
pub struct FileEntry {
    /// Identifier of the file, also when no path could be built for it
    pub id: [u8; 2],
    /// Full path, or the parent's path when joining the child failed
    pub path: Path,
    /// Distance from the enumeration root
    pub depth: usize,
    pub status: EntryStatus,
}

impl FileEntry {
    pub fn selected_file(&self) -> Option<&SelectedFile> {
        match &self.status {
            EntryStatus::Selected { file, .. } => Some(file),
            EntryStatus::Failed(_) => None,
        }
    }

    /// Whether selecting or listing this file failed
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            EntryStatus::Failed(_)
                | EntryStatus::Selected {
                    listing_error: Some(_),
                    ..
                }
        )
    }
}

/// Pre-order record of an enumeration
#[derive(Debug, Default)]
pub struct FileTree {
    pub entries: Vec<FileEntry>,
}

impl FileTree {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }

    /// Whether any file could not be selected or listed
    ///
    /// Content read errors are not counted; they are reported per entry.
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(FileEntry::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.is_failure())
    }

    pub fn find(&self, path: &Path) -> Option<&FileEntry> {
        self.entries
            .iter()
            .find(|e| &e.path == path && e.selected_file().is_some())
    }
}

/// Recursively select `root` and everything below it
pub fn enumerate(card: &mut Card, root: &Path, options: &EnumerateOptions) -> FileTree {
    let mut tree = FileTree::default();
    walk(card, root.clone(), 0, options, &mut tree);
    debug!("Enumerated {} file(s) below {}", tree.len(), root);
    tree
}

fn walk(card: &mut Card, path: Path, depth: usize, options: &EnumerateOptions, tree: &mut FileTree) {
    let id = path.file_id();
    let file = match card.select_file(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot select {}: {}", path, e);
            tree.entries.push(FileEntry {
                id,
                path,
                depth,
                status: EntryStatus::Failed(e),
            });
            return;
        }
    };

    let content = if options.read_contents {
        read_content(card, &file)
    } else {
        None
    };
    let descend = file.may_have_children();
    let index = tree.entries.len();
    tree.entries.push(FileEntry {
        id,
        path: path.clone(),
        depth,
        status: EntryStatus::Selected {
            file,
            content,
            listing_error: None,
        },
    });
    if !descend {
        return;
    }

    let children = match card.list_files() {
        Ok(children) => children,
        Err(e) => {
            warn!("Cannot list {}: {}", path, e);
            if let EntryStatus::Selected { listing_error, .. } = &mut tree.entries[index].status {
                *listing_error = Some(e);
            }
            return;
        }
    };

    for fid in children {
        match path.join(fid) {
            Ok(child) => walk(card, child, depth + 1, options, tree),
            Err(e) => {
                warn!("Not descending below {}: {}", path, e);
                tree.entries.push(FileEntry {
                    id: fid,
                    path: path.clone(),
                    depth: depth + 1,
                    status: EntryStatus::Failed(e),
                });
            }
        }
    }
}

fn read_content(card: &mut Card, file: &SelectedFile) -> Option<Result<FileContent>> {
    let fd = file.descriptor()?;
    if fd.file_type != FileType::WorkingEf {
        return None;
    }
    match fd.ef_structure {
        EfStructure::Transparent => Some(card.read_binary(0, fd.size).map(FileContent::Binary)),
        s if s.is_record_based() => Some(read_records(card)),
        _ => None,
    }
}

fn read_records(card: &mut Card) -> Result<FileContent> {
    let mut records = Vec::new();
    for number in 1..=u8::MAX {
        match card.read_record(number) {
            Ok(record) => records.push(record),
            Err(Error::Card {
                kind: CardErrorKind::RecordNotFound,
                ..
            }) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(FileContent::Records(records))
}
