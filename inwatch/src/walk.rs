//! Depth-first directory enumeration.
//!
//! A directory is yielded before it is listed: its children are read only
//! when the iterator is advanced past it. A caller that installs a watch on
//! each directory as it is yielded therefore has the watch in place before
//! the listing happens, so a child created in between is caught either by
//! the listing or by the watch.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One entry found during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Full path of the entry.
    pub path: PathBuf,
    /// Whether the entry is a directory (symbolic links are not followed).
    pub is_dir: bool,
    /// Distance from the walk root, which has depth 0.
    pub depth: usize,
}

/// Iterator over a directory tree using an explicit stack.
#[derive(Debug)]
pub struct DirectoryWalker {
    root: Option<PathBuf>,
    stack: Vec<WalkEntry>,
    expand: Option<(PathBuf, usize)>,
}

impl DirectoryWalker {
    /// Walk the tree under `root`, root included.
    ///
    /// A missing root yields nothing. Directories that disappear before they
    /// are listed are skipped.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            stack: Vec::new(),
            expand: None,
        }
    }

    /// Only yield directories.
    pub fn directories(self) -> impl Iterator<Item = io::Result<PathBuf>> {
        self.filter_map(|entry| match entry {
            Ok(entry) if entry.is_dir => Some(Ok(entry.path)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }

    fn list(&mut self, dir: &Path, depth: usize) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if is_vanished(&e) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry?;
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(e) if is_vanished(&e) => continue,
                Err(e) => return Err(e),
            };
            children.push(WalkEntry {
                path: entry.path(),
                is_dir,
                depth: depth + 1,
            });
        }

        // Reverse name order so the stack pops children alphabetically.
        children.sort_by(|a, b| b.path.cmp(&a.path));
        self.stack.extend(children);
        Ok(())
    }
}

impl Iterator for DirectoryWalker {
    type Item = io::Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.root.take() {
            match fs::metadata(&root) {
                Ok(metadata) => self.stack.push(WalkEntry {
                    path: root,
                    is_dir: metadata.is_dir(),
                    depth: 0,
                }),
                Err(e) if is_vanished(&e) => return None,
                Err(e) => return Some(Err(e)),
            }
        }

        if let Some((dir, depth)) = self.expand.take() {
            if let Err(e) = self.list(&dir, depth) {
                return Some(Err(e));
            }
        }

        let entry = self.stack.pop()?;
        if entry.is_dir {
            self.expand = Some((entry.path.clone(), entry.depth));
        }
        Some(Ok(entry))
    }
}

fn is_vanished(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR)
}
