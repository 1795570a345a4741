//! Filesystem abstraction for local resources.
//!
//! Local detection only ever lists and opens files through the [`FileSystem`]
//! trait, so tests can swap in [`mock::MockFileSystem`] and observe exactly
//! which samples were read.
//!
//! ```ignore
//! let fs = RealFileSystem;
//! let files = fs.list_files(Path::new("data"), 6, &FileFilter::default())?;
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::debug;
use walkdir::WalkDir;

/// File name patterns sampled by default.
pub const DEFAULT_FILE_PATTERNS: [&str; 2] = ["*.xml", "*.gml"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Case-insensitive glob filter applied to file names.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFilter {
    patterns: Vec<Pattern>,
}

impl FileFilter {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    /// `*.xml` and `*.gml`.
    pub fn xml_and_gml() -> Self {
        Self {
            patterns: DEFAULT_FILE_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::xml_and_gml()
    }
}

/// Filesystem operations needed to sample a directory.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Files below `dir` whose names pass `filter`, sorted by path.
    ///
    /// `max_depth` follows `walkdir`: files directly inside `dir` are at
    /// depth 1.
    fn list_files(
        &self,
        dir: &Path,
        max_depth: usize,
        filter: &FileFilter,
    ) -> io::Result<Vec<PathBuf>>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>>;

    fn is_dir(&self, path: &Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn list_files(
        &self,
        dir: &Path,
        max_depth: usize,
        filter: &FileFilter,
    ) -> io::Result<Vec<PathBuf>> {
        if !self.is_dir(dir) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && filter.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(path)?))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}
