//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the collectors read from the real `/proc` and
//! `/sys` trees on Linux or from an in-memory `MockFs` in tests. Files that are
//! polled every cycle are opened once as a [`Source`] and re-read from offset 0.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Reads at most `limit` bytes from the start of a file into `buf`.
    ///
    /// `buf` is cleared first so callers can reuse one scratch buffer across
    /// many reads. Returns the number of bytes read.
    fn read_prefix(&self, path: &Path, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Hard link count of a directory: 2 plus its number of subdirectories.
    fn link_count(&self, path: &Path) -> io::Result<u64>;

    /// Opens a file that will be re-read repeatedly.
    fn open_source(&self, path: &Path) -> io::Result<Box<dyn Source>>;
}

/// A file kept open for repeated whole-file reads from offset 0.
pub trait Source: Send {
    /// Path the source was opened from.
    fn path(&self) -> &Path;

    /// Reads at most `limit` bytes from the start of the file into `buf`.
    fn read_head(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>;
}

/// Process-wide choice between positional reads and reopen-per-read.
///
/// Starts positional. The first `ESPIPE` from any source flips it to reopen for
/// every source sharing the strategy; it never flips back.
#[derive(Debug)]
pub struct ReadStrategy {
    positional: AtomicBool,
}

impl Default for ReadStrategy {
    fn default() -> Self {
        Self {
            positional: AtomicBool::new(true),
        }
    }
}

impl ReadStrategy {
    pub fn is_positional(&self) -> bool {
        self.positional.load(Ordering::Relaxed)
    }

    /// Switches to reopen-per-read. Returns `true` only for the call that did it.
    pub fn downgrade(&self) -> bool {
        self.positional.swap(false, Ordering::Relaxed)
    }
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Clones share one [`ReadStrategy`].
#[derive(Debug, Default, Clone)]
pub struct RealFs {
    strategy: Arc<ReadStrategy>,
}

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(&self) -> &ReadStrategy {
        &self.strategy
    }
}

fn read_limited(file: File, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
    buf.clear();
    file.take(limit as u64).read_to_end(buf)
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_prefix(&self, path: &Path, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        read_limited(File::open(path)?, buf, limit)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn link_count(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.nlink())
    }

    fn open_source(&self, path: &Path) -> io::Result<Box<dyn Source>> {
        let file = File::open(path)?;
        Ok(Box::new(RealSource {
            path: path.to_path_buf(),
            file: Some(file),
            strategy: Arc::clone(&self.strategy),
        }))
    }
}

/// A cached file handle read with `pread`, or reopened each time once the
/// shared strategy has been downgraded.
#[derive(Debug)]
struct RealSource {
    path: PathBuf,
    file: Option<File>,
    strategy: Arc<ReadStrategy>,
}

impl RealSource {
    fn reopen_read(&self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        read_limited(File::open(&self.path)?, buf, limit)
    }
}

impl Source for RealSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_head(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        if self.strategy.is_positional()
            && let Some(file) = &self.file
        {
            buf.clear();
            buf.resize(limit, 0);
            match file.read_at(buf, 0) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(n);
                }
                Err(e) if e.raw_os_error() == Some(libc::ESPIPE) => {
                    if self.strategy.downgrade() {
                        warn!(
                            "positional reads unsupported on {}, reopening sources on every read",
                            self.path.display()
                        );
                    }
                }
                Err(e) => {
                    buf.clear();
                    return Err(e);
                }
            }
        }

        self.file = None;
        self.reopen_read(buf, limit)
    }
}
