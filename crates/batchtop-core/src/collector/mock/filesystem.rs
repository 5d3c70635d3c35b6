//! In-memory mock filesystem for testing collectors without real `/proc`.
//!
//! Clones of a `MockFs` share one tree, so a test can keep a handle, hand a
//! clone to the monitor, and rewrite files between cycles.

use crate::collector::traits::{FileSystem, Source};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tree {
    /// Map from path to file contents.
    files: HashMap<PathBuf, Vec<u8>>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    fn file(&self, path: &Path) -> io::Result<&[u8]> {
        self.files.get(path).map(Vec::as_slice).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file. Parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut tree = self.write();
        tree.add_parents(path);
        tree.files.insert(path.to_path_buf(), content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.write();
        tree.add_parents(path);
        tree.directories.insert(path.to_path_buf());
    }

    /// Removes a file, if present.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.write().files.remove(path.as_ref());
    }

    /// Removes a directory and everything below it.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.write();
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }

    /// Adds a task with its `/proc/[pid]/stat` and `/proc/[pid]/cmdline`.
    ///
    /// CPU and block I/O values are in clock ticks, `rss_pages` in pages.
    pub fn add_task(
        &self,
        pid: u32,
        name: &str,
        cpu_ticks: u64,
        rss_pages: i64,
        blkio_ticks: u64,
        cmdline: &str,
    ) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), task_stat_line(pid, name, cpu_ticks, rss_pages, blkio_ticks));
        self.add_file(base.join("cmdline"), cmdline);
    }

    /// Rewrites only the counters of an existing task.
    pub fn update_task(&self, pid: u32, name: &str, cpu_ticks: u64, rss_pages: i64, blkio_ticks: u64) {
        self.add_file(
            format!("/proc/{}/stat", pid),
            task_stat_line(pid, name, cpu_ticks, rss_pages, blkio_ticks),
        );
    }
}

/// Builds a `/proc/[pid]/stat` line with all CPU time charged as user time.
pub fn task_stat_line(pid: u32, name: &str, cpu_ticks: u64, rss_pages: i64, blkio_ticks: u64) -> String {
    format!(
        "{pid} ({name}) S 1 {pid} {pid} 0 -1 4194304 100 0 0 0 {cpu_ticks} 0 0 0 20 0 1 0 12345 \
         12345678 {rss_pages} 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 {blkio_ticks} 0 0\n"
    )
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let tree = self.read();
        let bytes = tree.file(path)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_prefix(&self, path: &Path, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        let tree = self.read();
        let bytes = tree.file(path)?;
        let n = bytes.len().min(limit);
        buf.clear();
        buf.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.read();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.read();
        if !tree.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        // Find all files and directories that are direct children
        for file_path in tree.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &tree.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn link_count(&self, path: &Path) -> io::Result<u64> {
        let tree = self.read();
        if !tree.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }
        let subdirs = tree
            .directories
            .iter()
            .filter(|d| d.parent().is_some_and(|parent| parent == path))
            .count() as u64;
        Ok(2 + subdirs)
    }

    fn open_source(&self, path: &Path) -> io::Result<Box<dyn Source>> {
        self.read().file(path)?;
        Ok(Box::new(MockSource {
            fs: self.clone(),
            path: path.to_path_buf(),
        }))
    }
}

/// Reads whatever the shared tree holds at the time of each read.
struct MockSource {
    fs: MockFs,
    path: PathBuf,
}

impl Source for MockSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_head(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        self.fs.read_prefix(&self.path, buf, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 16384 kB\n");

        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc")));

        let content = fs.read_to_string(Path::new("/proc/meminfo")).unwrap();
        assert_eq!(content, "MemTotal: 16384 kB\n");
    }

    #[test]
    fn test_mock_fs_read_dir() {
        let fs = MockFs::new();
        fs.add_file("/proc/1/stat", "stat content");
        fs.add_file("/proc/1/cmdline", "init");
        fs.add_file("/proc/2/stat", "stat content 2");

        let proc_entries = fs.read_dir(Path::new("/proc")).unwrap();
        assert_eq!(proc_entries.len(), 2); // /proc/1 and /proc/2

        let proc1_entries = fs.read_dir(Path::new("/proc/1")).unwrap();
        assert_eq!(proc1_entries.len(), 2); // stat and cmdline

        assert_eq!(fs.link_count(Path::new("/proc")).unwrap(), 4);
    }

    #[test]
    fn test_mock_fs_clones_share_state() {
        let fs = MockFs::new();
        let other = fs.clone();
        fs.add_task(42, "worker", 100, 10, 0, "worker\0--fast\0");

        assert!(other.exists(Path::new("/proc/42/stat")));

        other.remove_dir_all("/proc/42");
        assert!(!fs.exists(Path::new("/proc/42")));
        assert!(!fs.exists(Path::new("/proc/42/stat")));
    }

    #[test]
    fn test_mock_source_follows_updates() {
        let fs = MockFs::new();
        fs.add_file("/proc/loadavg", "0.50 0.40 0.30 1/100 1\n");

        let mut source = fs.open_source(Path::new("/proc/loadavg")).unwrap();
        let mut buf = Vec::new();
        source.read_head(&mut buf, 4).unwrap();
        assert_eq!(buf, b"0.50");

        fs.add_file("/proc/loadavg", "7.25 0.40 0.30 1/100 1\n");
        source.read_head(&mut buf, 4).unwrap();
        assert_eq!(buf, b"7.25");

        fs.remove_file("/proc/loadavg");
        assert!(source.read_head(&mut buf, 4).is_err());
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(fs.open_source(Path::new("/nonexistent")).is_err());
    }
}
