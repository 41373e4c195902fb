//! Host-backed drive filesystem.
//!
//! `MemoryDriveFS`/`OverlayDriveFS` keep everything in RAM; a CP/M-3 session
//! mounted against a real directory (`-d LETTER=PATH`) needs files that
//! actually land on disk. Grounded in `BDOS::createAbsolutePath` (reused here
//! via [`super::super::bdos::create_absolute_path`]) for the
//! `<mount>/<current_dir>/<8.3 name>` layout spec §6 describes.
//!
//! Unlike `Bdos`'s own per-drive `current_dir` bookkeeping (display-only, not
//! consulted when opening files — see DESIGN.md), this filesystem's
//! `current_dir` is load-bearing: it's the subdirectory under `root` that
//! every `read_file`/`write_file`/`delete_file`/`list_files`/`exists` call is
//! resolved against.

use std::fs;
use std::path::PathBuf;

use super::drive_fs::{to_8_3, DriveFS};
use crate::bdos::{create_absolute_path, host_path};
use crate::error::CpmResult;

/// A `DriveFS` backed by a real directory on the host.
pub struct HostDriveFS {
    root: PathBuf,
    current_dir: String,
}

impl HostDriveFS {
    /// Mount `root` as a drive. Creates `root` if it doesn't exist yet, the
    /// way mounting a fresh drive letter in `original_source/` lazily
    /// creates its backing directory.
    pub fn new(root: impl Into<PathBuf>) -> CpmResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            current_dir: String::new(),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    /// Move the drive's working subdirectory. Accepts any path, absolute or
    /// relative to the current one, with `..` segments collapsed; does not
    /// require the target to already exist on disk, matching `Bdos::change_directory`'s
    /// "accept any path" behavior.
    pub fn change_directory(&mut self, path: &str) {
        self.current_dir = create_absolute_path(path, &self.current_dir);
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let cpm_path = create_absolute_path(&to_8_3(name), &self.current_dir);
        host_path(&self.root, &cpm_path)
    }
}

impl DriveFS for HostDriveFS {
    fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        fs::read(self.resolve(name)).ok()
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> CpmResult<()> {
        let path = self.resolve(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn delete_file(&mut self, name: &str) -> bool {
        fs::remove_file(self.resolve(name)).is_ok()
    }

    fn list_files(&self) -> Vec<String> {
        let dir = host_path(&self.root, &self.current_dir);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .map(|n| to_8_3(&n))
            .collect()
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("cpm_host_drive_test_{}", std::process::id()));
        p.push(uuid_like());
        p
    }

    // No `rand`/`uuid` dependency pulled in just for test scratch directories;
    // a counter-seeded name is unique enough within one test binary run.
    fn uuid_like() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir();
        let mut fs = HostDriveFS::new(&dir).unwrap();
        fs.write_file("hello.txt", b"hi there").unwrap();
        assert!(fs.exists("HELLO.TXT"));
        assert_eq!(fs.read_file("hello.txt"), Some(b"hi there".to_vec()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delete_file() {
        let dir = tempdir();
        let mut fs = HostDriveFS::new(&dir).unwrap();
        fs.write_file("A.COM", &[1, 2, 3]).unwrap();
        assert!(fs.delete_file("A.COM"));
        assert!(!fs.exists("A.COM"));
        assert!(!fs.delete_file("A.COM"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_files_is_scoped_to_current_dir() {
        let dir = tempdir();
        let mut fs = HostDriveFS::new(&dir).unwrap();
        fs.write_file("ROOT.TXT", &[1]).unwrap();
        fs.change_directory("SUB");
        fs.write_file("NESTED.TXT", &[2]).unwrap();

        let nested_files = fs.list_files();
        assert_eq!(nested_files, vec!["NESTED.TXT".to_string()]);

        fs.change_directory("..");
        let root_files = fs.list_files();
        assert_eq!(root_files, vec!["ROOT.TXT".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_change_directory_collapses_dotdot() {
        let dir = tempdir();
        let mut fs = HostDriveFS::new(&dir).unwrap();
        fs.change_directory("SUB/DEEPER");
        fs.change_directory("..");
        assert_eq!(fs.current_dir(), "SUB");
        std::fs::remove_dir_all(&dir).ok();
    }
}
