//! Directory label store.
//!
//! Each drive may carry a hidden `.dirlabel` file at its root recording
//! whether timestamping is enabled for that drive and, if so, which events
//! (create, update, access) get stamped, plus whether passwords are active.
//! Backs BDOS functions 100-102 (set/get directory label, set/get password
//! mode) from spec §4.3.

use crate::datetime::DateTime;
use crate::error::CpmResult;
use crate::fs::DriveFS;

pub const DIRLABEL_FILENAME: &str = ".dirlabel";

pub const DIRLABELFLAGS_EXISTS: u8 = 0b0000_0001;
pub const DIRLABELFLAGS_CREATE: u8 = 0b0001_0000;
pub const DIRLABELFLAGS_UPDATE: u8 = 0b0010_0000;
pub const DIRLABELFLAGS_ACCESS: u8 = 0b0100_0000;
pub const DIRLABELFLAGS_PASSWORD: u8 = 0b1000_0000;

/// On-disk shape of `.dirlabel`: a flag byte plus the extent's creation and
/// last-update timestamps (4 bytes each).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirLabel {
    pub flags: u8,
    pub created: DateTime,
    pub updated: DateTime,
}

impl DirLabel {
    pub fn exists(&self) -> bool {
        self.flags & DIRLABELFLAGS_EXISTS != 0
    }

    pub fn stamps_create(&self) -> bool {
        self.flags & DIRLABELFLAGS_CREATE != 0
    }

    pub fn stamps_update(&self) -> bool {
        self.flags & DIRLABELFLAGS_UPDATE != 0
    }

    pub fn stamps_access(&self) -> bool {
        self.flags & DIRLABELFLAGS_ACCESS != 0
    }

    pub fn passwords_enabled(&self) -> bool {
        self.flags & DIRLABELFLAGS_PASSWORD != 0
    }

    fn to_bytes(self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = self.flags;
        out[1..5].copy_from_slice(&self.created.to_bytes());
        out[5..9].copy_from_slice(&self.updated.to_bytes());
        out
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            flags: b[0],
            created: DateTime::from_bytes(&b[1..5]),
            updated: DateTime::from_bytes(&b[5..9]),
        }
    }
}

/// Read the label for a drive, returning a default (`exists() == false`)
/// record if the hidden file is absent.
pub fn read_label(fs: &dyn DriveFS) -> DirLabel {
    match fs.read_file(DIRLABEL_FILENAME) {
        Some(bytes) if bytes.len() >= 9 => DirLabel::from_bytes(&bytes),
        _ => DirLabel::default(),
    }
}

/// Persist a label to the hidden file, setting the EXISTS bit.
pub fn write_label(fs: &mut dyn DriveFS, mut label: DirLabel) -> CpmResult<()> {
    label.flags |= DIRLABELFLAGS_EXISTS;
    fs.write_file(DIRLABEL_FILENAME, &label.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryDriveFS;

    #[test]
    fn test_missing_label_defaults() {
        let fs = MemoryDriveFS::new();
        let label = read_label(&fs);
        assert!(!label.exists());
    }

    #[test]
    fn test_roundtrip() {
        let mut fs = MemoryDriveFS::new();
        let label = DirLabel {
            flags: DIRLABELFLAGS_CREATE | DIRLABELFLAGS_UPDATE,
            created: DateTime::from_civil(2024, 1, 1, 0, 0, 0),
            updated: DateTime::from_civil(2024, 6, 1, 12, 0, 0),
        };
        write_label(&mut fs, label).unwrap();
        let back = read_label(&fs);
        assert!(back.exists());
        assert!(back.stamps_create());
        assert!(back.stamps_update());
        assert!(!back.stamps_access());
        assert_eq!(back.created.days_since_1978, label.created.days_since_1978);
    }
}
