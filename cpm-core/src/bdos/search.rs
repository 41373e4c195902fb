//! File search engine backing BDOS functions 17/18 (search first/next).
//!
//! Supersedes the teacher's single-extent linear scan: this walks the
//! drive's file list once per `search_first`, matching each 8.3 name
//! against the (possibly wildcarded) pattern, and synthesizes one 32-byte
//! directory entry per extent a file would occupy (files larger than one
//! extent — 16 KiB at 8 records/extent, 128 bytes/record — get one
//! synthesized entry per extent). Unused directory-entry slots in the
//! 128-byte DMA buffer are filled with `0xE5`, matching CP/M's "deleted/
//! free" marker so programs that scan raw DMA bytes see the expected
//! sentinel.

use crate::bdos::fcb::DIRECTORY_EXT;
use crate::fs::DriveFS;

/// Bytes per synthesized directory entry.
pub const DIR_ENTRY_SIZE: usize = 32;
/// Directory entries per DMA buffer (128 bytes / 32).
pub const ENTRIES_PER_DMA: usize = 4;
/// Records per extent (8 x 128-byte records = 1 extent of file data).
const RECORDS_PER_EXTENT: u32 = 128;
/// Bytes per logical record.
const RECORD_SIZE: u32 = 128;

/// One pending directory entry to emit: a file name/extension plus which
/// extent index of that file this entry represents.
#[derive(Debug, Clone)]
struct PendingEntry {
    name: [u8; 8],
    ext: [u8; 3],
    extent: u8,
    record_count: u8,
    is_directory: bool,
}

/// Search cursor, created by `search_first` and advanced by `search_next`.
#[derive(Default)]
pub struct SearchState {
    drive: u8,
    user: u8,
    pending: Vec<PendingEntry>,
    cursor: usize,
}

fn name_ext_from_8_3(name8_3: &str) -> ([u8; 8], [u8; 3], bool) {
    let is_dir = name8_3.ends_with(DIRECTORY_EXT);
    let base = if is_dir {
        name8_3.trim_end_matches(DIRECTORY_EXT).trim_end_matches('.')
    } else {
        name8_3
    };
    let (n, e) = match base.rfind('.') {
        Some(pos) => (&base[..pos], &base[pos + 1..]),
        None => (base, ""),
    };
    let mut name = [b' '; 8];
    let mut ext = [b' '; 3];
    for (i, b) in n.bytes().take(8).enumerate() {
        name[i] = b;
    }
    for (i, b) in e.bytes().take(3).enumerate() {
        ext[i] = b;
    }
    (name, ext, is_dir)
}

fn matches(name: &[u8; 8], ext: &[u8; 3], pat_name: &[u8; 8], pat_ext: &[u8; 3]) -> bool {
    for i in 0..8 {
        if pat_name[i] != b'?' && pat_name[i] != name[i] {
            return false;
        }
    }
    for i in 0..3 {
        if pat_ext[i] != b'?' && pat_ext[i] != ext[i] {
            return false;
        }
    }
    true
}

impl SearchState {
    /// Begin a new search: `get_all_files` corresponds to a `?` drive byte
    /// in the pattern FCB (match every user number); `file_size_bytes` maps
    /// file names to their size so multi-extent files synthesize one entry
    /// per extent.
    pub fn search_first(
        fs: &dyn DriveFS,
        drive: u8,
        user: u8,
        pat_name: [u8; 8],
        pat_ext: [u8; 3],
    ) -> Self {
        let mut pending = Vec::new();
        for file in fs.list_files() {
            let (name, ext, is_dir) = name_ext_from_8_3(&file);
            if !matches(&name, &ext, &pat_name, &pat_ext) {
                continue;
            }
            let size = fs.read_file(&file).map(|d| d.len() as u32).unwrap_or(0);
            let total_records = size.div_ceil(RECORD_SIZE);
            let extents = total_records.div_ceil(RECORDS_PER_EXTENT).max(1);
            for ext_idx in 0..extents {
                let records_in_extent = if ext_idx + 1 == extents {
                    let rem = total_records - ext_idx * RECORDS_PER_EXTENT;
                    if rem == 0 {
                        RECORDS_PER_EXTENT as u8
                    } else {
                        rem as u8
                    }
                } else {
                    RECORDS_PER_EXTENT as u8
                };
                pending.push(PendingEntry {
                    name,
                    ext,
                    extent: ext_idx as u8,
                    record_count: records_in_extent,
                    is_directory: is_dir,
                });
            }
        }
        Self {
            drive,
            user,
            pending,
            cursor: 0,
        }
    }

    /// Emit the next matching directory entry into a 32-byte slot, or
    /// `None` once exhausted ("no more files", BDOS returns 0xFF in A).
    pub fn next(&mut self) -> Option<[u8; DIR_ENTRY_SIZE]> {
        let entry = self.pending.get(self.cursor)?;
        let mut out = [0xE5u8; DIR_ENTRY_SIZE];
        out[0] = self.user;
        out[1..9].copy_from_slice(&entry.name);
        out[9..12].copy_from_slice(&entry.ext);
        out[12] = entry.extent;
        out[13] = 0;
        out[14] = 0;
        out[15] = entry.record_count;
        let is_dir = entry.is_directory;
        self.cursor += 1;
        if is_dir {
            // directories carry no allocation map; leave d0..d15 zeroed
            for b in &mut out[16..32] {
                *b = 0;
            }
        }
        Some(out)
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn remaining(&self) -> usize {
        self.pending.len().saturating_sub(self.cursor)
    }
}

/// Pack up to `ENTRIES_PER_DMA` search results into a 128-byte DMA buffer,
/// returning the slot index of the last entry written (the value BDOS
/// returns in register A), or `0xFF` if nothing matched.
pub fn fill_dma(state: &mut SearchState, dma: &mut [u8; 128]) -> u8 {
    dma.fill(0xE5);
    let mut last_slot = 0xFFu8;
    for slot in 0..ENTRIES_PER_DMA {
        match state.next() {
            Some(entry) => {
                dma[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE].copy_from_slice(&entry);
                last_slot = slot as u8;
            }
            None => break,
        }
    }
    last_slot
}

/// Normalize a wildcarded name/ext pair (as parsed by `fcb::parse_filename_str`)
/// into the fixed 8/3 byte arrays the search engine matches against.
pub fn pattern_bytes(name: &str, ext: &str) -> ([u8; 8], [u8; 3]) {
    let mut n = [b' '; 8];
    let mut e = [b' '; 3];
    for (i, b) in name.bytes().take(8).enumerate() {
        n[i] = b;
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        e[i] = b;
    }
    (n, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryDriveFS;

    #[test]
    fn test_search_exact() {
        let mut fs = MemoryDriveFS::new();
        fs.add_file_str("HELLO.TXT", "hi");
        let (n, e) = pattern_bytes("HELLO   ", "TXT");
        let mut state = SearchState::search_first(&fs, 1, 0, n, e);
        let mut dma = [0u8; 128];
        let last = fill_dma(&mut state, &mut dma);
        assert_eq!(last, 0);
        assert_eq!(&dma[1..9], b"HELLO   ");
    }

    #[test]
    fn test_search_wildcard() {
        let mut fs = MemoryDriveFS::new();
        fs.add_file_str("A.TXT", "1");
        fs.add_file_str("B.TXT", "2");
        let (n, e) = pattern_bytes("????????", "TXT");
        let mut state = SearchState::search_first(&fs, 1, 0, n, e);
        let mut found = 0;
        let mut dma = [0u8; 128];
        loop {
            if fill_dma(&mut state, &mut dma) == 0xFF {
                break;
            }
            found += 1;
        }
        assert_eq!(found, 2);
    }

    #[test]
    fn test_no_match_returns_ff() {
        let fs = MemoryDriveFS::new();
        let (n, e) = pattern_bytes("NOPE    ", "TXT");
        let mut state = SearchState::search_first(&fs, 1, 0, n, e);
        let mut dma = [0u8; 128];
        assert_eq!(fill_dma(&mut state, &mut dma), 0xFF);
    }
}
