//! Resident System Extension (RSX) chain.
//!
//! RSXs are relocatable overlays loaded between Page 0 and BDOS. The
//! original implementation links them through an in-memory prefix block
//! (serial/start/next/prev/remove/name) living at the front of each loaded
//! module; we instead keep an arena of fixed-size records addressed by
//! index, so the chain can be walked and mutated without raw back-pointers
//! into guest memory.

/// One installed RSX module.
#[derive(Debug, Clone)]
pub struct RsxRecord {
    pub serial: u16,
    pub name: [u8; 8],
    pub start_addr: u16,
    pub code_len: u16,
    pub non_bank: bool,
    pub removable: bool,
}

impl RsxRecord {
    pub fn name_str(&self) -> String {
        self.name
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .take_while(|&c| c != ' ' && c != '\0')
            .collect()
    }
}

/// Arena-backed chain of installed RSXs, ordered closest-to-BDOS first
/// (matching the original's next/prev linked list walking order).
#[derive(Default)]
pub struct RsxChain {
    records: Vec<Option<RsxRecord>>,
    next_serial: u16,
}

impl RsxChain {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_serial: 1,
        }
    }

    /// Install a new RSX at the head of the chain, returning its index.
    pub fn install(&mut self, name: [u8; 8], start_addr: u16, code_len: u16, non_bank: bool, removable: bool) -> usize {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        let record = RsxRecord {
            serial,
            name,
            start_addr,
            code_len,
            non_bank,
            removable,
        };
        if let Some(idx) = self.records.iter().position(|r| r.is_none()) {
            self.records[idx] = Some(record);
            idx
        } else {
            self.records.push(Some(record));
            self.records.len() - 1
        }
    }

    /// Remove an RSX and everything installed after it (matches CP/M-3
    /// semantics: removing an RSX unloads it and any RSX loaded on top).
    pub fn remove_from(&mut self, idx: usize) {
        for i in idx..self.records.len() {
            self.records[i] = None;
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| {
            r.as_ref()
                .map(|r| r.name_str().eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    pub fn get(&self, idx: usize) -> Option<&RsxRecord> {
        self.records.get(idx).and_then(|r| r.as_ref())
    }

    /// Installed RSXs in chain order (index 0 = closest to BDOS).
    pub fn iter(&self) -> impl Iterator<Item = &RsxRecord> {
        self.records.iter().filter_map(|r| r.as_ref())
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Lowest TPA-side address still free, i.e. the start address of the
    /// RSX closest to the TPA, or the BDOS entry if none are installed.
    pub fn lowest_occupied_addr(&self, bdos_addr: u16) -> u16 {
        self.iter().map(|r| r.start_addr).min().unwrap_or(bdos_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_find() {
        let mut chain = RsxChain::new();
        let name = *b"MYRSX   ";
        let idx = chain.install(name, 0xE000, 0x100, false, true);
        assert_eq!(chain.count(), 1);
        assert_eq!(chain.find_by_name("MYRSX"), Some(idx));
    }

    #[test]
    fn test_remove_cascades() {
        let mut chain = RsxChain::new();
        chain.install(*b"FIRST   ", 0xE000, 0x100, false, true);
        chain.install(*b"SECOND  ", 0xE100, 0x100, false, true);
        assert_eq!(chain.count(), 2);
        chain.remove_from(0);
        assert_eq!(chain.count(), 0);
    }

    #[test]
    fn test_lowest_occupied() {
        let mut chain = RsxChain::new();
        chain.install(*b"A       ", 0xE000, 0x100, false, true);
        chain.install(*b"B       ", 0xD800, 0x100, false, true);
        assert_eq!(chain.lowest_occupied_addr(0xFE00), 0xD800);
    }
}
