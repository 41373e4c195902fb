//! System Control Block.
//!
//! CP/M-3 keeps its mutable OS state in a 256-byte block at a well-known
//! guest address (`addr::SCB_ADDR`) so transient programs can peek at it
//! directly. Guest code that pokes the block still needs to see consistent
//! values, but our own dispatch logic works against this explicit `Scb`
//! struct instead of re-deriving fields from fixed host offsets every call;
//! `sync_to_memory`/`sync_from_memory` are the only places that know about
//! the on-disk byte layout (offsets transcribed from `defs.h`).

use crate::bdos::addr;
use crate::datetime::DateTime;

/// 0xFF = return error to caller; 0xFE = return and display; anything else
/// means "display the error and terminate the running program".
pub const ERRORMODE_RETURN: u8 = 0xFF;
pub const ERRORMODE_RETURN_DISPLAY: u8 = 0xFE;

#[derive(Debug, Clone)]
pub struct Scb {
    pub bdos_version: u8,
    pub current_disk: u8,
    pub current_user: u8,
    pub ccp_disk: u8,
    pub ccp_user: u8,
    pub current_dma: u16,
    pub console_width: u8,
    pub console_page_length: u8,
    pub page_mode: u8,
    pub console_mode: u16,
    pub output_delimiter: u8,
    pub multisector_count: u8,
    pub error_mode: u8,
    /// Drive the last `doError` call was raised against (`SCB_ERRORDRIVE_B`).
    pub error_drive: u8,
    pub drive_search_chain: [u8; 4],
    pub date: DateTime,
    pub program_return_code: u16,
    pub top_of_user_tpa: u16,
    /// undocumented, always 0x07 in the original implementation
    pub unknown1: u8,
    /// last search FCB address (`SCB_SEARCHA_W`) and entry count (`SCB_DCNT_W`)
    pub search_fcb_addr: u16,
    pub search_entry_count: u16,
}

impl Default for Scb {
    fn default() -> Self {
        Self {
            bdos_version: 0x31, // CP/M 3.1
            current_disk: 0,
            current_user: 0,
            ccp_disk: 0,
            ccp_user: 0,
            current_dma: addr::PAGE0_DMA,
            console_width: 80,
            console_page_length: 24,
            page_mode: 0,
            console_mode: 0,
            output_delimiter: b'$',
            multisector_count: 1,
            // default-display-and-abort: any value below ERRORMODE_RETURN_DISPLAY
            error_mode: 0,
            error_drive: 0,
            drive_search_chain: [0, 0, 0, 0],
            date: DateTime::new(),
            program_return_code: 0,
            top_of_user_tpa: addr::BDOS_ENTRY,
            unknown1: 0x07,
            search_fcb_addr: 0,
            search_entry_count: 0,
        }
    }
}

impl Scb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the fields the guest is allowed to read directly into the SCB
    /// memory page, matching the offsets `isSupportedSCBField` recognizes.
    pub fn sync_to_memory(&self, mem: &mut [u8]) {
        let base = addr::SCB_ADDR as usize;
        let w = |mem: &mut [u8], off: i32, v: u16| {
            let idx = (base as i32 + off) as usize;
            mem[idx] = (v & 0xFF) as u8;
            mem[idx + 1] = (v >> 8) as u8;
        };
        let b = |mem: &mut [u8], off: i32, v: u8| {
            mem[(base as i32 + off) as usize] = v;
        };

        b(mem, -0x05, self.unknown1);
        b(mem, 0x05, self.bdos_version);
        w(mem, 0x10, self.program_return_code);
        b(mem, 0x13, self.ccp_disk);
        b(mem, 0x14, self.ccp_user);
        b(mem, 0x1A, self.console_width);
        b(mem, 0x1C, self.console_page_length);
        w(mem, 0x33, self.console_mode);
        b(mem, 0x37, self.output_delimiter);
        w(mem, 0x3C, self.current_dma);
        b(mem, 0x3E, self.current_disk);
        b(mem, 0x44, self.current_user);
        w(mem, 0x45, self.search_entry_count);
        w(mem, 0x47, self.search_fcb_addr);
        b(mem, 0x4A, self.multisector_count);
        b(mem, 0x4B, self.error_mode);
        b(mem, 0x51, self.error_drive);
        b(mem, 0x4C, self.drive_search_chain[0]);
        b(mem, 0x4D, self.drive_search_chain[1]);
        b(mem, 0x4E, self.drive_search_chain[2]);
        b(mem, 0x4F, self.drive_search_chain[3]);
        w(mem, 0x58, self.date.days_since_1978);
        b(mem, 0x5A, self.date.hour_bcd);
        b(mem, 0x5B, self.date.minutes_bcd);
        b(mem, 0x5C, self.date.seconds_bcd);
        w(mem, 0x62, self.top_of_user_tpa);
        b(mem, 0x2C, self.page_mode);
        w(mem, 0x3A, addr::SCB_ADDR);
    }

    /// Read back the fields a transient program may have poked directly
    /// (current drive/user, DMA address, error mode, console mode, ...).
    pub fn sync_from_memory(&mut self, mem: &[u8]) {
        let base = addr::SCB_ADDR as usize;
        let w = |mem: &[u8], off: i32| -> u16 {
            let idx = (base as i32 + off) as usize;
            u16::from_le_bytes([mem[idx], mem[idx + 1]])
        };
        let b = |mem: &[u8], off: i32| -> u8 { mem[(base as i32 + off) as usize] };

        self.current_disk = b(mem, 0x3E);
        self.current_user = b(mem, 0x44);
        self.current_dma = w(mem, 0x3C);
        self.error_mode = b(mem, 0x4B);
        self.error_drive = b(mem, 0x51);
        self.multisector_count = b(mem, 0x4A).max(1);
        self.console_mode = w(mem, 0x33);
        self.page_mode = b(mem, 0x2C);
        self.output_delimiter = b(mem, 0x37);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_roundtrip() {
        let mut mem = vec![0u8; 65536];
        let mut scb = Scb::new();
        scb.current_disk = 3;
        scb.current_user = 7;
        scb.current_dma = 0x1234;
        scb.sync_to_memory(&mut mem);

        let mut scb2 = Scb::new();
        scb2.sync_from_memory(&mem);
        assert_eq!(scb2.current_disk, 3);
        assert_eq!(scb2.current_user, 7);
        assert_eq!(scb2.current_dma, 0x1234);
    }
}
