//! BDOS (Basic Disk Operating System) — the CP/M-3 syscall surface.
//!
//! Supersedes the teacher's CP/M-2.2 `BdosFunction`/dispatch pair (37
//! numbers, no SCB) with the CP/M-3 function superset, an explicit `Scb`
//! context, a fixed-capacity open-file cache, the full search-first/
//! search-next state machine and an RSX chain. Addresses are computed the
//! same way `defs.h` computes them (from `SYSTEM_ADDR` down), so guest code
//! that inspects Page 0 / BDOS / BIOS / SCB addresses sees the same layout
//! the original firmware exposed.

pub mod cache;
pub mod dirlabel;
pub mod fcb;
pub mod rsx;
pub mod search;

pub use fcb::Fcb;

use std::path::PathBuf;

use crate::error::CpmError;
use crate::fs::DriveFS;
use crate::scb::{Scb, ERRORMODE_RETURN_DISPLAY};
use cache::FileCache;
use fcb::{parse_filename_str, FCB_SIZE};
use rsx::RsxChain;
use search::SearchState;

/// Bytes per logical CP/M record.
pub const RECORD_SIZE: usize = 128;

/// Guest memory-layout constants, computed the same way `defs.h` computes
/// them from `SYSTEM_ADDR` downward.
pub mod addr {
    pub const SYSTEM_ADDR: u16 = 0xFCFA;
    pub const BDOS_ENTRY: u16 = 0xFD00;
    pub const BDOS_SIZE: u16 = 1;
    pub const BIOS_ENTRY: u16 = BDOS_ENTRY + BDOS_SIZE;
    pub const BIOS_SIZE: u16 = 33 * 3;
    pub const BIOS_RETS: u16 = 0xFD64;
    pub const BIOS_RETS_SIZE: u16 = 33;
    pub const DPB_ADDR: u16 = 0xFD88;
    pub const DPB_SIZE: u16 = 17;
    pub const DPH_ADDR: u16 = 0xFD9C;
    pub const DPH_SIZE: u16 = 25;
    pub const SCB_PAGEADDR: u16 = 0xFE00;
    pub const SCB_ADDR: u16 = 0xFE9C;
    pub const SCB_SIZE: u16 = 256;
    pub const BDOS_BUFADDR: u16 = 0xFF00;
    pub const BDOS_BUFLEN: u16 = 128;
    pub const CHRTBL_ADDR: u16 = 0xFF80;
    pub const CHRTBL_DEVICES: u16 = 5;
    pub const CHRTBL_SIZE: u16 = CHRTBL_DEVICES * 8;
    pub const STACK_ADDR: u16 = SYSTEM_ADDR;

    pub const PAGE0_WSTART: u16 = 0x0000;
    pub const PAGE0_WSTARTADDR: u16 = 0x0001;
    pub const PAGE0_IOBYTE: u16 = 0x0003;
    pub const PAGE0_CURDRVUSR: u16 = 0x0004;
    pub const PAGE0_BDOS: u16 = 0x0005;
    pub const PAGE0_OSBASE: u16 = 0x0006;
    pub const PAGE0_IRQ: u16 = 0x0008;
    pub const PAGE0_LOADDRIVE: u16 = 0x0050;
    pub const PAGE0_FCB1PASSADDR_W: u16 = 0x0051;
    pub const PAGE0_FCB1PASSLEN: u16 = 0x0053;
    pub const PAGE0_FCB2PASSADDR_W: u16 = 0x0054;
    pub const PAGE0_FCB2PASSLEN: u16 = 0x0056;
    pub const PAGE0_FCB1: u16 = 0x005C;
    pub const PAGE0_FCB2: u16 = 0x006C;
    pub const PAGE0_DMA: u16 = 0x0080;

    pub const TPA_ADDR: u16 = 0x0100;
}

/// CP/M-3 BDOS function numbers (spec §4.3): 0-50, 59, 60, 98-102, 152, plus
/// the two vendor extensions 0xD4 (212, copy file) and 0xD5 (213, change
/// current directory). Numbers without a documented public meaning (e.g.
/// 103-111, the date/time and console-mode functions) fall through to
/// `Reserved` and are treated as successful no-ops, the same stance CP/M
/// itself takes toward undefined function numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdosFunction {
    SystemReset,
    ConsoleInput,
    ConsoleOutput,
    ReaderInput,
    PunchOutput,
    ListOutput,
    DirectConsoleIo,
    GetIoByte,
    SetIoByte,
    PrintString,
    ReadConsoleBuffer,
    ConsoleStatus,
    ReturnVersion,
    ResetDiskSystem,
    SelectDisk,
    OpenFile,
    CloseFile,
    SearchFirst,
    SearchNext,
    DeleteFile,
    ReadSequential,
    WriteSequential,
    MakeFile,
    RenameFile,
    ReturnLoginVector,
    ReturnCurrentDisk,
    SetDmaAddress,
    GetAllocationVector,
    WriteProtectDisk,
    GetReadOnlyVector,
    SetFileAttributes,
    GetDiskParameters,
    UserCode,
    ReadRandom,
    WriteRandom,
    ComputeFileSize,
    SetRandomRecord,
    ResetDrive,
    WriteRandomZeroFill,
    TestAndWriteRecord,
    LockRecord,
    UnlockRecord,
    SetMultiSectorCount,
    SetErrorMode,
    GetDiskFreeSpace,
    ChainToProgram,
    FlushBuffers,
    GetSetSystemControlBlock,
    DirectBiosCall,
    LoadOverlay,
    CallResidentSystemExtension,
    FreeBlocks,
    TruncateFile,
    SetDirectoryLabel,
    GetDirectoryLabelData,
    ReadFileDateStamps,
    ParseFilename,
    VendorCopyFile,
    ChangeCurrentDirectory,
    Reserved(u8),
}

impl From<u8> for BdosFunction {
    fn from(v: u8) -> Self {
        use BdosFunction::*;
        match v {
            0 => SystemReset,
            1 => ConsoleInput,
            2 => ConsoleOutput,
            3 => ReaderInput,
            4 => PunchOutput,
            5 => ListOutput,
            6 => DirectConsoleIo,
            7 => GetIoByte,
            8 => SetIoByte,
            9 => PrintString,
            10 => ReadConsoleBuffer,
            11 => ConsoleStatus,
            12 => ReturnVersion,
            13 => ResetDiskSystem,
            14 => SelectDisk,
            15 => OpenFile,
            16 => CloseFile,
            17 => SearchFirst,
            18 => SearchNext,
            19 => DeleteFile,
            20 => ReadSequential,
            21 => WriteSequential,
            22 => MakeFile,
            23 => RenameFile,
            24 => ReturnLoginVector,
            25 => ReturnCurrentDisk,
            26 => SetDmaAddress,
            27 => GetAllocationVector,
            28 => WriteProtectDisk,
            29 => GetReadOnlyVector,
            30 => SetFileAttributes,
            31 => GetDiskParameters,
            32 => UserCode,
            33 => ReadRandom,
            34 => WriteRandom,
            35 => ComputeFileSize,
            36 => SetRandomRecord,
            37 => ResetDrive,
            40 => WriteRandomZeroFill,
            41 => TestAndWriteRecord,
            42 => LockRecord,
            43 => UnlockRecord,
            44 => SetMultiSectorCount,
            45 => SetErrorMode,
            46 => GetDiskFreeSpace,
            47 => ChainToProgram,
            48 => FlushBuffers,
            49 => GetSetSystemControlBlock,
            50 => DirectBiosCall,
            59 => LoadOverlay,
            60 => CallResidentSystemExtension,
            98 => FreeBlocks,
            99 => TruncateFile,
            100 => SetDirectoryLabel,
            101 => GetDirectoryLabelData,
            102 => ReadFileDateStamps,
            152 => ParseFilename,
            212 => VendorCopyFile,
            213 => ChangeCurrentDirectory,
            other => Reserved(other),
        }
    }
}

/// Outcome of a BDOS dispatch: the A-register result, the HL pair for calls
/// that return one, an explicit H/B override for calls whose H byte carries
/// something other than HL's high byte (multisector short-transfer counts,
/// `doError`'s code), and the console message / abort signal `doError`
/// raises in modes that display or stop on error.
#[derive(Debug, Clone, Default)]
pub struct BdosResult {
    pub a: u8,
    pub hl: u16,
    pub h: Option<u8>,
    pub message: Option<String>,
    pub stop: bool,
}

impl BdosResult {
    fn ok(a: u8) -> Self {
        Self { a, ..Default::default() }
    }

    /// A result with an explicit H/B register, bypassing `doError`'s
    /// error-mode handling entirely. This is how the original reports
    /// "non-fatal" outcomes (file not found, EOF, short transfer): always
    /// just a register value, regardless of `SCB_ERRORMODE_B`.
    fn with_h(a: u8, h: u8) -> Self {
        Self { a, hl: (a as u16) | ((h as u16) << 8), h: Some(h), ..Default::default() }
    }
}

/// BDOS state shared across the functions of a single session: the SCB,
/// open-file cache, RSX chain, mounted drives and the in-flight directory
/// search cursor.
pub struct Bdos {
    pub scb: Scb,
    pub cache: FileCache,
    pub rsx: RsxChain,
    pub drives: [Option<Box<dyn DriveFS>>; 16],
    search: Option<SearchState>,
    pub trace: bool,
    /// Current directory per drive, relative to that drive's mount root
    /// (e.g. "BIN/TOOLS"), empty string for the root. Host-filesystem
    /// extension, grounded in `BDOS::createAbsolutePath`/`getCurrentDir`.
    current_dir: [String; 16],
}

impl Bdos {
    pub fn new() -> Self {
        Self {
            scb: Scb::new(),
            cache: FileCache::new(),
            rsx: RsxChain::new(),
            drives: std::array::from_fn(|_| None),
            search: None,
            trace: false,
            current_dir: std::array::from_fn(|_| String::new()),
        }
    }

    /// Current directory of the currently-selected drive, as stored
    /// relative to the drive root ("" = root).
    pub fn current_dir(&self) -> &str {
        &self.current_dir[self.scb.current_disk as usize]
    }

    /// Change the current drive's directory, resolving `path` (which may be
    /// relative or start with `/` for an absolute drive-root path, and may
    /// contain `..` segments) against the current directory. The flat
    /// `DriveFS` namespace has no real directory objects to stat, so any
    /// syntactically valid path is accepted, matching how the root system
    /// treats directories as a naming convention over file paths.
    pub fn change_directory(&mut self, path: &str) -> Result<(), CpmError> {
        let drive = self.scb.current_disk;
        self.drive_fs(drive)?;
        let resolved = create_absolute_path(path, self.current_dir());
        self.current_dir[drive as usize] = resolved;
        Ok(())
    }

    /// Write every modified cached file back to its drive and drop the
    /// cache. Called on warm boot and CPU halt, mirroring the original's
    /// practice of closing all open files before handing control back to
    /// the CCP.
    pub fn flush(&mut self) {
        let pending: Vec<(u8, [u8; 11], Vec<u8>)> = self
            .cache
            .iter_mut()
            .filter(|(_, f)| f.modified)
            .map(|(_, f)| (f.drive, f.name11, f.data.clone()))
            .collect();
        for (drive, name11, data) in pending {
            if let Ok(fs) = self.drive_fs_mut(drive) {
                let filename = name11_to_filename(&name11);
                let _ = fs.write_file(&filename, &data);
            }
        }
        self.cache = FileCache::new();
    }

    pub fn mount(&mut self, drive: u8, fs: Box<dyn DriveFS>) {
        if (drive as usize) < 16 {
            self.drives[drive as usize] = Some(fs);
        }
    }

    pub fn unmount(&mut self, drive: u8) {
        if (drive as usize) < 16 {
            self.drives[drive as usize] = None;
        }
    }

    pub fn drive_letter(drive: u8) -> char {
        (b'A' + drive) as char
    }

    fn effective_drive(&self, fcb_drive: u8) -> u8 {
        if fcb_drive == 0 {
            self.scb.current_disk
        } else {
            fcb_drive - 1
        }
    }

    fn drive_fs(&self, drive: u8) -> Result<&dyn DriveFS, CpmError> {
        self.drives
            .get(drive as usize)
            .and_then(|d| d.as_deref())
            .ok_or_else(|| CpmError::DriveNotMounted(Self::drive_letter(drive)))
    }

    fn drive_fs_mut(&mut self, drive: u8) -> Result<&mut (dyn DriveFS + 'static), CpmError> {
        match self.drives.get_mut(drive as usize) {
            Some(Some(fs)) => Ok(fs.as_mut()),
            _ => Err(CpmError::DriveNotMounted(Self::drive_letter(drive))),
        }
    }

    /// `doError`: record the failing drive, then apply the current error
    /// mode. Default mode stops the CPU and sets the 0xFFFD program return
    /// code; default and display-return modes both send `message` to the
    /// console; return-only mode (`SCB_ERRORMODE_B == 0xFF`) does neither and
    /// just hands `a`/`h` back to the caller.
    fn do_error(&mut self, a: u8, h: u8, message: &str) -> BdosResult {
        self.scb.error_drive = self.scb.current_disk;
        let mut result = BdosResult {
            a,
            hl: (a as u16) | ((h as u16) << 8),
            h: Some(h),
            ..Default::default()
        };
        let default_mode = self.scb.error_mode < ERRORMODE_RETURN_DISPLAY;
        if default_mode {
            self.scb.program_return_code = 0xFFFD;
            result.stop = true;
        }
        if default_mode || self.scb.error_mode == ERRORMODE_RETURN_DISPLAY {
            result.message = Some(format!("{}\r\n", message));
        }
        result
    }

    /// Dispatch one BDOS call. `mem` is the guest's 64 KiB address space
    /// (already paged in by the HAL); `func` and `de` are register C and DE
    /// at the point of the `CALL BDOS`.
    pub fn dispatch(&mut self, func: u8, de: u16, mem: &mut [u8]) -> BdosResult {
        use BdosFunction::*;
        let function = BdosFunction::from(func);
        if self.trace {
            eprintln!("[bdos] C={:02X} ({:?}) DE={:04X}", func, function, de);
        }
        match function {
            SystemReset => BdosResult::ok(0),
            ReturnVersion => BdosResult { a: 0x31, hl: 0x0031, ..Default::default() },
            ResetDiskSystem => {
                self.scb.current_disk = 0;
                self.scb.current_dma = addr::PAGE0_DMA;
                BdosResult::ok(0)
            }
            SelectDisk => {
                let drive = de as u8;
                if self.drives.get(drive as usize).map(|d| d.is_some()).unwrap_or(false) {
                    self.scb.current_disk = drive;
                    BdosResult::ok(0)
                } else {
                    self.do_error(0x04, 0x04, "CP/M Invalid Drive")
                }
            }
            ReturnCurrentDisk => BdosResult::ok(self.scb.current_disk),
            SetDmaAddress => {
                self.scb.current_dma = de;
                BdosResult::ok(0)
            }
            UserCode => {
                if de == 0xFF {
                    BdosResult::ok(self.scb.current_user)
                } else {
                    self.scb.current_user = (de & 0x1F) as u8;
                    BdosResult::ok(0)
                }
            }
            ReturnLoginVector => {
                let mut vec = 0u16;
                for (i, d) in self.drives.iter().enumerate() {
                    if d.is_some() {
                        vec |= 1 << i;
                    }
                }
                BdosResult { a: (vec & 0xFF) as u8, hl: vec, ..Default::default() }
            }
            OpenFile => self.open_file(de, mem),
            CloseFile => self.close_file(de, mem),
            SearchFirst => self.search_first(de, mem),
            SearchNext => self.search_next(mem),
            DeleteFile => self.delete_file(de, mem),
            ReadSequential => self.read_sequential(de, mem),
            WriteSequential => self.write_sequential(de, mem),
            MakeFile => self.make_file(de, mem),
            RenameFile => self.rename_file(de, mem),
            ReadRandom => self.read_random(de, mem),
            WriteRandom | WriteRandomZeroFill => self.write_random(de, mem),
            ComputeFileSize => self.compute_file_size(de, mem),
            SetRandomRecord => self.set_random_record(de, mem),
            TestAndWriteRecord => self.write_random(de, mem),
            LockRecord | UnlockRecord => BdosResult::ok(0),
            SetMultiSectorCount => {
                let count = (de & 0xFF) as u8;
                self.scb.multisector_count = count;
                if (1..=128).contains(&count) {
                    BdosResult::ok(0)
                } else {
                    BdosResult::ok(0xFF)
                }
            }
            SetErrorMode => {
                self.scb.error_mode = (de & 0xFF) as u8;
                BdosResult::ok(0)
            }
            GetDiskFreeSpace => self.get_disk_free_space(mem),
            // Real register/SCB manipulation happens in the session's main
            // loop, which owns the DMA-buffer command string and the CPU
            // halt signal; `dispatch` only sees this call when the session
            // doesn't intercept it first (e.g. a unit test driving `Bdos`
            // directly), so it degrades to a harmless success code.
            ChainToProgram => BdosResult::ok(0),
            FlushBuffers => {
                self.flush();
                BdosResult::ok(0)
            }
            GetSetSystemControlBlock => self.get_set_scb(de, mem),
            // Like `ChainToProgram`, the real BIOS dispatch this needs lives
            // one layer up (in the session's emulator loop, which owns the
            // `Bios`/console); direct `Bdos::dispatch` callers get a no-op.
            DirectBiosCall => BdosResult::ok(0),
            LoadOverlay => self.load_overlay(de, mem),
            CallResidentSystemExtension => BdosResult::ok(0xFF),
            FreeBlocks => BdosResult::ok(0),
            TruncateFile => self.truncate_file(de, mem),
            SetDirectoryLabel => self.set_directory_label(de, mem),
            GetDirectoryLabelData => self.get_directory_label(de, mem),
            ReadFileDateStamps => self.read_file_date_stamps(de, mem),
            ParseFilename => self.parse_filename_call(de, mem),
            VendorCopyFile => self.copy_file(de, mem),
            ChangeCurrentDirectory => self.change_current_directory(de, mem),
            // Console and list-device functions (1-9, 11) are routed by the
            // BIOS/session console, which owns the terminal; reaching this
            // dispatcher for one of them means a caller invoked BDOS
            // directly, which CP/M treats as a harmless no-op.
            _ => BdosResult::ok(0),
        }
    }

    fn fcb_addr_range(addr: u16) -> std::ops::Range<usize> {
        addr as usize..addr as usize + FCB_SIZE
    }

    fn fcb11(mem: &[u8], addr: u16) -> [u8; 11] {
        let mut out = [0u8; 11];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = mem[addr as usize + 1 + i] & 0x7F;
        }
        out
    }

    fn open_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename) = {
            let fcb = Fcb::new(&mut mem[range.clone()]);
            (self.effective_drive(fcb.drive()), fcb.filename())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let data = self.drive_fs(drive).ok().and_then(|fs| fs.read_file(&filename));
        match data {
            Some(bytes) => {
                let size = bytes.len() as u32;
                let slot = self.cache.insert(drive, name11, bytes);
                let mut fcb = Fcb::new(&mut mem[range]);
                fcb.init();
                fcb.set_fd(slot as u32);
                let records = size.div_ceil(RECORD_SIZE as u32).min(128);
                fcb.set_rc(records as u8);
                BdosResult::ok(0)
            }
            None => BdosResult::with_h(0xFF, 0x00),
        }
    }

    fn close_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, fd) = {
            let fcb = Fcb::new(&mut mem[range.clone()]);
            (self.effective_drive(fcb.drive()), fcb.fd())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let Some(slot) = fd else { return BdosResult::with_h(0xFF, 0x00) };
        let Some(cached) = self.cache.get(slot as usize, drive, &name11) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        if cached.modified {
            let data = cached.data.clone();
            let filename = Fcb::new(&mut mem[range.clone()]).filename();
            if let Ok(fs) = self.drive_fs_mut(drive) {
                let _ = fs.write_file(&filename, &data);
            }
        }
        self.cache.remove(slot as usize);
        Fcb::new(&mut mem[range]).clear_fd();
        BdosResult::ok(0)
    }

    fn search_first(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, pn, pe) = {
            let fcb = Fcb::new(&mut mem[range]);
            let mut pn = [0u8; 8];
            pn.copy_from_slice(fcb.raw_name());
            let mut pe = [0u8; 3];
            pe.copy_from_slice(fcb.raw_ext());
            (self.effective_drive(fcb.drive()), pn, pe)
        };
        let Ok(fs) = self.drive_fs(drive) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let mut state = SearchState::search_first(fs, drive, self.scb.current_user, pn, pe);
        let dma_addr = self.scb.current_dma as usize;
        let mut dma = [0u8; 128];
        let last = search::fill_dma(&mut state, &mut dma);
        mem[dma_addr..dma_addr + 128].copy_from_slice(&dma);
        self.search = Some(state);
        BdosResult::ok(last)
    }

    fn search_next(&mut self, mem: &mut [u8]) -> BdosResult {
        let Some(state) = self.search.as_mut() else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let dma_addr = self.scb.current_dma as usize;
        let mut dma = [0u8; 128];
        let last = search::fill_dma(state, &mut dma);
        mem[dma_addr..dma_addr + 128].copy_from_slice(&dma);
        BdosResult::ok(last)
    }

    fn delete_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, pat_name, pat_ext) = {
            let fcb = Fcb::new(&mut mem[range]);
            let mut pn = [0u8; 8];
            pn.copy_from_slice(fcb.raw_name());
            let mut pe = [0u8; 3];
            pe.copy_from_slice(fcb.raw_ext());
            (self.effective_drive(fcb.drive()), pn, pe)
        };
        let Ok(fs) = self.drive_fs(drive) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let matching: Vec<String> = fs
            .list_files()
            .into_iter()
            .filter(|f| {
                let mut fcbmem = [0u8; FCB_SIZE];
                let mut tmp = Fcb::new(&mut fcbmem);
                tmp.parse_filename(f);
                tmp.matches_pattern(&pat_name, &pat_ext)
            })
            .collect();
        if matching.is_empty() {
            return BdosResult::with_h(0xFF, 0x00);
        }
        if let Ok(fs) = self.drive_fs_mut(drive) {
            for f in &matching {
                fs.delete_file(f);
            }
        }
        BdosResult::ok(0)
    }

    /// Sequential read (func 20), honoring `SCB_MULTISECTORCOUNT_B`: a short
    /// transfer (fewer records available than requested) reports `A=0x01,
    /// H=B=<records actually transferred>` directly, the same as the
    /// reference `BDOS_readSequential` — this bypasses `doError` entirely,
    /// matching the "non-fatal" EOF/short-read outcome it reports.
    fn read_sequential(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, record, fd) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.current_record(), fcb.fd())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let dma_addr = self.scb.current_dma as usize;
        let rec_count = self.scb.multisector_count.max(1) as usize;
        let Some(slot) = fd else { return BdosResult::with_h(0xFF, 0x00) };
        let Some(cached) = self.cache.get(slot as usize, drive, &name11) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let offset = Fcb::record_to_bytes(record) as usize;
        let bytes_wanted = rec_count * RECORD_SIZE;
        if offset >= cached.data.len() {
            return BdosResult::with_h(0x01, 0);
        }
        let bytes_read = (cached.data.len() - offset).min(bytes_wanted);
        let mut buf = vec![0x1Au8; bytes_wanted];
        buf[..bytes_read].copy_from_slice(&cached.data[offset..offset + bytes_read]);
        mem[dma_addr..dma_addr + bytes_wanted].copy_from_slice(&buf);
        let records_read = bytes_read.div_ceil(RECORD_SIZE) as u32;
        Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]).set_current_record(record + records_read);
        if (records_read as usize) < rec_count {
            BdosResult::with_h(0x01, records_read as u8)
        } else {
            BdosResult::ok(0)
        }
    }

    /// Sequential write (func 21), honoring `SCB_MULTISECTORCOUNT_B`. The
    /// in-memory open-file cache never fails a partial write, so unlike the
    /// reference's short-write path (`A=0x02`, disk-full), this always
    /// transfers every requested record.
    fn write_sequential(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, record, fd) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.current_record(), fcb.fd())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let dma_addr = self.scb.current_dma as usize;
        let rec_count = self.scb.multisector_count.max(1) as usize;
        let bytes_count = rec_count * RECORD_SIZE;
        let Some(slot) = fd else { return BdosResult::with_h(0xFF, 0x00) };
        let Some(cached) = self.cache.get_mut(slot as usize, drive, &name11) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let offset = Fcb::record_to_bytes(record) as usize;
        if cached.data.len() < offset + bytes_count {
            cached.data.resize(offset + bytes_count, 0);
        }
        cached.data[offset..offset + bytes_count].copy_from_slice(&mem[dma_addr..dma_addr + bytes_count]);
        cached.modified = true;
        Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]).set_current_record(record + rec_count as u32);
        BdosResult::ok(0)
    }

    fn make_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename, create_dir) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.filename(), fcb.create_directory_requested())
        };
        if create_dir {
            // subdirectories are represented as zero-length marker files
            // carrying the `[D]` extension in the flat DriveFS namespace.
            let marker = format!("{}{}", filename, fcb::DIRECTORY_EXT);
            return match self.drive_fs_mut(drive).and_then(|fs| fs.write_file(&marker, &[])) {
                Ok(()) => BdosResult::ok(0),
                Err(_) => self.do_error(0xFF, 0x01, "CP/M Error writing file, I/O Error"),
            };
        }
        let name11 = Self::fcb11(mem, fcb_addr);
        let Ok(fs) = self.drive_fs_mut(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        if fs.write_file(&filename, &[]).is_err() {
            return self.do_error(0xFF, 0x01, "CP/M Error writing file, I/O Error");
        }
        let slot = self.cache.insert(drive, name11, Vec::new());
        let mut fcb = Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]);
        fcb.init();
        fcb.set_fd(slot as u32);
        BdosResult::ok(0)
    }

    fn rename_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let drive;
        let old_name;
        {
            let fcb = Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]);
            drive = self.effective_drive(fcb.drive());
            old_name = fcb.filename();
        }
        // the new name occupies the second half of the 32-byte combined FCB
        // pair (bytes 16..27 of the rename FCB), the same layout CP/M uses
        let dst_addr = fcb_addr + 16;
        let new_name = Fcb::new(&mut mem[Self::fcb_addr_range(dst_addr)]).filename();
        let Ok(fs) = self.drive_fs_mut(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        match fs.read_file(&old_name) {
            Some(data) => {
                let _ = fs.write_file(&new_name, &data);
                fs.delete_file(&old_name);
                BdosResult::ok(0)
            }
            None => BdosResult::with_h(0xFF, 0x00),
        }
    }

    /// Random read (func 33), honoring `SCB_MULTISECTORCOUNT_B`. Unlike
    /// sequential read, the reference repositions the file back to `record`
    /// afterward rather than advancing it, and reports plain EOF (`A=0x01`,
    /// no record count) rather than the `H=B=<count>` short-transfer form.
    fn read_random(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, record, fd) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.random_record(), fcb.fd())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let dma_addr = self.scb.current_dma as usize;
        let rec_count = self.scb.multisector_count.max(1) as usize;
        let Some(slot) = fd else { return BdosResult::with_h(0xFF, 0x00) };
        let Some(cached) = self.cache.get(slot as usize, drive, &name11) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let offset = Fcb::record_to_bytes(record) as usize;
        let bytes_wanted = rec_count * RECORD_SIZE;
        if offset >= cached.data.len() {
            return BdosResult::with_h(0x01, 0x00); // seek past physical end
        }
        let bytes_read = (cached.data.len() - offset).min(bytes_wanted);
        let mut buf = vec![0x1Au8; bytes_wanted];
        buf[..bytes_read].copy_from_slice(&cached.data[offset..offset + bytes_read]);
        mem[dma_addr..dma_addr + bytes_wanted].copy_from_slice(&buf);
        Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]).set_current_record(record);
        BdosResult::ok(0)
    }

    /// Random write (func 34), honoring `SCB_MULTISECTORCOUNT_B`. Always
    /// repositions back to `record`, and — like `write_sequential` — the
    /// cache-backed store never reports a short write.
    fn write_random(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, record, fd) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.random_record(), fcb.fd())
        };
        let name11 = Self::fcb11(mem, fcb_addr);
        let dma_addr = self.scb.current_dma as usize;
        let rec_count = self.scb.multisector_count.max(1) as usize;
        let bytes_count = rec_count * RECORD_SIZE;
        let Some(slot) = fd else { return BdosResult::with_h(0xFF, 0x00) };
        let Some(cached) = self.cache.get_mut(slot as usize, drive, &name11) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        let offset = Fcb::record_to_bytes(record) as usize;
        if cached.data.len() < offset + bytes_count {
            cached.data.resize(offset + bytes_count, 0);
        }
        cached.data[offset..offset + bytes_count].copy_from_slice(&mem[dma_addr..dma_addr + bytes_count]);
        cached.modified = true;
        Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]).set_current_record(record);
        BdosResult::ok(0)
    }

    fn compute_file_size(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.filename())
        };
        let Ok(fs) = self.drive_fs(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        match fs.read_file(&filename) {
            Some(data) => {
                let records = (data.len() as u32).div_ceil(RECORD_SIZE as u32);
                Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]).set_random_record(records);
                BdosResult::ok(0)
            }
            None => BdosResult::with_h(0xFF, 0x00),
        }
    }

    fn set_random_record(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let mut fcb = Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]);
        let record = fcb.current_record();
        fcb.set_random_record(record);
        BdosResult::ok(0)
    }

    fn parse_filename_call(&mut self, str_addr: u16, mem: &mut [u8]) -> BdosResult {
        let mut bytes = Vec::new();
        let mut a = str_addr;
        loop {
            let b = mem[a as usize];
            if b == 0 || b == b' ' {
                break;
            }
            bytes.push(b);
            a = a.wrapping_add(1);
        }
        let s = String::from_utf8_lossy(&bytes).into_owned();
        let parsed = parse_filename_str(&s);
        BdosResult::ok(if parsed.name.trim().is_empty() { 0xFF } else { 0 })
    }

    fn set_directory_label(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let drive = {
            let fcb = Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]);
            self.effective_drive(fcb.drive())
        };
        let flags = mem[fcb_addr as usize + 0x0C];
        let Ok(fs) = self.drive_fs_mut(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        let mut label = dirlabel::read_label(fs);
        label.flags = flags | dirlabel::DIRLABELFLAGS_EXISTS;
        match dirlabel::write_label(fs, label) {
            Ok(()) => BdosResult::ok(0),
            Err(_) => self.do_error(0xFF, 0x01, "CP/M Error writing file, I/O Error"),
        }
    }

    fn get_directory_label(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let drive = {
            let fcb = Fcb::new(&mut mem[Self::fcb_addr_range(fcb_addr)]);
            self.effective_drive(fcb.drive())
        };
        let Ok(fs) = self.drive_fs(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        let label = dirlabel::read_label(fs);
        mem[fcb_addr as usize + 0x0C] = label.flags;
        BdosResult::ok(label.flags)
    }

    fn copy_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, src_name) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.filename())
        };
        let dst_addr = fcb_addr + 16;
        let dst_name = Fcb::new(&mut mem[Self::fcb_addr_range(dst_addr)]).filename();
        let data = self.drive_fs(drive).ok().and_then(|fs| fs.read_file(&src_name));
        match data {
            Some(bytes) => match self.drive_fs_mut(drive) {
                Ok(fs) => {
                    if fs.exists(&dst_name) {
                        return BdosResult::ok(2); // destination already exists
                    }
                    match fs.write_file(&dst_name, &bytes) {
                        Ok(()) => BdosResult::ok(0),
                        Err(_) => BdosResult::ok(3),
                    }
                }
                Err(_) => BdosResult::ok(4),
            },
            None => BdosResult::ok(1), // source not found
        }
    }

    /// Func 99, Truncate File: the file keeps the records up to and
    /// including the one named by the FCB's random-record field, i.e.
    /// `(R0|R1<<8|R2<<16 + 1) * 128` bytes.
    fn truncate_file(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename, new_len) = {
            let fcb = Fcb::new(&mut mem[range]);
            (
                self.effective_drive(fcb.drive()),
                fcb.filename(),
                (fcb.random_record() as usize + 1) * RECORD_SIZE,
            )
        };
        let data = self.drive_fs(drive).ok().and_then(|fs| fs.read_file(&filename));
        let Some(mut data) = data else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        data.truncate(new_len);
        match self.drive_fs_mut(drive).and_then(|fs| fs.write_file(&filename, &data)) {
            Ok(()) => BdosResult::ok(0),
            Err(_) => self.do_error(0xFF, 0x01, "CP/M Error writing file, I/O Error"),
        }
    }

    /// Func 46, Get Disk Free Space: writes the current drive's remaining
    /// 128-byte record count as a 3-byte little-endian value into the DMA
    /// buffer.
    fn get_disk_free_space(&mut self, mem: &mut [u8]) -> BdosResult {
        let drive = self.scb.current_disk;
        let free = self.drive_fs(drive).map(|fs| fs.free_records()).unwrap_or(0);
        let dma = self.scb.current_dma as usize;
        mem[dma] = (free & 0xFF) as u8;
        mem[dma + 1] = ((free >> 8) & 0xFF) as u8;
        mem[dma + 2] = ((free >> 16) & 0xFF) as u8;
        BdosResult::ok(0)
    }

    /// Func 49, Get/Set System Control Block: DE points to a 4-byte block
    /// `{offset, set, value_lo, value_hi}`. `set == 0` reads the SCB word at
    /// `offset` back into A/HL; `set == 0xFE` writes a word, `set == 0xFF` a
    /// byte, both from `value`.
    fn get_set_scb(&mut self, de: u16, mem: &mut [u8]) -> BdosResult {
        let offset = mem[de as usize] as i32;
        let set = mem[de as usize + 1];
        let value_b = mem[de as usize + 2];
        let value_w = u16::from_le_bytes([mem[de as usize + 2], mem[de as usize + 3]]);
        let base = addr::SCB_ADDR as i32;
        let target = (base + offset) as usize;

        match set {
            0xFF => {
                mem[target] = value_b;
                self.scb.sync_from_memory(mem);
                BdosResult::ok(0)
            }
            0xFE => {
                mem[target] = (value_w & 0xFF) as u8;
                mem[target + 1] = (value_w >> 8) as u8;
                self.scb.sync_from_memory(mem);
                BdosResult::ok(0)
            }
            _ => {
                self.scb.sync_to_memory(mem);
                let lo = mem[target] as u16;
                let hi = mem.get(target + 1).copied().unwrap_or(0) as u16;
                BdosResult { a: lo as u8, hl: lo | (hi << 8), ..Default::default() }
            }
        }
    }

    /// Func 59, Load Overlay: load a raw binary file at the address named by
    /// the FCB's random-record field. Diverges from the reference's literal
    /// `FCBaddr==0` handling (which returns `A=0xFE` directly) to follow the
    /// documented contract instead: an FCB of zero is an Invalid FCB error.
    fn load_overlay(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        self.rsx = RsxChain::new();
        if fcb_addr == 0 {
            return self.do_error(0x09, 0x09, "CP/M Invalid FCB");
        }
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename, load_addr) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.filename(), (fcb.random_record() & 0xFFFF) as u16)
        };
        if filename.to_uppercase().ends_with(".PRL") {
            return BdosResult::with_h(0xFF, 0x00);
        }
        let Ok(fs) = self.drive_fs(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        let Some(data) = fs.read_file(&filename) else {
            return BdosResult::with_h(0xFF, 0x00);
        };
        if load_addr as usize + data.len() > 0x10000 {
            return BdosResult::with_h(0xFE, 0x00);
        }
        mem[load_addr as usize..load_addr as usize + data.len()].copy_from_slice(&data);
        BdosResult::ok(0)
    }

    /// Func 102, Read File Date Stamps: clears the password byte and the two
    /// 4-byte create/update datestamp slots in the FCB. The reference fills
    /// these from a directory label's recorded stamps; `DriveFS` tracks no
    /// per-file timestamps, so every existing file reports cleared stamps.
    fn read_file_date_stamps(&mut self, fcb_addr: u16, mem: &mut [u8]) -> BdosResult {
        let range = Self::fcb_addr_range(fcb_addr);
        let (drive, filename) = {
            let fcb = Fcb::new(&mut mem[range]);
            (self.effective_drive(fcb.drive()), fcb.filename())
        };
        let Ok(fs) = self.drive_fs(drive) else {
            return self.do_error(0x04, 0x04, "CP/M Invalid Drive");
        };
        if !fs.exists(&filename) {
            return BdosResult::with_h(0xFF, 0x00);
        }
        mem[fcb_addr as usize + 12] = 0;
        for i in 24..32 {
            mem[fcb_addr as usize + i] = 0;
        }
        BdosResult::ok(0)
    }

    /// Func 213, Change Current Directory: DE points to a zero-terminated
    /// path string, resolved against the current drive's directory.
    fn change_current_directory(&mut self, de: u16, mem: &[u8]) -> BdosResult {
        let mut bytes = Vec::new();
        let mut a = de;
        loop {
            let b = mem[a as usize];
            if b == 0 {
                break;
            }
            bytes.push(b);
            a = a.wrapping_add(1);
        }
        let path = String::from_utf8_lossy(&bytes).into_owned();
        match self.change_directory(&path) {
            Ok(()) => BdosResult::ok(0),
            Err(_) => BdosResult::ok(1),
        }
    }
}

impl Default for Bdos {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a raw 11-byte FCB name/extension (8+3, space-padded, high bit
/// stripped) back into a "NAME.EXT" host filename.
fn name11_to_filename(name11: &[u8; 11]) -> String {
    let name: String = name11[0..8]
        .iter()
        .map(|&b| (b & 0x7F) as char)
        .take_while(|&c| c != ' ')
        .collect();
    let ext: String = name11[8..11]
        .iter()
        .map(|&b| (b & 0x7F) as char)
        .take_while(|&c| c != ' ')
        .collect();
    if ext.is_empty() {
        name
    } else {
        format!("{}.{}", name, ext)
    }
}

/// Resolve a CP/M path (possibly relative) to an absolute, `..`-collapsed
/// path string, relative to a drive's current directory. Grounded in
/// `BDOS::createAbsolutePath`.
pub fn create_absolute_path(path: &str, current_dir: &str) -> String {
    let is_absolute = path.starts_with('/') || path.starts_with('\\');
    let joined = if is_absolute {
        path.trim_start_matches(['/', '\\']).to_string()
    } else if current_dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", current_dir, path)
    };
    process_dotdot(&joined.replace('\\', "/"))
}

/// Collapse `..` segments left to right, matching
/// `BDOS::processPrevDirMarks`: `"AAA/../BBB" -> "BBB"`, `"AAA/.." -> ""`.
pub fn process_dotdot(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() {
            continue;
        }
        if seg == ".." {
            segments.pop();
        } else {
            segments.push(seg);
        }
    }
    segments.join("/")
}

/// Guest-visible absolute path mapped onto a host mount point, matching the
/// `<mount>/<current_dir>/<8.3 name>` layout from spec §6.
pub fn host_path(mount: &std::path::Path, absolute_cpm_path: &str) -> PathBuf {
    let mut p = mount.to_path_buf();
    for seg in absolute_cpm_path.split('/').filter(|s| !s.is_empty()) {
        p.push(seg);
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_dotdot_cases() {
        assert_eq!(process_dotdot("AAA/../BBB"), "BBB");
        assert_eq!(process_dotdot("AAA/.."), "");
        assert_eq!(process_dotdot("AAA/BBB/.."), "AAA");
        assert_eq!(process_dotdot("AAA/BBB/../CCC"), "AAA/CCC");
        assert_eq!(process_dotdot("AAA/BBB/../.."), "");
        assert_eq!(process_dotdot("AAA/BBB/../CCC/../DDD"), "AAA/DDD");
        assert_eq!(process_dotdot("AAA/BBB/CCC/../.."), "AAA");
        assert_eq!(process_dotdot("AAA/BBB/CCC/../../DDD"), "AAA/DDD");
    }

    #[test]
    fn test_create_absolute_path_relative() {
        assert_eq!(create_absolute_path("FOO", "BAR"), "BAR/FOO");
        assert_eq!(create_absolute_path("../FOO", "BAR/BAZ"), "BAR/FOO");
    }

    #[test]
    fn test_create_absolute_path_absolute() {
        assert_eq!(create_absolute_path("/FOO/BAR", "WHATEVER"), "FOO/BAR");
    }

    #[test]
    fn test_bdos_version() {
        let mut bdos = Bdos::new();
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(12, 0, &mut mem);
        assert_eq!(r.a, 0x31);
    }

    #[test]
    fn test_make_open_write_close_read_cycle() {
        use crate::fs::MemoryDriveFS;
        let mut bdos = Bdos::new();
        bdos.mount(0, Box::new(MemoryDriveFS::new()));
        let mut mem = vec![0u8; 65536];
        let fcb_addr: u16 = 0x5C;
        {
            let mut fcb = Fcb::new(&mut mem[fcb_addr as usize..fcb_addr as usize + FCB_SIZE]);
            fcb.parse_filename("HELLO.TXT");
        }
        let r = bdos.dispatch(22, fcb_addr, &mut mem); // make file
        assert_eq!(r.a, 0);

        bdos.scb.current_dma = 0x0080;
        mem[0x0080..0x0080 + 5].copy_from_slice(b"HELLO");
        let r = bdos.dispatch(21, fcb_addr, &mut mem); // write sequential
        assert_eq!(r.a, 0);

        let r = bdos.dispatch(16, fcb_addr, &mut mem); // close
        assert_eq!(r.a, 0);

        {
            let mut fcb = Fcb::new(&mut mem[fcb_addr as usize..fcb_addr as usize + FCB_SIZE]);
            fcb.parse_filename("HELLO.TXT");
        }
        let r = bdos.dispatch(15, fcb_addr, &mut mem); // open
        assert_eq!(r.a, 0);
        let r = bdos.dispatch(20, fcb_addr, &mut mem); // read sequential
        assert_eq!(r.a, 0);
        assert_eq!(&mem[0x0080..0x0080 + 5], b"HELLO");
    }

    #[test]
    fn test_truncate_file_keeps_records_through_random_record() {
        use crate::fs::MemoryDriveFS;
        let mut bdos = Bdos::new();
        let mut fs = MemoryDriveFS::new();
        fs.write_file("BIG.DAT", &vec![0xAAu8; 300]).unwrap();
        bdos.mount(0, Box::new(fs));
        let mut mem = vec![0u8; 65536];
        let fcb_addr: u16 = 0x5C;
        {
            let mut fcb = Fcb::new(&mut mem[fcb_addr as usize..fcb_addr as usize + FCB_SIZE]);
            fcb.parse_filename("BIG.DAT");
            fcb.set_random_record(1); // keep records 0 and 1: 256 bytes
        }
        let r = bdos.dispatch(99, fcb_addr, &mut mem);
        assert_eq!(r.a, 0);
        assert_eq!(bdos.drives[0].as_ref().unwrap().read_file("BIG.DAT").unwrap().len(), 256);
    }

    #[test]
    fn test_change_current_directory_updates_current_dir() {
        use crate::fs::MemoryDriveFS;
        let mut bdos = Bdos::new();
        bdos.mount(0, Box::new(MemoryDriveFS::new()));
        let mut mem = vec![0u8; 65536];
        let path_addr: u16 = 0x0200;
        mem[path_addr as usize..path_addr as usize + 4].copy_from_slice(b"SUB\0");
        let r = bdos.dispatch(213, path_addr, &mut mem);
        assert_eq!(r.a, 0);
        assert_eq!(bdos.current_dir(), "SUB");
    }

    #[test]
    fn test_load_overlay_zero_fcb_is_invalid_fcb_error() {
        let mut bdos = Bdos::new();
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(59, 0, &mut mem);
        assert_eq!(r.a, 0x09);
        assert_eq!(r.h, Some(0x09));
    }

    #[test]
    fn test_chain_to_program_direct_dispatch_is_a_noop() {
        let mut bdos = Bdos::new();
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(47, 0x00FF, &mut mem);
        assert_eq!(r.a, 0);
    }

    #[test]
    fn test_multisector_read_reports_short_transfer() {
        use crate::fs::MemoryDriveFS;
        let mut bdos = Bdos::new();
        bdos.mount(0, Box::new(MemoryDriveFS::new()));
        let mut mem = vec![0u8; 65536];
        let fcb_addr: u16 = 0x5C;
        {
            let mut fcb = Fcb::new(&mut mem[fcb_addr as usize..fcb_addr as usize + FCB_SIZE]);
            fcb.parse_filename("ONE.REC");
        }
        assert_eq!(bdos.dispatch(22, fcb_addr, &mut mem).a, 0); // make file

        bdos.scb.current_dma = 0x0080;
        mem[0x0080..0x0080 + RECORD_SIZE].fill(0x42);
        assert_eq!(bdos.dispatch(21, fcb_addr, &mut mem).a, 0); // write one record
        assert_eq!(bdos.dispatch(16, fcb_addr, &mut mem).a, 0); // close

        {
            let mut fcb = Fcb::new(&mut mem[fcb_addr as usize..fcb_addr as usize + FCB_SIZE]);
            fcb.parse_filename("ONE.REC");
        }
        assert_eq!(bdos.dispatch(15, fcb_addr, &mut mem).a, 0); // open

        assert_eq!(bdos.dispatch(44, 2, &mut mem).a, 0); // request 2 records at a time
        let r = bdos.dispatch(20, fcb_addr, &mut mem); // read sequential
        assert_eq!(r.a, 0x01);
        assert_eq!(r.h, Some(1));
    }

    #[test]
    fn test_set_multisector_count_rejects_out_of_range() {
        let mut bdos = Bdos::new();
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(44, 0, &mut mem);
        assert_eq!(r.a, 0xFF);
        assert_eq!(bdos.scb.multisector_count, 0);
    }

    #[test]
    fn test_do_error_default_mode_stops_and_sets_message() {
        let mut bdos = Bdos::new();
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(14, 5, &mut mem); // select an unmounted drive
        assert_eq!(r.a, 0x04);
        assert!(r.stop);
        assert!(r.message.is_some());
        assert_eq!(bdos.scb.program_return_code, 0xFFFD);
    }

    #[test]
    fn test_do_error_return_mode_is_silent() {
        let mut bdos = Bdos::new();
        bdos.scb.error_mode = crate::scb::ERRORMODE_RETURN;
        let mut mem = vec![0u8; 65536];
        let r = bdos.dispatch(14, 5, &mut mem);
        assert_eq!(r.a, 0x04);
        assert!(!r.stop);
        assert!(r.message.is_none());
    }
}
