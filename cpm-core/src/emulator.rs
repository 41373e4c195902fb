//! Z80 execution for one CP/M-3 session.
//!
//! Supersedes the teacher's CP/M-2.2 emulator (its own flat `[u8; 65536]`,
//! its own ad-hoc BDOS/CBIOS dispatch and its own open-file table) with a
//! thin runner over the CP/M-3 session state: `Hal` owns guest memory,
//! `Bdos`/`Bios` own the syscall surfaces. `CpmEmulator` itself only holds
//! what's intrinsic to one program's execution — the CPU, its clock, and
//! the shell reload used on warm boot — and borrows everything else from
//! the session (`Supervisor::Session`) that calls it. That keeps `Hal`/
//! `Bdos`/`Bios` single-owner instead of duplicated between the session
//! and the emulator.
//!
//! BDOS functions 1-11 (console/list I/O) are intercepted here rather than
//! forwarded to `Bdos::dispatch`, which treats them as no-ops: the BDOS
//! state machine has no console of its own, so reaching it for one of
//! these means routing through `Bios` first.

use std::num::NonZeroU16;

use z80emu::host::TsCounter;
use z80emu::{Clock, Cpu, Io, Memory, Reg8, StkReg16, Z80NMOS};

use crate::bdos::{addr, Bdos, BdosFunction};
use crate::bios::{Bios, BiosContext, BIOS_BOOT, BIOS_WBOOT};
use crate::console::CpmConsole;
use crate::error::CpmResult;
use crate::hal::{AbortReason, Hal, LogicalDevice};
use crate::{CpmExitInfo, ExitReason};

type TsClock = TsCounter<i32>;

/// Adapts `Hal`'s paged memory to `z80emu`'s `Memory`/`Io` traits. I/O ports
/// are unused by CP/M programs (they talk to BDOS/BIOS via `CALL`), so both
/// read and write are no-ops.
struct Bus<'a> {
    hal: &'a mut Hal,
}

impl Memory for Bus<'_> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.hal.read_byte(addr)
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.hal.read_byte(addr)
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.hal.write_byte(addr, value);
    }
}

impl Io for Bus<'_> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, _port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        (0xFF, None)
    }

    fn write_io(
        &mut self,
        _port: u16,
        _value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        (None, None)
    }
}

/// Runs one Z80 program against a session's `Hal`/`Bdos`/`Bios`/console.
/// Cheap to create; a fresh one per "load and run a .COM" is the expected
/// usage (unlike `Hal`/`Bdos`/`Bios`, which live for the session's whole
/// lifetime).
pub struct CpmEmulator {
    cpu: Z80NMOS,
    clock: TsClock,
    shell_binary: Option<Vec<u8>>,
    shell_address: u16,
    pub trace: bool,
}

impl CpmEmulator {
    pub fn new() -> Self {
        Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            shell_binary: None,
            shell_address: addr::TPA_ADDR,
            trace: false,
        }
    }

    /// Lay down the page-0 jump vectors and the BDOS/BIOS entry stubs.
    /// Guest code never actually executes the bytes at these addresses —
    /// the run loop intercepts `CALL`s to them before dispatch — but real
    /// CP/M programs do inspect page 0, so it needs to look right.
    fn init_memory(hal: &mut Hal) {
        hal.write_byte(addr::PAGE0_WSTART, 0xC3); // JP
        hal.write_word(addr::PAGE0_WSTARTADDR, addr::BIOS_ENTRY + 3); // BIOS func 1 (WBOOT)

        hal.write_byte(addr::PAGE0_IOBYTE, 0);
        hal.write_byte(addr::PAGE0_CURDRVUSR, 0);

        hal.write_byte(addr::PAGE0_BDOS, 0xC3); // JP
        hal.write_word(addr::PAGE0_OSBASE, addr::BDOS_ENTRY);

        hal.write_byte(addr::BDOS_ENTRY, 0xC9); // RET: intercepted before execution

        for i in 0..addr::BIOS_SIZE {
            hal.write_byte(addr::BIOS_ENTRY + i, 0xC9); // RET: intercepted before execution
        }
    }

    /// Load a `.COM` file at the transient program area (0x0100).
    pub fn load_com(hal: &mut Hal, data: &[u8]) {
        Self::load_at(hal, addr::TPA_ADDR, data);
    }

    pub fn load_at(hal: &mut Hal, address: u16, data: &[u8]) {
        hal.copy_from_host(address, data);
    }

    /// Keep `data` around so a warm boot (`JP 0` or BDOS function 0) reloads
    /// it instead of exiting the run loop — this is how a CCP built-in
    /// hands control back to the shell after a transient program exits.
    pub fn set_shell(&mut self, hal: &mut Hal, data: &[u8], address: u16) {
        self.shell_binary = Some(data.to_vec());
        self.shell_address = address;
        Self::load_at(hal, address, data);
    }

    pub fn set_pc(&mut self, address: u16) {
        self.cpu.set_pc(address);
    }

    /// Store the command tail at the default DMA address (0x0080), the way
    /// a loader places it before jumping into the TPA.
    pub fn set_args(hal: &mut Hal, args: &str) {
        let args_upper = args.to_uppercase();
        let bytes = args_upper.as_bytes();
        let len = bytes.len().min(127);
        hal.write_byte(addr::PAGE0_DMA, len as u8);
        hal.copy_from_host(addr::PAGE0_DMA + 1, &bytes[..len]);
    }

    pub fn run(
        &mut self,
        hal: &mut Hal,
        bdos: &mut Bdos,
        bios: &mut Bios,
        console: &mut dyn CpmConsole,
    ) -> CpmResult<CpmExitInfo> {
        self.run_from(addr::TPA_ADDR, hal, bdos, bios, console)
    }

    pub fn run_from(
        &mut self,
        start_address: u16,
        hal: &mut Hal,
        bdos: &mut Bdos,
        bios: &mut Bios,
        console: &mut dyn CpmConsole,
    ) -> CpmResult<CpmExitInfo> {
        Self::init_memory(hal);
        self.cpu.reset();
        self.cpu.set_pc(start_address);
        self.cpu.set_sp(addr::SYSTEM_ADDR.wrapping_sub(2));

        loop {
            if hal.aborting() {
                return Ok(CpmExitInfo {
                    reason: ExitReason::Error(format!("{:?}", hal.abort_reason())),
                    t_states: self.clock.as_timestamp() as u64,
                    pc: self.cpu.get_pc(),
                });
            }

            let pc = self.cpu.get_pc();

            if pc == addr::PAGE0_WSTART {
                if let Some(info) = self.warm_boot(hal, bdos)? {
                    return Ok(info);
                }
                continue;
            }

            if pc == addr::BDOS_ENTRY {
                if let Some(info) = self.handle_bdos(hal, bdos, bios, console)? {
                    if info.reason == ExitReason::WarmBoot {
                        if let Some(info) = self.warm_boot(hal, bdos)? {
                            return Ok(info);
                        }
                        continue;
                    }
                    return Ok(info);
                }
                let ret_addr = self.pop16(hal);
                self.cpu.set_pc(ret_addr);
                continue;
            }

            if pc >= addr::BIOS_ENTRY && pc < addr::BIOS_ENTRY + addr::BIOS_SIZE {
                let func = ((pc - addr::BIOS_ENTRY) / 3) as u8;
                if func == BIOS_BOOT || func == BIOS_WBOOT {
                    if let Some(info) = self.warm_boot(hal, bdos)? {
                        return Ok(info);
                    }
                    continue;
                }
                self.handle_bios(pc, hal, bdos, bios, console);
                let ret_addr = self.pop16(hal);
                self.cpu.set_pc(ret_addr);
                continue;
            }

            let mut bus = Bus { hal };
            let _ = self
                .cpu
                .execute_next(&mut bus, &mut self.clock, None::<fn(z80emu::CpuDebug)>);

            if self.cpu.is_halt() {
                bdos.flush();
                return Ok(CpmExitInfo {
                    reason: ExitReason::Halt,
                    t_states: self.clock.as_timestamp() as u64,
                    pc: self.cpu.get_pc(),
                });
            }
        }
    }

    /// Warm boot: flush modified open files, reload the shell if one is
    /// set, otherwise end the run. Returns `Some(exit_info)` when the loop
    /// should stop.
    fn warm_boot(&mut self, hal: &mut Hal, bdos: &mut Bdos) -> CpmResult<Option<CpmExitInfo>> {
        bdos.flush();
        let Some(shell) = self.shell_binary.clone() else {
            return Ok(Some(CpmExitInfo {
                reason: ExitReason::WarmBoot,
                t_states: self.clock.as_timestamp() as u64,
                pc: 0,
            }));
        };
        Self::init_memory(hal);
        Self::load_at(hal, self.shell_address, &shell);
        hal.write_byte(addr::PAGE0_DMA, 0);
        self.cpu.reset();
        self.cpu.set_pc(self.shell_address);
        self.cpu.set_sp(addr::SYSTEM_ADDR.wrapping_sub(2));
        Ok(None)
    }

    fn pop16(&mut self, hal: &Hal) -> u16 {
        let sp = self.cpu.get_sp();
        let lo = hal.read_byte(sp);
        let hi = hal.read_byte(sp.wrapping_add(1));
        self.cpu.set_sp(sp.wrapping_add(2));
        u16::from_le_bytes([lo, hi])
    }

    /// Handle a `CALL 5`. Functions 1-11 touch the console/list devices and
    /// are routed through `Bios` directly; everything else is handed to
    /// `Bdos::dispatch` against a flattened view of `Hal`'s paged memory.
    fn handle_bdos(
        &mut self,
        hal: &mut Hal,
        bdos: &mut Bdos,
        bios: &mut Bios,
        console: &mut dyn CpmConsole,
    ) -> CpmResult<Option<CpmExitInfo>> {
        let c = self.cpu.get_reg(Reg8::C, None);
        let e = self.cpu.get_reg(Reg8::E, None);
        let de = self.cpu.get_reg16(StkReg16::DE);

        if self.trace {
            eprintln!("[BDOS] C={} ({:?}) DE={:#06X}", c, BdosFunction::from(c), de);
        }

        match BdosFunction::from(c) {
            BdosFunction::SystemReset => {
                return Ok(Some(CpmExitInfo {
                    reason: ExitReason::WarmBoot,
                    t_states: self.clock.as_timestamp() as u64,
                    pc: self.cpu.get_pc(),
                }));
            }
            BdosFunction::ConsoleInput => {
                let mut ctx = BiosContext { hal, console };
                let ch = bios.dev_in(&mut ctx, LogicalDevice::ConIn);
                self.cpu.set_reg(Reg8::A, None, ch);
            }
            BdosFunction::ConsoleOutput => {
                let mut ctx = BiosContext { hal, console };
                bios.dev_out(&mut ctx, LogicalDevice::ConOut, e);
            }
            BdosFunction::ReaderInput => {
                self.cpu.set_reg(Reg8::A, None, 0x1A);
            }
            BdosFunction::PunchOutput | BdosFunction::ListOutput => {
                let mut ctx = BiosContext { hal, console };
                bios.dev_out(&mut ctx, LogicalDevice::List, e);
            }
            BdosFunction::DirectConsoleIo => {
                if e == 0xFF {
                    if console.has_key() {
                        let ch = console.get_key().unwrap_or(0);
                        self.cpu.set_reg(Reg8::A, None, ch);
                    } else {
                        self.cpu.set_reg(Reg8::A, None, 0);
                    }
                } else {
                    let mut ctx = BiosContext { hal, console };
                    bios.dev_out(&mut ctx, LogicalDevice::ConOut, e);
                }
            }
            BdosFunction::GetIoByte => {
                self.cpu.set_reg(Reg8::A, None, hal.read_byte(addr::PAGE0_IOBYTE));
            }
            BdosFunction::SetIoByte => {
                hal.write_byte(addr::PAGE0_IOBYTE, e);
            }
            BdosFunction::PrintString => {
                let mut ctx = BiosContext { hal, console };
                let mut a = de;
                loop {
                    let ch = ctx.hal.read_byte(a);
                    if ch == b'$' {
                        break;
                    }
                    bios.dev_out(&mut ctx, LogicalDevice::ConOut, ch);
                    a = a.wrapping_add(1);
                }
            }
            BdosFunction::ReadConsoleBuffer => {
                let max_len = hal.read_byte(de) as usize;
                let mut pos = 0usize;
                let mut ctx = BiosContext { hal, console };
                loop {
                    let ch = bios.dev_in(&mut ctx, LogicalDevice::ConIn);
                    if ch == 13 {
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, 13);
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, 10);
                        break;
                    } else if (ch == 8 || ch == 127) && pos > 0 {
                        pos -= 1;
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, 8);
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, b' ');
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, 8);
                    } else if ch >= 32 && pos < max_len {
                        ctx.hal.write_byte(de + 2 + pos as u16, ch);
                        pos += 1;
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, ch);
                    }
                }
                hal.write_byte(de + 1, pos as u8);
            }
            BdosFunction::ConsoleStatus => {
                let ctx = BiosContext { hal, console };
                let status = if bios.dev_in_available(&ctx, LogicalDevice::ConIn) { 0xFF } else { 0 };
                self.cpu.set_reg(Reg8::A, None, status);
            }
            BdosFunction::ChainToProgram => {
                // DE=0xFFFF keeps the current drive/user; anything else (the
                // common case, DE=0) resets both to 0 before the next program
                // loads, the same as a cold CCP invocation would.
                if de != 0xFFFF {
                    bdos.scb.current_disk = 0;
                    bdos.scb.current_user = 0;
                }
                let dma = bdos.scb.current_dma;
                let len = hal.read_byte(dma) as usize;
                let mut cmd = Vec::with_capacity(len);
                for i in 0..len {
                    cmd.push(hal.read_byte(dma.wrapping_add(1 + i as u16)));
                }
                let cmd = String::from_utf8_lossy(&cmd).trim().to_string();
                bdos.flush();
                return Ok(Some(CpmExitInfo {
                    reason: ExitReason::Chain(cmd),
                    t_states: self.clock.as_timestamp() as u64,
                    pc: self.cpu.get_pc(),
                }));
            }
            BdosFunction::DirectBiosCall => {
                let bfunc = hal.read_byte(de);
                let a_in = hal.read_byte(de.wrapping_add(1));
                let c_in = hal.read_byte(de.wrapping_add(2));
                let drive_mounted = bdos.drives.get(c_in as usize).map(|d| d.is_some()).unwrap_or(false);
                let mut ctx = BiosContext { hal, console };
                let result = bios.dispatch(&mut ctx, bfunc, c_in, drive_mounted);
                let _ = a_in;
                hal.write_byte(de.wrapping_add(1), result.a);
                hal.write_byte(de.wrapping_add(6), (result.hl & 0xFF) as u8);
                hal.write_byte(de.wrapping_add(7), (result.hl >> 8) as u8);
                self.cpu.set_reg(Reg8::A, None, result.a);
                self.cpu.set_reg16(StkReg16::HL, result.hl);
            }
            _ => {
                let mut mem = hal.copy_to_host(0, 0x10000);
                let result = bdos.dispatch(c, de, &mut mem);
                hal.copy_from_host(0, &mem);
                self.cpu.set_reg(Reg8::A, None, result.a);
                self.cpu.set_reg16(StkReg16::HL, result.hl);
                if let Some(h) = result.h {
                    self.cpu.set_reg(Reg8::B, None, h);
                }
                if let Some(message) = &result.message {
                    let mut ctx = BiosContext { hal, console };
                    for &b in message.as_bytes() {
                        bios.dev_out(&mut ctx, LogicalDevice::ConOut, b);
                    }
                }
                if result.stop {
                    hal.abort(AbortReason::ProgramError);
                }
            }
        }

        Ok(None)
    }

    fn handle_bios(
        &mut self,
        pc: u16,
        hal: &mut Hal,
        bdos: &Bdos,
        bios: &Bios,
        console: &mut dyn CpmConsole,
    ) {
        let func = ((pc - addr::BIOS_ENTRY) / 3) as u8;
        let c = self.cpu.get_reg(Reg8::C, None);

        if self.trace {
            eprintln!("[BIOS] function {}", func);
        }

        let drive_mounted = bdos.drives.get(c as usize).map(|d| d.is_some()).unwrap_or(false);
        let mut ctx = BiosContext { hal, console };
        let result = bios.dispatch(&mut ctx, func, c, drive_mounted);
        self.cpu.set_reg(Reg8::A, None, result.a);
        self.cpu.set_reg16(StkReg16::HL, result.hl);
    }
}

impl Default for CpmEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::fs::MemoryDriveFS;

    fn fixture() -> (Hal, Bdos, Bios, HeadlessConsole) {
        (Hal::new(), Bdos::new(), Bios::new(), HeadlessConsole::new())
    }

    #[test]
    fn test_emulator_jump_vectors() {
        let (mut hal, _bdos, _bios, _console) = fixture();
        CpmEmulator::init_memory(&mut hal);
        assert_eq!(hal.read_byte(addr::PAGE0_BDOS), 0xC3);
        assert_eq!(hal.read_word(addr::PAGE0_OSBASE), addr::BDOS_ENTRY);
    }

    #[test]
    fn test_hello_world() {
        let program = [
            0x0E, 0x02, // LD C, 2 (console output)
            0x1E, b'H', // LD E, 'H'
            0xCD, 0x00, 0xFD, // CALL BDOS_ENTRY
            0x1E, b'i', // LD E, 'i'
            0xCD, 0x00, 0xFD, // CALL BDOS_ENTRY
            0xC3, 0x00, 0x00, // JP 0x0000 (warm boot)
        ];

        let (mut hal, mut bdos, mut bios, mut console) = fixture();
        CpmEmulator::load_com(&mut hal, &program);
        let mut emu = CpmEmulator::new();
        let result = emu.run(&mut hal, &mut bdos, &mut bios, &mut console).unwrap();

        assert_eq!(result.reason, ExitReason::WarmBoot);
        assert_eq!(console.output_string(), "Hi");
    }

    #[test]
    fn test_shell_reload_on_warm_boot() {
        let shell = [0xC3, 0x00, 0x00]; // JP 0 immediately
        let program = [0xC3, 0x00, 0x00]; // JP 0 immediately
        let (mut hal, mut bdos, mut bios, mut console) = fixture();
        CpmEmulator::load_com(&mut hal, &program);
        let mut emu = CpmEmulator::new();
        emu.set_shell(&mut hal, &shell, addr::TPA_ADDR);
        emu.shell_binary = None;
        let result = emu.run(&mut hal, &mut bdos, &mut bios, &mut console).unwrap();
        assert_eq!(result.reason, ExitReason::WarmBoot);
    }

    #[test]
    fn test_unmounted_drive_select_fails() {
        let (mut hal, mut bdos, mut bios, mut console) = fixture();
        bdos.mount(0, Box::new(MemoryDriveFS::new()));
        let program = [
            0x0E, 14, // LD C, 14 (select disk)
            0x16, 0x00, // LD D, 0
            0x1E, 0x05, // LD E, 5 (drive F, unmounted)
            0xCD, 0x00, 0xFD, // CALL BDOS_ENTRY
            0xC3, 0x00, 0x00, // JP 0
        ];
        CpmEmulator::load_com(&mut hal, &program);
        let mut emu = CpmEmulator::new();
        let result = emu.run(&mut hal, &mut bdos, &mut bios, &mut console).unwrap();
        assert_eq!(result.reason, ExitReason::WarmBoot);
        assert_eq!(bdos.scb.current_disk, 0);
    }
}
