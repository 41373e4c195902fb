//! BIOS: the 33-slot jump table, logical/physical device redirection and
//! the host date/time bridge.
//!
//! Grounded in `original_source/.../BIOS.cpp`: five logical devices
//! (console in/out, aux in/out, list) each redirect to a bitmask of
//! physical devices (`chrtbl`); input reads from the first ready physical
//! device in the mask, output writes to every physical device in the mask.
//! CRT/KBD route through the session's `CpmConsole`; LPT/UART1/UART2 route
//! through the HAL's byte streams.

use crate::bdos::addr;
use crate::console::CpmConsole;
use crate::datetime::DateTime;
use crate::hal::{Hal, LogicalDevice};

pub const BIOS_BOOT: u8 = 0;
pub const BIOS_WBOOT: u8 = 1;
pub const BIOS_CONST: u8 = 2;
pub const BIOS_CONIN: u8 = 3;
pub const BIOS_CONOUT: u8 = 4;
pub const BIOS_LIST: u8 = 5;
pub const BIOS_AUXOUT: u8 = 6;
pub const BIOS_AUXIN: u8 = 7;
pub const BIOS_SELDSK: u8 = 9;
pub const BIOS_LISTST: u8 = 15;
pub const BIOS_CONOST: u8 = 17;
pub const BIOS_AUXIST: u8 = 18;
pub const BIOS_AUXOST: u8 = 19;
pub const BIOS_DEVTBL: u8 = 20;
pub const BIOS_DEVINI: u8 = 21;
pub const BIOS_TIME: u8 = 26;

/// Physical devices making up `chrtbl`, in the same order as the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalDevice {
    Crt,
    Kbd,
    Lpt,
    Uart1,
    Uart2,
}

impl PhysicalDevice {
    pub const ALL: [PhysicalDevice; 5] = [
        PhysicalDevice::Crt,
        PhysicalDevice::Kbd,
        PhysicalDevice::Lpt,
        PhysicalDevice::Uart1,
        PhysicalDevice::Uart2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalDevice::Crt => "CRT",
            PhysicalDevice::Kbd => "KBD",
            PhysicalDevice::Lpt => "LPT",
            PhysicalDevice::Uart1 => "UART1",
            PhysicalDevice::Uart2 => "UART2",
        }
    }

    fn bit(&self) -> u16 {
        let index = PhysicalDevice::ALL.iter().position(|d| d == self).unwrap();
        1 << (15 - index)
    }
}

/// Outcome of a BIOS call: the result register plus an optional 16-bit
/// value (e.g. `SELDSK`'s DPH address, `DEVTBL`'s chrtbl address).
#[derive(Debug, Clone, Copy, Default)]
pub struct BiosResult {
    pub a: u8,
    pub hl: u16,
}

/// BIOS state: which physical devices each logical device redirects to.
/// The original keeps this bitmask in the SCB (`SCB_REDIRECTIONVECTS_W`);
/// we keep it as plain fields since nothing outside the BIOS needs to poke
/// it from guest memory directly in this emulator.
pub struct Bios {
    redirection: [u16; 5],
}

/// Everything a BIOS call needs besides the function number and register
/// arguments: the session's console and HAL.
pub struct BiosContext<'a> {
    pub hal: &'a mut Hal,
    pub console: &'a mut dyn CpmConsole,
}

impl Bios {
    pub fn new() -> Self {
        let mut bios = Self { redirection: [0; 5] };
        // matches BDOS::init's default wiring exactly
        bios.assign(LogicalDevice::ConIn, PhysicalDevice::Kbd);
        bios.assign(LogicalDevice::ConOut, PhysicalDevice::Crt);
        bios.assign(LogicalDevice::AuxIn, PhysicalDevice::Uart1);
        bios.assign(LogicalDevice::AuxOut, PhysicalDevice::Uart1);
        bios.assign(LogicalDevice::List, PhysicalDevice::Lpt);
        bios
    }

    fn slot(device: LogicalDevice) -> usize {
        match device {
            LogicalDevice::ConIn => 0,
            LogicalDevice::ConOut => 1,
            LogicalDevice::AuxIn => 2,
            LogicalDevice::AuxOut => 3,
            LogicalDevice::List => 4,
        }
    }

    pub fn is_assigned(&self, logical: LogicalDevice, physical: PhysicalDevice) -> bool {
        self.redirection[Self::slot(logical)] & physical.bit() != 0
    }

    pub fn assign(&mut self, logical: LogicalDevice, physical: PhysicalDevice) {
        self.redirection[Self::slot(logical)] |= physical.bit();
    }

    pub fn unassign(&mut self, logical: LogicalDevice, physical: PhysicalDevice) {
        self.redirection[Self::slot(logical)] &= !physical.bit();
    }

    fn physical_in_available(ctx: &BiosContext, physical: PhysicalDevice) -> bool {
        match physical {
            PhysicalDevice::Kbd => ctx.console.has_key(),
            PhysicalDevice::Uart1 => ctx.hal.serial[0].has_input(),
            PhysicalDevice::Uart2 => ctx.hal.serial[1].has_input(),
            PhysicalDevice::Crt | PhysicalDevice::Lpt => false,
        }
    }

    fn physical_out_available(_physical: PhysicalDevice) -> bool {
        // output streams in this emulator never apply backpressure
        true
    }

    fn physical_in(ctx: &mut BiosContext, physical: PhysicalDevice) -> u8 {
        match physical {
            PhysicalDevice::Kbd => ctx.console.wait_for_key(),
            PhysicalDevice::Uart1 => ctx.hal.serial[0].read_byte().unwrap_or(0x1A),
            PhysicalDevice::Uart2 => ctx.hal.serial[1].read_byte().unwrap_or(0x1A),
            PhysicalDevice::Crt | PhysicalDevice::Lpt => 0x1A,
        }
    }

    fn physical_out(ctx: &mut BiosContext, physical: PhysicalDevice, c: u8) {
        match physical {
            PhysicalDevice::Crt => ctx.console.write(c),
            PhysicalDevice::Lpt => {
                ctx.console.print(c);
                ctx.hal.lpt.write_byte(c);
            }
            PhysicalDevice::Uart1 => ctx.hal.serial[0].write_byte(c),
            PhysicalDevice::Uart2 => ctx.hal.serial[1].write_byte(c),
            PhysicalDevice::Kbd => {}
        }
    }

    /// "An input status routine should return true if any selected device
    /// is ready" (CP/M Plus System Guide).
    pub fn dev_in_available(&self, ctx: &BiosContext, device: LogicalDevice) -> bool {
        let mask = self.redirection[Self::slot(device)];
        PhysicalDevice::ALL
            .iter()
            .enumerate()
            .any(|(i, p)| mask & (1 << (15 - i)) != 0 && Self::physical_in_available(ctx, *p))
    }

    /// "An output status routine should return true only if all selected
    /// devices are ready."
    pub fn dev_out_available(&self, device: LogicalDevice) -> bool {
        let mask = self.redirection[Self::slot(device)];
        PhysicalDevice::ALL
            .iter()
            .enumerate()
            .all(|(i, p)| mask & (1 << (15 - i)) == 0 || Self::physical_out_available(*p))
    }

    /// Read from the first ready device whose bit is set; for the console
    /// this blocks the caller via `CpmConsole::wait_for_key`.
    pub fn dev_in(&self, ctx: &mut BiosContext, device: LogicalDevice) -> u8 {
        let mask = self.redirection[Self::slot(device)];
        for (i, p) in PhysicalDevice::ALL.iter().enumerate() {
            if mask & (1 << (15 - i)) != 0 {
                return Self::physical_in(ctx, *p);
            }
        }
        0x1A // EOF
    }

    /// Write to every device whose bit is set.
    pub fn dev_out(&self, ctx: &mut BiosContext, device: LogicalDevice, c: u8) {
        let mask = self.redirection[Self::slot(device)];
        for (i, p) in PhysicalDevice::ALL.iter().enumerate() {
            if mask & (1 << (15 - i)) != 0 {
                Self::physical_out(ctx, *p, c);
            }
        }
    }

    /// Dispatch a BIOS jump-table slot that needs console/HAL access.
    /// `c` carries the Z80 C register (the byte to output for CONOUT/LIST/
    /// AUXOUT, the drive number for SELDSK).
    pub fn dispatch(&self, ctx: &mut BiosContext, func: u8, c: u8, drive_mounted: bool) -> BiosResult {
        match func {
            BIOS_BOOT | BIOS_WBOOT | BIOS_DEVINI => BiosResult::default(),
            BIOS_CONST => BiosResult {
                a: if self.dev_in_available(ctx, LogicalDevice::ConIn) { 0xFF } else { 0 },
                hl: 0,
            },
            BIOS_CONIN => BiosResult { a: self.dev_in(ctx, LogicalDevice::ConIn), hl: 0 },
            BIOS_CONOUT => {
                self.dev_out(ctx, LogicalDevice::ConOut, c);
                BiosResult::default()
            }
            BIOS_LIST => {
                self.dev_out(ctx, LogicalDevice::List, c);
                BiosResult::default()
            }
            BIOS_AUXOUT => {
                self.dev_out(ctx, LogicalDevice::AuxOut, c);
                BiosResult::default()
            }
            BIOS_AUXIN => BiosResult { a: self.dev_in(ctx, LogicalDevice::AuxIn), hl: 0 },
            BIOS_LISTST => BiosResult { a: if self.dev_out_available(LogicalDevice::List) { 0xFF } else { 0 }, hl: 0 },
            BIOS_CONOST => BiosResult { a: if self.dev_out_available(LogicalDevice::ConOut) { 0xFF } else { 0 }, hl: 0 },
            BIOS_AUXIST => BiosResult {
                a: if self.dev_in_available(ctx, LogicalDevice::AuxIn) { 0xFF } else { 0 },
                hl: 0,
            },
            BIOS_AUXOST => BiosResult { a: if self.dev_out_available(LogicalDevice::AuxOut) { 0xFF } else { 0 }, hl: 0 },
            BIOS_SELDSK => BiosResult { a: 0, hl: if drive_mounted { addr::DPH_ADDR } else { 0 } },
            BIOS_DEVTBL => BiosResult { a: 0, hl: addr::CHRTBL_ADDR },
            _ => BiosResult::default(),
        }
    }

    /// BIOS function 26: get (C=0) reads the host clock into the SCB date
    /// fields; set (C=0xFF) pushes the SCB date fields back to the HAL.
    pub fn exec_time(&self, hal: &mut Hal, op: u8, scb_date: &mut DateTime) {
        if op == 0 {
            *scb_date = hal.get_date_time();
        } else if op == 0xFF {
            hal.set_date_time(*scb_date);
        }
    }
}

impl Default for Bios {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;

    #[test]
    fn test_default_redirection() {
        let bios = Bios::new();
        assert!(bios.is_assigned(LogicalDevice::ConIn, PhysicalDevice::Kbd));
        assert!(bios.is_assigned(LogicalDevice::ConOut, PhysicalDevice::Crt));
        assert!(!bios.is_assigned(LogicalDevice::ConOut, PhysicalDevice::Lpt));
    }

    #[test]
    fn test_assign_unassign() {
        let mut bios = Bios::new();
        bios.assign(LogicalDevice::List, PhysicalDevice::Uart2);
        assert!(bios.is_assigned(LogicalDevice::List, PhysicalDevice::Uart2));
        bios.unassign(LogicalDevice::List, PhysicalDevice::Uart2);
        assert!(!bios.is_assigned(LogicalDevice::List, PhysicalDevice::Uart2));
    }

    #[test]
    fn test_dispatch_seldsk() {
        let bios = Bios::new();
        let mut hal = Hal::new();
        let mut console = HeadlessConsole::new();
        let mut ctx = BiosContext { hal: &mut hal, console: &mut console };
        let r = bios.dispatch(&mut ctx, BIOS_SELDSK, 0, true);
        assert_eq!(r.hl, addr::DPH_ADDR);
        let r = bios.dispatch(&mut ctx, BIOS_SELDSK, 5, false);
        assert_eq!(r.hl, 0);
    }

    #[test]
    fn test_dispatch_devtbl_returns_chrtbl_addr() {
        let bios = Bios::new();
        let mut hal = Hal::new();
        let mut console = HeadlessConsole::new();
        let mut ctx = BiosContext { hal: &mut hal, console: &mut console };
        let r = bios.dispatch(&mut ctx, BIOS_DEVTBL, 0, false);
        assert_eq!(r.hl, addr::CHRTBL_ADDR);
    }

    #[test]
    fn test_conout_routes_to_console() {
        let bios = Bios::new();
        let mut hal = Hal::new();
        let mut console = HeadlessConsole::new();
        {
            let mut ctx = BiosContext { hal: &mut hal, console: &mut console };
            bios.dispatch(&mut ctx, BIOS_CONOUT, b'X', false);
        }
        assert_eq!(console.output(), b"X");
    }

    #[test]
    fn test_conin_available_tracks_console_queue() {
        let bios = Bios::new();
        let mut hal = Hal::new();
        let mut console = HeadlessConsole::with_input(b"A");
        let ctx = BiosContext { hal: &mut hal, console: &mut console };
        assert!(bios.dev_in_available(&ctx, LogicalDevice::ConIn));
    }
}
