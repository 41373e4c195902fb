//! Multitasking CP/M-3 (Plus) compatible operating environment core.
//!
//! This crate provides the core components for emulating a CP/M-3 session:
//! - `Hal`: paged guest memory, device routing, abort signalling
//! - `Bdos`: BDOS syscall handling, SCB, open-file cache, RSX chain
//! - `Bios`: 33-slot jump table and logical/physical device mapping
//! - `Ccp`: the built-in shell
//! - `Supervisor`: up to 12 concurrent sessions
//! - Virtual filesystem with overlay and host-backed drive support
//! - Console I/O abstraction
//!
//! # Architecture
//!
//! The emulator uses a layered design:
//! - `DriveFS` trait: Low-level drive filesystem (A-P)
//! - `CpmConsole` trait: Character I/O abstraction
//! - `CpmEmulator`: Integrates Z80 CPU with BDOS handling

pub mod bdos;
pub mod bios;
pub mod ccp;
pub mod console;
pub mod datetime;
pub mod emulator;
pub mod error;
pub mod fs;
pub mod hal;
pub mod scb;
pub mod supervisor;

pub use bios::Bios;
pub use ccp::{Ccp, CcpOutcome};
pub use console::{CpmConsole, HeadlessConsole};
pub use datetime::DateTime;
pub use emulator::CpmEmulator;
pub use error::{CpmError, CpmResult};
pub use fs::{to_8_3, DriveFS, HostDriveFS, MemoryDriveFS, OverlayDriveFS};
pub use hal::Hal;
pub use scb::Scb;
pub use supervisor::Supervisor;

/// Reason for program exit.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    /// Warm boot (JP 0 or BDOS function 0)
    WarmBoot,
    /// CPU halted
    Halt,
    /// BDOS function 47 (Chain to program): the command line to run next,
    /// already resolved from the DMA buffer.
    Chain(String),
    /// Error occurred
    Error(String),
}

/// Information about program exit.
#[derive(Debug, Clone)]
pub struct CpmExitInfo {
    pub reason: ExitReason,
    pub t_states: u64,
    pub pc: u16,
}
