//! CP/M-3 CLI - host entry point for the multitasking CP/M-3 compatible
//! operating environment.
//!
//! Usage:
//!   cpm -d A=./disks/a [-d B=./disks/b] [--trace]
//!   cpm -d A=./disks/a -- STAT           # run STAT.COM directly, no CCP
//!
//! The CCP (`cpm_core::Ccp`) is native Rust, not a loaded guest binary, so
//! the interactive loop below drives it directly and only hands control to
//! `CpmEmulator` for the duration of one transient program. Only session 0
//! is run interactively: `Supervisor` supports up to 12 concurrent sessions
//! (each with its own HAL/BDOS/BIOS/CCP), but a single physical terminal has
//! nowhere to show more than one foreground at a time, so `TERM` here prints
//! a notice instead of actually switching — see DESIGN.md.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use cpm_core::{CcpOutcome, CpmConsole, CpmEmulator, ExitReason, HostDriveFS, Supervisor};

/// CP/M-3 Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "cpm")]
#[command(about = "Run a multitasking CP/M-3 compatible session")]
struct Args {
    /// Mount a drive letter to a host directory, e.g. `-d A=./disks/a`
    #[arg(short = 'd', long = "drive", value_name = "LETTER=PATH")]
    drives: Vec<String>,

    /// Enable BDOS/BIOS syscall tracing
    #[arg(short, long)]
    trace: bool,

    /// Command and arguments to run once, instead of entering the CCP
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_drive_spec(spec: &str) -> Result<(u8, PathBuf), String> {
    let (letter, path) = spec
        .split_once('=')
        .ok_or_else(|| format!("drive spec `{}` must be LETTER=PATH", spec))?;
    let letter = letter.trim();
    if letter.len() != 1 || !letter.as_bytes()[0].is_ascii_alphabetic() {
        return Err(format!("invalid drive letter in `{}`", spec));
    }
    let drive = letter.to_ascii_uppercase().as_bytes()[0] - b'A';
    Ok((drive, PathBuf::from(path)))
}

/// Real-terminal-backed console. Keystrokes arrive over a channel fed by a
/// background reader thread; output goes straight to stdout with the same
/// CR/LF/backspace/bell translation CP/M programs expect from a physical
/// terminal.
struct TermConsole {
    key_rx: mpsc::Receiver<u8>,
    key_buffer: Vec<u8>,
}

impl TermConsole {
    fn new(key_rx: mpsc::Receiver<u8>) -> Self {
        Self { key_rx, key_buffer: Vec::new() }
    }
}

impl CpmConsole for TermConsole {
    fn write(&mut self, ch: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        match ch {
            0x0D => { let _ = handle.write_all(b"\r"); }
            0x0A => { let _ = handle.write_all(b"\n"); }
            0x08 => { let _ = handle.write_all(b"\x08 \x08"); }
            0x07 => { let _ = handle.write_all(b"\x07"); }
            _ => { let _ = handle.write_all(&[ch]); }
        }
        let _ = handle.flush();
    }

    fn has_key(&self) -> bool {
        !self.key_buffer.is_empty()
    }

    fn get_key(&mut self) -> Option<u8> {
        if !self.key_buffer.is_empty() {
            return Some(self.key_buffer.remove(0));
        }
        self.key_rx.try_recv().ok()
    }

    fn wait_for_key(&mut self) -> u8 {
        if !self.key_buffer.is_empty() {
            return self.key_buffer.remove(0);
        }
        self.key_rx.recv().unwrap_or(0)
    }
}

/// Translate crossterm key events to CP/M key codes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(upper as u8 - 64); // Ctrl+A=1, Ctrl+C=3, etc.
            }
        }
    }

    match code {
        KeyCode::Char(c) => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        _ => None,
    }
}

/// Read one line with the same backspace/CR handling BDOS function 10 gives
/// a guest program, but driven natively for the CCP's own prompt.
fn read_line(console: &mut dyn CpmConsole) -> Option<String> {
    let mut buf = String::new();
    loop {
        match console.wait_for_key() {
            13 | 10 => {
                console.write(b'\r');
                console.write(b'\n');
                return Some(buf);
            }
            3 => return None, // Ctrl-C: abandon the line
            8 | 127 => {
                if buf.pop().is_some() {
                    console.write(8);
                    console.write(b' ');
                    console.write(8);
                }
            }
            c if (32..127).contains(&c) => {
                buf.push(c as char);
                console.write(c);
            }
            _ => {}
        }
    }
}

fn write_str(console: &mut dyn CpmConsole, s: &str) {
    for b in s.bytes() {
        console.write(b);
    }
}

/// Locate `word` (with or without an extension) as a `.COM` on the current
/// drive and load-and-run it, mirroring `CCP::runCommand`.
fn run_transient(session: &mut cpm_core::supervisor::Session, trace: bool, line: &str) {
    let (word, tail) = line.split_once(' ').map(|(w, t)| (w, t.trim_start())).unwrap_or((line, ""));
    let upper = word.to_uppercase();
    let name = if upper.contains('.') { upper } else { format!("{}.COM", upper) };

    let drive_idx = session.bdos.scb.current_disk as usize;
    let data = session
        .bdos
        .drives
        .get(drive_idx)
        .and_then(|d| d.as_ref())
        .and_then(|fs| fs.read_file(&name));

    let Some(data) = data else {
        write_str(session.console.as_mut(), &format!("{}?\r\n", word.to_uppercase()));
        return;
    };

    let mut emu = CpmEmulator::new();
    emu.trace = trace;
    CpmEmulator::load_com(&mut session.hal, &data);
    CpmEmulator::set_args(&mut session.hal, tail);
    match emu.run(&mut session.hal, &mut session.bdos, &mut session.bios, session.console.as_mut()) {
        Ok(info) => {
            if trace {
                eprintln!("[{}] exited: {:?}", name, info.reason);
            }
            if let ExitReason::Chain(cmd) = info.reason {
                session.ccp.queue_chained_command(cmd);
            }
        }
        Err(e) => {
            write_str(session.console.as_mut(), &format!("Error running {}: {}\r\n", name, e));
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut drive_mounts = Vec::new();
    for spec in &args.drives {
        let (drive, path) = parse_drive_spec(spec).map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
        drive_mounts.push((drive, HostDriveFS::new(path)?));
    }
    if drive_mounts.is_empty() {
        return Err("at least one -d LETTER=PATH drive mount is required".into());
    }

    let (key_tx, key_rx) = mpsc::channel::<u8>();
    let console = TermConsole::new(key_rx);

    let mut supervisor = Supervisor::new();
    let session = supervisor
        .activate_session(0, || Box::new(console))
        .expect("session 0 is always in range");
    for (drive, fs) in drive_mounts {
        session.bdos.mount(drive, Box::new(fs));
    }
    session.bdos.trace = args.trace;

    let raw_mode_enabled = enable_raw_mode().is_ok();

    let reader_handle = std::thread::spawn(move || loop {
        match event::read() {
            Ok(Event::Key(key_event)) => {
                if let Some(ch) = translate_key(key_event.code, key_event.modifiers) {
                    if key_tx.send(ch).is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });

    if !args.command.is_empty() {
        let line = args.command.join(" ");
        let session = supervisor.session_mut(0).unwrap();
        run_transient(session, args.trace, &line);
    } else {
        loop {
            let Some(id) = supervisor.active_session_id() else { break };
            let session = supervisor.session_mut(id).unwrap();

            if session.ccp.cold_start_pending() {
                write_str(
                    session.console.as_mut(),
                    "Multisession/Multitasking CP/M 3 (Plus) Compatible System\r\n",
                );
                session.ccp.mark_cold_start_done();
            }

            let line = if let Some(cmd) = session.ccp.take_chained_command() {
                // A chained program's next command runs with no prompt and
                // no echo, same as the transient program it replaced.
                cmd
            } else if let Some(cmd) = session.ccp.take_pending_command() {
                let prompt = session.ccp.prompt(&session.bdos);
                write_str(session.console.as_mut(), &prompt);
                write_str(session.console.as_mut(), &cmd);
                session.console.write(b'\r');
                session.console.write(b'\n');
                cmd
            } else {
                let prompt = session.ccp.prompt(&session.bdos);
                write_str(session.console.as_mut(), &prompt);
                let Some(line) = read_line(session.console.as_mut()) else {
                    continue;
                };
                line
            };

            match session.ccp.run_line(&mut session.bdos, session.console.as_mut(), &line) {
                CcpOutcome::Handled => {}
                CcpOutcome::Transient(cmd) => run_transient(session, args.trace, &cmd),
                CcpOutcome::ExitSession => {
                    supervisor.close_session(id);
                }
                CcpOutcome::ActivateSession(_) => {
                    write_str(
                        session.console.as_mut(),
                        "Switching sessions needs a separate physical terminal; not available here.\r\n",
                    );
                }
            }
        }
    }

    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }
    drop(reader_handle); // detached: process exit reclaims the blocked reader thread

    Ok(())
}
