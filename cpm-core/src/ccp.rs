//! CCP: the built-in command processor (shell).
//!
//! Grounded in `original_source/.../CCP.cpp`: a line editor that reads one
//! command line, checks it against a fixed table of built-ins (`DIR`,
//! `CD`, `ERASE`, `TYPE`, `RENAME`, `PATH`, `MKDIR`, `RMDIR`, `COPY`,
//! `HELP`, `TERM`, `EXIT`, `INFO`, `DINFO`) and, if none match, hands the
//! line to `runCommand` to load and execute a transient `.COM` program.
//!
//! Unlike the original (which pokes fixed TPA addresses and calls BDOS
//! through the Z80 calling convention even for its own built-ins), this
//! port drives `Bdos` directly through its Rust methods and a small
//! scratch FCB/DMA buffer it owns — the guest's 64 KiB address space is
//! reserved for actual guest programs.

use std::collections::VecDeque;

use crate::bdos::fcb::Fcb;
use crate::bdos::{Bdos, RECORD_SIZE};
use crate::console::CpmConsole;

const SCRATCH_FCB1: u16 = 0;
const SCRATCH_DMA: u16 = 72;
const SCRATCH_SIZE: usize = 72 + 128;

struct BuiltinDesc {
    name: &'static str,
    desc: &'static str,
}

const BUILTINS: &[BuiltinDesc] = &[
    BuiltinDesc { name: "DIR", desc: "Directory view." },
    BuiltinDesc { name: "CD", desc: "Display/change the current directory." },
    BuiltinDesc { name: "ERA", desc: "Remove one or more files (aliases: ERASE, DEL, RM)." },
    BuiltinDesc { name: "HELP", desc: "Show help (alias: ?)." },
    BuiltinDesc { name: "RENAME", desc: "Rename one or more files (alias: REN)." },
    BuiltinDesc { name: "TYPE", desc: "Display the contents of a text file (alias: CAT)." },
    BuiltinDesc { name: "PATH", desc: "Get/set locations where to look for programs." },
    BuiltinDesc { name: "MKDIR", desc: "Make directory (alias: MD)." },
    BuiltinDesc { name: "RMDIR", desc: "Remove directory." },
    BuiltinDesc { name: "COPY", desc: "Improved file copy (alias: CP)." },
    BuiltinDesc { name: "INFO", desc: "Show system info." },
    BuiltinDesc { name: "DINFO", desc: "Show debug info." },
    BuiltinDesc { name: "TERM", desc: "Select a terminal session." },
    BuiltinDesc { name: "EXIT", desc: "Exit current or specified session." },
];

/// What running one command line resulted in.
pub enum CcpOutcome {
    /// Handled entirely by a built-in.
    Handled,
    /// Not a built-in: the caller should load and run this as a transient
    /// program (the command word plus the raw tail, unparsed).
    Transient(String),
    /// `EXIT` with no argument: this session should close.
    ExitSession,
    /// `TERM <id>`: activate session `id` (0-based).
    ActivateSession(usize),
}

/// The CCP's per-session state: just the search path and whether this is
/// the first prompt after a cold boot (drives `PROFILE.SUB` semantics,
/// simplified here to "run it once if present").
pub struct Ccp {
    search_path: String,
    cold_start_done: bool,
    /// Commands split off an unescaped `!` in a prior line, still waiting to
    /// run. Each is read back through the normal prompt-and-echo path.
    pending_commands: VecDeque<String>,
    /// Set by BDOS function 47 (Chain): the next command to run, with no
    /// prompt and no echo, the way the original's `runCommand` loop treats
    /// a chained program.
    chained_command: Option<String>,
}

impl Ccp {
    pub fn new() -> Self {
        Self {
            search_path: String::new(),
            cold_start_done: false,
            pending_commands: VecDeque::new(),
            chained_command: None,
        }
    }

    pub fn cold_start_pending(&self) -> bool {
        !self.cold_start_done
    }

    pub fn mark_cold_start_done(&mut self) {
        self.cold_start_done = true;
    }

    /// Record the command BDOS function 47 wants to run next.
    pub fn queue_chained_command(&mut self, cmd: String) {
        self.chained_command = Some(cmd);
    }

    /// Take the chained command, if one is pending. The caller runs it
    /// without a prompt or echo.
    pub fn take_chained_command(&mut self) -> Option<String> {
        self.chained_command.take()
    }

    /// Take the next `!`-queued command, if one is pending. The caller
    /// prompts and echoes it like a line the user typed.
    pub fn take_pending_command(&mut self) -> Option<String> {
        self.pending_commands.pop_front()
    }

    /// Render the `drive:path>` prompt for the current BDOS state.
    pub fn prompt(&self, bdos: &Bdos) -> String {
        let drive = Bdos::drive_letter(bdos.scb.current_disk);
        let dir = bdos.current_dir();
        if dir.is_empty() {
            format!("{}>", drive)
        } else {
            format!("{}:{}>", drive, dir)
        }
    }

    /// Run one already-trimmed, already-uppercased-where-needed command
    /// line. `console` receives built-in output; `bdos` is mutated for
    /// directory/drive changes and file operations.
    pub fn run_line(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, line: &str) -> CcpOutcome {
        let line = line.trim();
        if line.is_empty() {
            return CcpOutcome::Handled;
        }

        // ";" prefixes a pure comment line: never executed.
        if line.starts_with(';') {
            return CcpOutcome::Handled;
        }

        // ":" prefixes a conditional line: run only if the last program
        // returned an error (SCB program return code nonzero).
        let line = match line.strip_prefix(':') {
            Some(rest) if bdos.scb.program_return_code == 0 => {
                let _ = rest;
                return CcpOutcome::Handled;
            }
            Some(rest) => rest.trim_start(),
            None => line,
        };
        if line.is_empty() {
            return CcpOutcome::Handled;
        }

        // "!" separates this command from one queued to run right after it;
        // "!!" is the escape for a literal "!".
        let (line, queued) = Self::split_bang(line);
        if let Some(queued) = queued {
            self.pending_commands.push_back(queued);
        }
        let line = line.trim();
        if line.is_empty() {
            return CcpOutcome::Handled;
        }

        // bare drive change, e.g. "B:"
        if line.len() == 2 && line.ends_with(':') && line.as_bytes()[0].is_ascii_alphabetic() {
            let drive = line.as_bytes()[0].to_ascii_uppercase() - b'A';
            if bdos.drives.get(drive as usize).map(|d| d.is_some()).unwrap_or(false) {
                bdos.scb.current_disk = drive;
            } else {
                self.write_line(console, "Invalid Drive");
            }
            return CcpOutcome::Handled;
        }

        let (word, tail) = match line.split_once(' ') {
            Some((w, t)) => (w, t.trim_start()),
            None => (line, ""),
        };
        let word_upper = word.to_uppercase();

        match word_upper.as_str() {
            "DIR" => self.cmd_dir(bdos, console, tail),
            "LS" => self.cmd_dir(bdos, console, tail),
            "CD" => self.cmd_cd(bdos, console, tail),
            "ERA" | "ERASE" | "DEL" | "DELETE" | "RM" => self.cmd_erase(bdos, console, tail),
            "HELP" | "?" => self.cmd_help(console),
            "RENAME" | "REN" => self.cmd_rename(bdos, console, tail),
            "TYPE" | "CAT" => self.cmd_type(bdos, console, tail),
            "PATH" => self.cmd_path(console, tail),
            "MKDIR" | "MD" => self.cmd_mkdir(bdos, console, tail),
            "RMDIR" => self.cmd_rmdir(bdos, console, tail),
            "COPY" | "CP" => self.cmd_copy(bdos, console, tail),
            "INFO" => self.cmd_info(console),
            "DINFO" => self.cmd_dinfo(bdos, console),
            "TERM" => return self.cmd_term(console, tail),
            "EXIT" => {
                if tail.is_empty() {
                    return CcpOutcome::ExitSession;
                }
                self.write_line(console, "Usage: EXIT");
            }
            _ => return CcpOutcome::Transient(line.to_string()),
        }
        CcpOutcome::Handled
    }

    /// Split `line` on the first unescaped `!`. `!!` collapses to a literal
    /// `!` and does not split. Returns the (possibly unwrapped) command and,
    /// if a real separator was found, the trimmed remainder.
    fn split_bang(line: &str) -> (String, Option<String>) {
        let bytes = line.as_bytes();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'!' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'!' {
                    out.push('!');
                    i += 2;
                    continue;
                }
                let remainder = line[i + 1..].trim().to_string();
                return (out, if remainder.is_empty() { None } else { Some(remainder) });
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        (out, None)
    }

    fn write_line(&self, console: &mut dyn CpmConsole, s: &str) {
        for b in s.bytes() {
            console.write(b);
        }
        console.write(b'\r');
        console.write(b'\n');
    }

    fn write(&self, console: &mut dyn CpmConsole, s: &str) {
        for b in s.bytes() {
            console.write(b);
        }
    }

    fn cmd_help(&self, console: &mut dyn CpmConsole) {
        self.write_line(console, "Built-in commands:");
        for b in BUILTINS {
            self.write_line(console, &format!("  {:<10} {}", b.name, b.desc));
        }
        self.write_line(console, "  F1...F12   Use function keys to create or switch sessions.");
    }

    fn cmd_cd(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() {
            let drive = Bdos::drive_letter(bdos.scb.current_disk);
            self.write_line(console, &format!("{}:\\{}", drive, bdos.current_dir()));
        } else if bdos.change_directory(tail).is_err() {
            self.write_line(console, "Path not found");
        }
    }

    fn cmd_dir(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        let spec = if tail.is_empty() { "*.*".to_string() } else { tail.to_string() };
        let mut scratch = vec![0u8; SCRATCH_SIZE];
        let parsed = {
            let mut fcb = Fcb::new(&mut scratch[SCRATCH_FCB1 as usize..SCRATCH_FCB1 as usize + 36]);
            fcb.parse_filename(&spec)
        };
        let _ = parsed;
        bdos.dispatch(26, SCRATCH_DMA, &mut scratch); // SetDmaAddress
        let mut r = bdos.dispatch(17, SCRATCH_FCB1, &mut scratch); // SearchFirst
        let mut count = 0;
        while r.a < 4 {
            let dma = &scratch[SCRATCH_DMA as usize..SCRATCH_DMA as usize + 128];
            for slot in 0..4usize.min((r.a as usize) + 1) {
                let entry = &dma[slot * 32..slot * 32 + 32];
                if entry[0] == 0xE5 {
                    continue;
                }
                let name = String::from_utf8_lossy(&entry[1..9]).trim().to_string();
                let ext = String::from_utf8_lossy(&entry[9..12]).trim().to_string();
                if ext.is_empty() {
                    self.write_line(console, &name);
                } else {
                    self.write_line(console, &format!("{}.{}", name, ext));
                }
                count += 1;
            }
            r = bdos.dispatch(18, 0, &mut scratch); // SearchNext
        }
        if count == 0 {
            self.write_line(console, "No file");
        }
    }

    fn cmd_erase(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() {
            self.write_line(console, "Enter a filename");
            return;
        }
        let has_wildcard = tail.contains('*') || tail.contains('?');
        if has_wildcard {
            self.write(console, &format!("Erase {} (Y/N)? ", tail));
            if !self.confirm(console) {
                return;
            }
        }
        let mut scratch = vec![0u8; SCRATCH_SIZE];
        {
            let mut fcb = Fcb::new(&mut scratch[SCRATCH_FCB1 as usize..SCRATCH_FCB1 as usize + 36]);
            fcb.parse_filename(tail);
        }
        let r = bdos.dispatch(19, SCRATCH_FCB1, &mut scratch); // DeleteFile
        if r.a == 0xFF {
            self.write_line(console, "No file");
        }
    }

    fn cmd_rename(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        let sep = tail.find('=').or_else(|| tail.find(' '));
        let Some(sep) = sep else {
            self.write_line(console, "Usage: RENAME newname=oldname");
            return;
        };
        let new_name = tail[..sep].trim();
        let old_name = tail[sep + 1..].trim();
        if new_name.is_empty() || old_name.is_empty() || new_name.contains(['*', '?']) || old_name.contains(['*', '?']) {
            self.write_line(console, "Usage: RENAME newname=oldname");
            return;
        }
        // source FCB at byte 0, dest FCB at byte 16 (they share bytes 16-35)
        let mut scratch = vec![0u8; 52];
        {
            let mut fcb = Fcb::new(&mut scratch[0..36]);
            fcb.parse_filename(old_name);
        }
        {
            let mut fcb = Fcb::new(&mut scratch[16..52]);
            fcb.parse_filename(new_name);
        }
        let r = bdos.dispatch(23, 0, &mut scratch); // RenameFile
        if r.a != 0 {
            self.write_line(console, "No file");
        }
    }

    fn cmd_type(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() || tail.contains(['*', '?']) {
            self.write_line(console, "Usage: TYPE filename");
            return;
        }
        let mut scratch = vec![0u8; SCRATCH_SIZE];
        {
            let mut fcb = Fcb::new(&mut scratch[SCRATCH_FCB1 as usize..SCRATCH_FCB1 as usize + 36]);
            fcb.parse_filename(tail);
        }
        let r = bdos.dispatch(15, SCRATCH_FCB1, &mut scratch); // OpenFile
        if r.a != 0 {
            self.write_line(console, "No file");
            return;
        }
        bdos.dispatch(26, SCRATCH_DMA, &mut scratch); // SetDmaAddress
        loop {
            let r = bdos.dispatch(20, SCRATCH_FCB1, &mut scratch); // ReadSequential
            if r.a != 0 {
                break;
            }
            for i in 0..RECORD_SIZE {
                let c = scratch[SCRATCH_DMA as usize + i];
                if c == 0x1A {
                    break;
                }
                console.write(c);
            }
        }
        bdos.dispatch(16, SCRATCH_FCB1, &mut scratch); // CloseFile
    }

    fn cmd_path(&mut self, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() {
            if self.search_path.is_empty() {
                self.write_line(console, "No Path");
            } else {
                let p = self.search_path.clone();
                self.write_line(console, &p);
            }
        } else {
            self.search_path = tail.to_string();
        }
    }

    fn cmd_mkdir(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() {
            self.write_line(console, "No directory name specified");
            return;
        }
        let mut scratch = vec![0u8; SCRATCH_SIZE];
        {
            let mut fcb = Fcb::new(&mut scratch[SCRATCH_FCB1 as usize..SCRATCH_FCB1 as usize + 36]);
            fcb.parse_filename(tail);
            fcb.set_create_directory(true);
        }
        bdos.dispatch(22, SCRATCH_FCB1, &mut scratch); // MakeFile
    }

    fn cmd_rmdir(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        if tail.is_empty() {
            self.write_line(console, "No directory name specified");
            return;
        }
        self.write(console, &format!("Remove {} (Y/N)? ", tail));
        if !self.confirm(console) {
            return;
        }
        let mut scratch = vec![0u8; SCRATCH_SIZE];
        {
            let mut fcb = Fcb::new(&mut scratch[SCRATCH_FCB1 as usize..SCRATCH_FCB1 as usize + 36]);
            fcb.parse_filename(&format!("{}{}", tail, crate::bdos::fcb::DIRECTORY_EXT));
        }
        let r = bdos.dispatch(19, SCRATCH_FCB1, &mut scratch); // DeleteFile
        if r.a == 0xFF {
            self.write_line(console, "No directory");
        }
    }

    fn cmd_copy(&mut self, bdos: &mut Bdos, console: &mut dyn CpmConsole, tail: &str) {
        let Some((src, dst)) = tail.split_once(' ') else {
            self.write_line(console, "No source or destination specified");
            return;
        };
        let src = src.trim();
        let dst = dst.trim();
        if src.is_empty() || dst.is_empty() {
            self.write_line(console, "No source or destination specified");
            return;
        }
        // source FCB at byte 0, dest FCB at byte 16 (rename-FCB convention:
        // the two 36-byte FCBs share bytes 16-35)
        let mut scratch = vec![0u8; 52];
        {
            let mut fcb = Fcb::new(&mut scratch[0..36]);
            fcb.parse_filename(src);
        }
        {
            let mut fcb = Fcb::new(&mut scratch[16..52]);
            fcb.parse_filename(dst);
        }
        let r = bdos.dispatch(212, 0, &mut scratch); // VendorCopyFile
        match r.a {
            1 => self.write_line(console, "Error, source doesn't exist"),
            2 => self.write_line(console, "Error, destination already exists"),
            3 => self.write_line(console, "Error, write failed"),
            4 => self.write_line(console, "Error, source and dest match"),
            _ => {}
        }
    }

    fn cmd_info(&self, console: &mut dyn CpmConsole) {
        self.write_line(console, "Multisession/Multitasking CP/M 3 (Plus) Compatible System");
        self.write_line(console, "Type \"help\" to get the command list.");
    }

    fn cmd_dinfo(&self, bdos: &mut Bdos, console: &mut dyn CpmConsole) {
        self.write_line(console, &format!("Zombie files  : {}", bdos.cache.open_count()));
        self.write_line(console, &format!("RSX installed : {}", if bdos.rsx.count() == 0 { "N" } else { "Y" }));
    }

    fn cmd_term(&mut self, console: &mut dyn CpmConsole, tail: &str) -> CcpOutcome {
        if tail.is_empty() {
            self.write_line(console, "Usage: TERM 0-11");
            return CcpOutcome::Handled;
        }
        match tail.trim().parse::<usize>() {
            Ok(id) if id < 12 => CcpOutcome::ActivateSession(id),
            _ => {
                self.write_line(console, "Invalid parameters");
                CcpOutcome::Handled
            }
        }
    }

    fn confirm(&self, console: &mut dyn CpmConsole) -> bool {
        let c = console.wait_for_key();
        self.write_line(console, "");
        c == b'y' || c == b'Y'
    }
}

impl Default for Ccp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::fs::MemoryDriveFS;

    fn setup() -> (Bdos, HeadlessConsole) {
        let mut bdos = Bdos::new();
        let mut fs = MemoryDriveFS::new();
        fs.add_file_str("HELLO.TXT", "hi there");
        bdos.mount(0, Box::new(fs));
        (bdos, HeadlessConsole::new())
    }

    #[test]
    fn test_prompt_shows_drive_and_dir() {
        let (bdos, _) = setup();
        let ccp = Ccp::new();
        assert_eq!(ccp.prompt(&bdos), "A>");
    }

    #[test]
    fn test_type_prints_file_contents() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, "TYPE HELLO.TXT");
        assert!(matches!(outcome, CcpOutcome::Handled));
        assert_eq!(console.output(), b"hi there");
    }

    #[test]
    fn test_unknown_command_is_transient() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, "MYPROG.COM arg1");
        assert!(matches!(outcome, CcpOutcome::Transient(ref s) if s == "MYPROG.COM arg1"));
    }

    #[test]
    fn test_exit_with_no_args_ends_session() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        assert!(matches!(ccp.run_line(&mut bdos, &mut console, "EXIT"), CcpOutcome::ExitSession));
    }

    #[test]
    fn test_cd_changes_current_dir() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        ccp.run_line(&mut bdos, &mut console, "CD BIN");
        assert_eq!(bdos.current_dir(), "BIN");
    }

    #[test]
    fn test_semicolon_line_is_a_pure_comment() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, "; this is a comment EXIT");
        assert!(matches!(outcome, CcpOutcome::Handled));
        assert_eq!(bdos.current_dir(), "");
    }

    #[test]
    fn test_colon_line_runs_only_after_an_error() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, ":CD BIN");
        assert!(matches!(outcome, CcpOutcome::Handled));
        assert_eq!(bdos.current_dir(), "");

        bdos.scb.program_return_code = 1;
        ccp.run_line(&mut bdos, &mut console, ":CD BIN");
        assert_eq!(bdos.current_dir(), "BIN");
    }

    #[test]
    fn test_bang_splits_and_queues_the_remainder() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, "CD BIN ! CD SUB");
        assert!(matches!(outcome, CcpOutcome::Handled));
        assert_eq!(bdos.current_dir(), "BIN");
        assert_eq!(ccp.take_pending_command().as_deref(), Some("CD SUB"));
        assert_eq!(ccp.take_pending_command(), None);
    }

    #[test]
    fn test_double_bang_is_a_literal_bang() {
        let (mut bdos, mut console) = setup();
        let mut ccp = Ccp::new();
        let outcome = ccp.run_line(&mut bdos, &mut console, "MYPROG.COM a!!b");
        assert!(matches!(outcome, CcpOutcome::Transient(ref s) if s == "MYPROG.COM a!b"));
        assert_eq!(ccp.take_pending_command(), None);
    }

    #[test]
    fn test_chained_command_round_trip() {
        let mut ccp = Ccp::new();
        assert_eq!(ccp.take_chained_command(), None);
        ccp.queue_chained_command("DIR".to_string());
        assert_eq!(ccp.take_chained_command().as_deref(), Some("DIR"));
        assert_eq!(ccp.take_chained_command(), None);
    }
}
