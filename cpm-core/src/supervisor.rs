//! Supervisor: up to 12 concurrent CP/M-3 sessions.
//!
//! Grounded in `original_source/.../supervisor.cpp`: a fixed-size session
//! table (`MAXSESSIONS`), lazy session creation on first activation, and
//! `abortSession` signalling a running session's `Hal` to stop. The
//! original spawns a FreeRTOS task per session and owns the physical
//! terminal; here session bookkeeping and per-session state live in
//! `Supervisor`, while actually running a session's CCP loop on an OS
//! thread (or inline) is left to the caller (`cpm-cli`), which is in a
//! better position to own real terminals and thread lifetimes.

use crate::bios::Bios;
use crate::ccp::Ccp;
use crate::console::CpmConsole;
use crate::hal::{AbortReason, Hal};
use crate::bdos::Bdos;

pub const MAX_SESSIONS: usize = 12;

/// One session's full state: its own guest memory, BDOS/BIOS instances,
/// shell and console. Independent of every other session — CP/M-3
/// sessions on this system do not share guest memory or open files.
pub struct Session {
    pub id: usize,
    pub hal: Hal,
    pub bdos: Bdos,
    pub bios: Bios,
    pub ccp: Ccp,
    pub console: Box<dyn CpmConsole>,
}

impl Session {
    fn new(id: usize, console: Box<dyn CpmConsole>) -> Self {
        Self {
            id,
            hal: Hal::new(),
            bdos: Bdos::new(),
            bios: Bios::new(),
            ccp: Ccp::new(),
            console,
        }
    }
}

/// Tracks the session table and which session is currently in the
/// foreground. Mirrors `Supervisor::m_sessions`/`m_activeSessionID`.
pub struct Supervisor {
    sessions: Vec<Option<Session>>,
    active_session_id: Option<usize>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            sessions: (0..MAX_SESSIONS).map(|_| None).collect(),
            active_session_id: None,
        }
    }

    /// Bring session `id` to the foreground, creating it via `make_console`
    /// if this is its first activation. Returns `None` if `id` is out of
    /// range; `make_console` is only called for a session that doesn't
    /// exist yet, matching `createTerminal`'s lazy-allocation pattern.
    pub fn activate_session(
        &mut self,
        id: usize,
        make_console: impl FnOnce() -> Box<dyn CpmConsole>,
    ) -> Option<&mut Session> {
        if id >= MAX_SESSIONS {
            return None;
        }
        if self.sessions[id].is_none() {
            self.sessions[id] = Some(Session::new(id, make_console()));
        }
        self.active_session_id = Some(id);
        self.sessions[id].as_mut()
    }

    /// Signal a running session to stop. The session's own loop notices
    /// `hal.aborting()` and unwinds; a real terminal also needs a queued
    /// CTRL-C to unblock a `wait_for_key` call, which the caller should
    /// inject into the session's console before or after calling this.
    pub fn abort_session(&mut self, id: usize, reason: AbortReason) {
        if let Some(session) = self.sessions.get_mut(id).and_then(|s| s.as_mut()) {
            session.hal.abort(reason);
        }
    }

    /// Drop a terminated session's state, freeing its slot for reuse.
    pub fn close_session(&mut self, id: usize) {
        if id < MAX_SESSIONS {
            self.sessions[id] = None;
            if self.active_session_id == Some(id) {
                self.active_session_id = None;
            }
        }
    }

    pub fn session(&self, id: usize) -> Option<&Session> {
        self.sessions.get(id).and_then(|s| s.as_ref())
    }

    pub fn session_mut(&mut self, id: usize) -> Option<&mut Session> {
        self.sessions.get_mut(id).and_then(|s| s.as_mut())
    }

    pub fn active_session_id(&self) -> Option<usize> {
        self.active_session_id
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;

    #[test]
    fn test_activate_session_creates_lazily() {
        let mut sup = Supervisor::new();
        assert_eq!(sup.open_sessions(), 0);
        sup.activate_session(0, || Box::new(HeadlessConsole::new()));
        assert_eq!(sup.open_sessions(), 1);
        assert_eq!(sup.active_session_id(), Some(0));
    }

    #[test]
    fn test_reactivating_reuses_session() {
        let mut sup = Supervisor::new();
        sup.activate_session(2, || Box::new(HeadlessConsole::new()));
        sup.session_mut(2).unwrap().bdos.scb.current_disk = 3;
        sup.activate_session(2, || Box::new(HeadlessConsole::new()));
        assert_eq!(sup.session(2).unwrap().bdos.scb.current_disk, 3);
    }

    #[test]
    fn test_abort_session_sets_hal_reason() {
        let mut sup = Supervisor::new();
        sup.activate_session(0, || Box::new(HeadlessConsole::new()));
        sup.abort_session(0, AbortReason::SessionClosed);
        assert_eq!(sup.session(0).unwrap().hal.abort_reason(), AbortReason::SessionClosed);
    }

    #[test]
    fn test_close_session_frees_slot() {
        let mut sup = Supervisor::new();
        sup.activate_session(0, || Box::new(HeadlessConsole::new()));
        sup.close_session(0);
        assert_eq!(sup.open_sessions(), 0);
        assert_eq!(sup.active_session_id(), None);
    }

    #[test]
    fn test_out_of_range_id_rejected() {
        let mut sup = Supervisor::new();
        assert!(sup.activate_session(99, || Box::new(HeadlessConsole::new())).is_none());
    }
}
