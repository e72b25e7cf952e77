use std::collections::HashMap;
use std::fmt;
use std::os::fd::OwnedFd;

use tracing::debug;

/// The two OS-level inhibitor leases the daemon may hold at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
    /// Block the OS's own lid-switch handling while we manage the lid.
    LidSwitch,
    /// Delay system sleep long enough to blank the display and tidy up.
    SleepPrepare,
}

impl LeaseKind {
    /// Inhibitor class name on the sleep transport.
    pub fn what(&self) -> &'static str {
        match self {
            Self::LidSwitch => "handle-lid-switch",
            Self::SleepPrepare => "sleep",
        }
    }

    /// Block vs delay semantics on the sleep transport.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::LidSwitch => "block",
            Self::SleepPrepare => "delay",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::LidSwitch => "external monitor attached",
            Self::SleepPrepare => "blanking the display before sleep",
        }
    }
}

impl fmt::Display for LeaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.what())
    }
}

/// A held inhibitor. The kernel-side hold lasts exactly as long as the
/// descriptor is open, so dropping the lease is the release.
#[derive(Debug)]
pub struct InhibitorLease {
    kind: LeaseKind,
    _fd: OwnedFd,
}

impl InhibitorLease {
    pub fn new(kind: LeaseKind, fd: OwnedFd) -> Self {
        Self { kind, _fd: fd }
    }

    pub fn kind(&self) -> LeaseKind {
        self.kind
    }
}

#[derive(Debug, Default)]
enum LeaseState {
    #[default]
    NotHeld,
    /// An acquire call is in flight; a second acquire must not be issued.
    Acquiring,
    Held(InhibitorLease),
}

/// Tracks at most one lease per kind across asynchronous acquisition.
///
/// `begin_acquire` reserves the slot before the transport call goes out, so
/// two back-to-back inhibit requests can never race into two held leases.
#[derive(Debug, Default)]
pub struct LeaseTable {
    states: HashMap<LeaseKind, LeaseState>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and changes nothing) if the lease is already held or
    /// being acquired.
    pub fn begin_acquire(&mut self, kind: LeaseKind) -> bool {
        let state = self.states.entry(kind).or_default();
        if matches!(state, LeaseState::NotHeld) {
            *state = LeaseState::Acquiring;
            true
        } else {
            false
        }
    }

    /// Record the outcome of an in-flight acquire. A `None` lease (the
    /// transport call failed) returns the slot to not-held.
    pub fn finish_acquire(&mut self, kind: LeaseKind, lease: Option<InhibitorLease>) {
        let state = self.states.entry(kind).or_default();
        *state = match lease {
            Some(lease) => {
                debug!(lease = %kind, "inhibitor lease held");
                LeaseState::Held(lease)
            }
            None => LeaseState::NotHeld,
        };
    }

    /// Idempotent release. Returns true if a lease was actually dropped.
    pub fn release(&mut self, kind: LeaseKind) -> bool {
        match self.states.insert(kind, LeaseState::NotHeld) {
            Some(LeaseState::Held(_)) => {
                debug!(lease = %kind, "inhibitor lease released");
                true
            }
            _ => false,
        }
    }

    /// Held or currently being acquired.
    pub fn is_engaged(&self, kind: LeaseKind) -> bool {
        !matches!(
            self.states.get(&kind),
            None | Some(LeaseState::NotHeld)
        )
    }

    pub fn is_held(&self, kind: LeaseKind) -> bool {
        matches!(self.states.get(&kind), Some(LeaseState::Held(_)))
    }

    pub fn release_all(&mut self) {
        for kind in [LeaseKind::LidSwitch, LeaseKind::SleepPrepare] {
            self.release(kind);
        }
    }
}
