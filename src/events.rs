use tokio::sync::oneshot;

use crate::actions::InhibitorFlags;
use crate::battery::PowerDevice;
use crate::config::Config;
use crate::inhibit::{InhibitorLease, LeaseKind};
use crate::scheduler::WatchKind;

/// Everything that can happen to the daemon, delivered over one channel and
/// dispatched in order by the manager task. Collaborator listeners only
/// translate their wire traffic into these; they never touch state.
#[derive(Debug)]
pub enum Event {
    /// The user touched an input device.
    UserActivity,
    /// An armed idle watch ran out. Stale generations are dropped by the
    /// manager, so a watch disarmed after its timer task fired is harmless.
    WatchFired { kind: WatchKind, generation: u64 },
    SessionActiveChanged(bool),
    InhibitorsChanged(InhibitorFlags),
    ScreensaverActiveChanged(bool),
    OnBatteryChanged(bool),
    LidClosedChanged(bool),
    DisplayTopologyChanged,
    /// About-to-sleep (true) or resumed (false) from the sleep transport.
    PrepareForSleep(bool),
    DeviceAdded(PowerDevice),
    DeviceRemoved(String),
    DeviceChanged(PowerDevice),
    /// Completion of an asynchronous inhibitor acquire. `None` means the
    /// transport refused; the slot is returned to not-held.
    LeaseAcquired {
        kind: LeaseKind,
        lease: Option<InhibitorLease>,
    },
    /// The grace period after an Action-level warning ran out.
    CriticalActionDue,
    /// Periodic re-check of whether the lid-switch lease is still needed.
    LidSafetyCheck,
    /// The temporary un-idle window after plugging into AC ran out.
    UnidleGraceElapsed,
    /// A freshly loaded (and already validated) configuration to adopt.
    ConfigChanged(Config),
    Control(ControlRequest),
}

/// Externally invocable operations, answered over a oneshot channel.
#[derive(Debug)]
pub enum ControlRequest {
    StepBrightness {
        target: BrightnessTarget,
        direction: StepDirection,
        reply: oneshot::Sender<anyhow::Result<u32>>,
    },
    ToggleKeyboardBacklight {
        reply: oneshot::Sender<anyhow::Result<u32>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessTarget {
    Display,
    Keyboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Up,
    Down,
}
