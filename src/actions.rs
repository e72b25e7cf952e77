use std::fmt;

use bitflags::bitflags;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::platform::Platform;

/// What to do when an idle timeout or battery emergency fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Nothing,
    Blank,
    Suspend,
    Hibernate,
    Interactive,
    Shutdown,
    Logout,
}

bitflags! {
    /// Session inhibitor classes, mirroring the desktop session manager's
    /// InhibitedActions property bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InhibitorFlags: u32 {
        const LOGOUT = 1 << 0;
        const SWITCH_USER = 1 << 1;
        const SUSPEND = 1 << 2;
        const IDLE = 1 << 3;
    }
}

impl PowerAction {
    const ALL: &'static [Self] = &[
        Self::Nothing,
        Self::Blank,
        Self::Suspend,
        Self::Hibernate,
        Self::Interactive,
        Self::Shutdown,
        Self::Logout,
    ];
    const NAMES: &'static [&'static str] = &[
        "nothing",
        "blank",
        "suspend",
        "hibernate",
        "interactive",
        "shutdown",
        "logout",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Blank => "blank",
            Self::Suspend => "suspend",
            Self::Hibernate => "hibernate",
            Self::Interactive => "interactive",
            Self::Shutdown => "shutdown",
            Self::Logout => "logout",
        }
    }

    /// Which inhibitor classes veto this action when held by an application.
    pub fn inhibitor_flags(&self) -> InhibitorFlags {
        match self {
            Self::Nothing => InhibitorFlags::empty(),
            Self::Blank | Self::Shutdown | Self::Interactive => InhibitorFlags::IDLE,
            Self::Suspend | Self::Hibernate => InhibitorFlags::SUSPEND,
            Self::Logout => InhibitorFlags::LOGOUT,
        }
    }

    /// Whether the sleep countdown for this action deserves an advance warning
    /// notice to the user.
    pub fn warns_before_sleep(&self) -> bool {
        matches!(self, Self::Suspend | Self::Hibernate | Self::Logout)
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PowerAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        for action in Self::ALL {
            if raw == action.as_str() {
                return Ok(*action);
            }
        }
        Err(de::Error::unknown_variant(&raw, Self::NAMES))
    }
}

/// Carry out a power action against the live system.
///
/// Failures are logged and swallowed: a refused suspend must never take the
/// daemon down, and the idle machinery keeps running either way.
pub async fn perform(action: PowerAction, platform: &Platform) {
    debug!(action = %action, "performing power action");
    let outcome = match action {
        PowerAction::Nothing => Ok(()),
        PowerAction::Blank => platform.display.dpms_off().await,
        PowerAction::Suspend => platform.sleep.suspend().await,
        PowerAction::Hibernate => platform.sleep.hibernate().await,
        PowerAction::Shutdown => platform.sleep.power_off().await,
        PowerAction::Interactive => platform.session.shutdown_dialog().await,
        PowerAction::Logout => platform.session.logout().await,
    };
    if let Err(err) = outcome {
        warn!(action = %action, error = %err, "power action failed");
    }
}
