use std::fmt;
use std::time::Duration;

use crate::actions::PowerAction;

/// Power device classes as reported by the device enumeration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Unknown,
    LinePower,
    Battery,
    Ups,
    Monitor,
    Mouse,
    Keyboard,
    Pda,
    Phone,
    MediaPlayer,
    Tablet,
    Computer,
}

impl DeviceKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::LinePower,
            2 => Self::Battery,
            3 => Self::Ups,
            4 => Self::Monitor,
            5 => Self::Mouse,
            6 => Self::Keyboard,
            7 => Self::Pda,
            8 => Self::Phone,
            9 => Self::MediaPlayer,
            10 => Self::Tablet,
            11 => Self::Computer,
            _ => Self::Unknown,
        }
    }

    /// Batteries, UPSes and line power feed the composite display device;
    /// everything else is tracked as an individual peripheral.
    pub fn tracked_individually(&self) -> bool {
        !matches!(self, Self::Battery | Self::Ups | Self::LinePower)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "device",
            Self::LinePower => "AC adapter",
            Self::Battery => "battery",
            Self::Ups => "UPS",
            Self::Monitor => "monitor",
            Self::Mouse => "mouse",
            Self::Keyboard => "keyboard",
            Self::Pda => "PDA",
            Self::Phone => "phone",
            Self::MediaPlayer => "media player",
            Self::Tablet => "tablet",
            Self::Computer => "attached computer",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Escalating charge-state classification. Monotonic within a discharge
/// cycle; drops back to `None` once the device charges again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WarningLevel {
    #[default]
    None,
    Discharging,
    Low,
    Critical,
    Action,
}

impl WarningLevel {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            2 => Self::Discharging,
            3 => Self::Low,
            4 => Self::Critical,
            5 => Self::Action,
            _ => Self::None,
        }
    }

    pub fn is_low_or_worse(&self) -> bool {
        *self >= Self::Low
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Discharging => "discharging",
            Self::Low => "low",
            Self::Critical => "critical",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one enumerated power device. `id` is the enumeration
/// service's stable object path for the device. The composite device
/// aggregates all physical batteries; raw batteries stay silent in its
/// favor.
#[derive(Debug, Clone)]
pub struct PowerDevice {
    pub id: String,
    pub kind: DeviceKind,
    pub percentage: f64,
    pub time_to_empty: Option<Duration>,
    pub warning: WarningLevel,
    pub composite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

/// How long a notice stays on screen. Short and Long resolve to the
/// configured notification timeouts; Never-expiring notices stay until
/// explicitly closed or acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeTimeout {
    Short,
    Long,
    Never,
}

/// Replacement classes for on-screen notices: showing a notice of a class
/// replaces the previous one of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeClass {
    Low,
    UpsDischarging,
    SleepWarning,
    Brightness,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub summary: String,
    pub body: String,
    pub urgency: Urgency,
    pub timeout: NoticeTimeout,
}

/// Named feedback sounds, fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundEvent {
    BatteryLow,
    BatteryCaution,
    LidClose,
    LidOpen,
}

impl SoundEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatteryLow => "battery-low",
            Self::BatteryCaution => "battery-caution",
            Self::LidClose => "lid-close",
            Self::LidOpen => "lid-open",
        }
    }
}

fn remaining(device: &PowerDevice) -> String {
    match device.time_to_empty {
        Some(left) if !left.is_zero() => format!(
            "Approximately {} remaining ({:.0}%).",
            humantime::format_duration(Duration::from_secs(left.as_secs())),
            device.percentage
        ),
        _ => format!("{:.0}% of capacity remaining.", device.percentage),
    }
}

/// Compose the user-facing notice for a device entering `level`.
///
/// Returns `None` for levels that carry no notice (including the reset back
/// to `WarningLevel::None`, which the caller handles by closing notices).
pub fn notice_for(device: &PowerDevice, critical_policy: PowerAction) -> Option<Notice> {
    let notice = match (device.warning, device.kind) {
        (WarningLevel::Discharging, DeviceKind::Battery) => Notice {
            summary: "Battery discharging".to_owned(),
            body: remaining(device),
            urgency: Urgency::Normal,
            timeout: NoticeTimeout::Short,
        },
        (WarningLevel::Discharging, DeviceKind::Ups) => Notice {
            summary: "UPS discharging".to_owned(),
            body: format!("The system is running on backup power. {}", remaining(device)),
            urgency: Urgency::Normal,
            timeout: NoticeTimeout::Short,
        },
        (WarningLevel::Discharging, _) => return None,
        (WarningLevel::Low, DeviceKind::Battery) => Notice {
            summary: "Battery low".to_owned(),
            body: remaining(device),
            urgency: Urgency::Normal,
            timeout: NoticeTimeout::Long,
        },
        (WarningLevel::Low, DeviceKind::Ups) => Notice {
            summary: "UPS low".to_owned(),
            body: remaining(device),
            urgency: Urgency::Normal,
            timeout: NoticeTimeout::Long,
        },
        (WarningLevel::Low, kind) => Notice {
            summary: format!("{} battery low",
                uppercase_first(kind.label())),
            body: format!(
                "The {} attached to this computer is low in power ({:.0}%).",
                kind.label(),
                device.percentage
            ),
            urgency: Urgency::Normal,
            timeout: NoticeTimeout::Long,
        },
        (WarningLevel::Critical, DeviceKind::Battery) => Notice {
            summary: "Battery critically low".to_owned(),
            body: remaining(device),
            urgency: Urgency::Critical,
            timeout: NoticeTimeout::Never,
        },
        (WarningLevel::Critical, DeviceKind::Ups) => Notice {
            summary: "UPS critically low".to_owned(),
            body: remaining(device),
            urgency: Urgency::Critical,
            timeout: NoticeTimeout::Never,
        },
        (WarningLevel::Critical, kind) => Notice {
            summary: format!("{} battery critically low", uppercase_first(kind.label())),
            body: format!(
                "The {} attached to this computer is almost out of power ({:.0}%).",
                kind.label(),
                device.percentage
            ),
            urgency: Urgency::Critical,
            timeout: NoticeTimeout::Never,
        },
        (WarningLevel::Action, DeviceKind::Battery) => Notice {
            summary: "Battery almost empty".to_owned(),
            body: match critical_policy {
                PowerAction::Shutdown => {
                    "The computer will shut down very soon unless it is plugged in.".to_owned()
                }
                _ => "The computer will hibernate very soon unless it is plugged in.".to_owned(),
            },
            urgency: Urgency::Critical,
            timeout: NoticeTimeout::Never,
        },
        (WarningLevel::Action, DeviceKind::Ups) => Notice {
            summary: "UPS almost empty".to_owned(),
            body: match critical_policy {
                PowerAction::Shutdown => {
                    "The computer will shut down very soon unless power is restored.".to_owned()
                }
                _ => "The computer will hibernate very soon unless power is restored.".to_owned(),
            },
            urgency: Urgency::Critical,
            timeout: NoticeTimeout::Never,
        },
        (WarningLevel::Action, _) | (WarningLevel::None, _) => return None,
    };
    Some(notice)
}

fn uppercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kind: DeviceKind, warning: WarningLevel) -> PowerDevice {
        PowerDevice {
            id: "/devices/test".to_owned(),
            kind,
            percentage: 7.0,
            time_to_empty: Some(Duration::from_secs(600)),
            warning,
            composite: false,
        }
    }

    #[test]
    fn composite_feeders_are_not_peripherals() {
        assert!(!DeviceKind::Battery.tracked_individually());
        assert!(!DeviceKind::Ups.tracked_individually());
        assert!(!DeviceKind::LinePower.tracked_individually());
        assert!(DeviceKind::Mouse.tracked_individually());
        assert!(DeviceKind::Keyboard.tracked_individually());
        assert!(DeviceKind::Phone.tracked_individually());
    }

    #[test]
    fn warning_levels_order_by_severity() {
        assert!(WarningLevel::Action > WarningLevel::Critical);
        assert!(WarningLevel::Critical > WarningLevel::Low);
        assert!(WarningLevel::Low > WarningLevel::Discharging);
        assert!(WarningLevel::Low.is_low_or_worse());
        assert!(!WarningLevel::Discharging.is_low_or_worse());
    }

    #[test]
    fn raw_levels_decode_with_unknown_as_none() {
        assert_eq!(WarningLevel::from_raw(0), WarningLevel::None);
        assert_eq!(WarningLevel::from_raw(1), WarningLevel::None);
        assert_eq!(WarningLevel::from_raw(3), WarningLevel::Low);
        assert_eq!(WarningLevel::from_raw(5), WarningLevel::Action);
        assert_eq!(WarningLevel::from_raw(99), WarningLevel::None);
    }

    #[test]
    fn critical_notices_never_expire() {
        let notice = notice_for(
            &device(DeviceKind::Battery, WarningLevel::Critical),
            PowerAction::Hibernate,
        )
        .unwrap();
        assert_eq!(notice.timeout, NoticeTimeout::Never);
        assert_eq!(notice.urgency, Urgency::Critical);
    }

    #[test]
    fn low_notices_are_time_limited() {
        let notice = notice_for(
            &device(DeviceKind::Mouse, WarningLevel::Low),
            PowerAction::Hibernate,
        )
        .unwrap();
        assert_eq!(notice.timeout, NoticeTimeout::Long);
        assert!(notice.summary.contains("Mouse"));
    }

    #[test]
    fn action_notice_names_the_critical_policy() {
        let hibernate = notice_for(
            &device(DeviceKind::Battery, WarningLevel::Action),
            PowerAction::Hibernate,
        )
        .unwrap();
        assert!(hibernate.body.contains("hibernate"));
        let shutdown = notice_for(
            &device(DeviceKind::Ups, WarningLevel::Action),
            PowerAction::Shutdown,
        )
        .unwrap();
        assert!(shutdown.body.contains("shut down"));
    }

    #[test]
    fn peripheral_discharging_raises_nothing() {
        assert!(notice_for(
            &device(DeviceKind::Keyboard, WarningLevel::Discharging),
            PowerAction::Hibernate,
        )
        .is_none());
        assert!(notice_for(
            &device(DeviceKind::Battery, WarningLevel::None),
            PowerAction::Hibernate,
        )
        .is_none());
    }
}
