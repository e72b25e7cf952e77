use std::fmt;
use std::time::Duration;

use crate::actions::PowerAction;
use crate::config::Config;

/// Blank delay used while the screensaver is already active. Acts as a
/// safety net in case the compositor fails to turn the panel off itself.
pub const SCREENSAVER_BLANK_DELAY: Duration = Duration::from_secs(15);

/// Dim points closer than this to the last activity are useless noise and
/// disable the dim watch instead.
pub const MINIMUM_DIM_DELAY: Duration = Duration::from_secs(10);

/// Dim delay used when the idle delay is zero, so the panel still dims on
/// battery even with blanking disabled.
pub const DIM_DELAY_BLANK_DISABLED: Duration = Duration::from_secs(60);

/// Fixed fraction of the idle delay at which the panel dims. Unlike the
/// sleep-warning point, the dim point is not user-tunable.
pub const IDLE_DIM_FRACTION: f64 = 0.5;

/// The four inactivity watches the daemon arms against the idle clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Dim,
    Blank,
    Sleep,
    SleepWarning,
}

impl WatchKind {
    pub const ALL: [Self; 4] = [Self::Dim, Self::Blank, Self::Sleep, Self::SleepWarning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dim => "dim",
            Self::Blank => "blank",
            Self::Sleep => "sleep",
            Self::SleepWarning => "sleep-warning",
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session conditions that shape the watch plan.
#[derive(Debug, Clone, Copy)]
pub struct WatchInputs {
    pub screensaver_active: bool,
    pub on_battery: bool,
    pub battery_low: bool,
    /// The configured sleep action is vetoed by an application inhibitor.
    pub sleep_action_inhibited: bool,
}

/// Delays (from the last user activity) at which each watch fires.
/// `None` leaves that watch disarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPlan {
    pub dim: Option<Duration>,
    pub blank: Option<Duration>,
    pub sleep: Option<Duration>,
    pub sleep_warning: Option<Duration>,
}

/// Compute the watch plan for an active, uninhibited session.
///
/// The caller is expected to have already short-circuited the inactive and
/// idle-inhibited cases, which disarm everything.
pub fn plan_watches(config: &Config, inputs: &WatchInputs) -> WatchPlan {
    let sleep_action = config.sleep_action(inputs.on_battery);
    let sleep_timeout = config.sleep_timeout(inputs.on_battery);

    // The screensaver front-end is the one that physically blanks the
    // panel. While it is active we arm a short safety-net watch in case
    // something else trips idle underneath it.
    let blank = inputs.screensaver_active.then_some(SCREENSAVER_BLANK_DELAY);

    let sleep = if sleep_timeout.is_zero()
        || inputs.sleep_action_inhibited
        || sleep_action == PowerAction::Nothing
    {
        None
    } else {
        Some(sleep_timeout)
    };

    // Warn ahead of the sleep point only for actions that interrupt the
    // user's session outright.
    let sleep_warning = match sleep {
        Some(timeout) if sleep_action.warns_before_sleep() => {
            let warning = timeout.mul_f64(config.sleep_warning_multiplier);
            (warning >= MINIMUM_DIM_DELAY).then_some(warning)
        }
        _ => None,
    };

    // Dimming applies on battery only, and is made aggressive once the
    // battery runs low.
    let dim = if inputs.screensaver_active || !inputs.on_battery || !config.idle_dim {
        None
    } else if inputs.battery_low {
        Some(SCREENSAVER_BLANK_DELAY)
    } else if config.idle_delay.is_zero() {
        Some(DIM_DELAY_BLANK_DISABLED)
    } else {
        let dim = config.idle_delay.mul_f64(IDLE_DIM_FRACTION);
        (dim >= MINIMUM_DIM_DELAY).then_some(dim)
    };

    WatchPlan {
        dim,
        blank,
        sleep,
        sleep_warning,
    }
}

impl WatchPlan {
    pub fn delay_for(&self, kind: WatchKind) -> Option<Duration> {
        match kind {
            WatchKind::Dim => self.dim,
            WatchKind::Blank => self.blank,
            WatchKind::Sleep => self.sleep,
            WatchKind::SleepWarning => self.sleep_warning,
        }
    }
}
