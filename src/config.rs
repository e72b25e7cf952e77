use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::actions::PowerAction;

/// Daemon configuration, loaded from a YAML file.
///
/// Every field has a sensible default so an empty file (or an absent one,
/// via [`Config::default`]) yields a working desktop policy: dim at half the
/// idle delay, suspend after twenty minutes of inactivity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Inactivity period after which the session counts as idle. Zero
    /// disables idle-driven blanking and sleeping entirely.
    #[serde(default = "Config::default_idle_delay", with = "humantime_serde")]
    pub idle_delay: Duration,
    /// Whether to dim the screen ahead of the idle delay.
    #[serde(default = "Config::default_idle_dim")]
    pub idle_dim: bool,
    /// Backlight percentage applied while dimmed.
    #[serde(default = "Config::default_idle_brightness")]
    pub idle_brightness: u32,
    /// Fraction of the sleep timeout used for the sleep warning point.
    #[serde(default = "Config::default_sleep_warning_multiplier")]
    pub sleep_warning_multiplier: f64,
    #[serde(
        default = "Config::default_sleep_inactive_ac_timeout",
        with = "humantime_serde"
    )]
    pub sleep_inactive_ac_timeout: Duration,
    #[serde(default = "Config::default_sleep_action")]
    pub sleep_inactive_ac_type: PowerAction,
    #[serde(
        default = "Config::default_sleep_inactive_battery_timeout",
        with = "humantime_serde"
    )]
    pub sleep_inactive_battery_timeout: Duration,
    #[serde(default = "Config::default_sleep_action")]
    pub sleep_inactive_battery_type: PowerAction,
    /// Suspend on lid close even when an external monitor is attached.
    #[serde(default)]
    pub lid_close_suspend_with_external_monitor: bool,
    /// Lock (rather than merely blank) the screen when closing the lid while
    /// suspend is inhibited, and before suspending on critical battery.
    #[serde(default = "Config::default_screensaver_lock_enabled")]
    pub screensaver_lock_enabled: bool,
    #[serde(
        default = "Config::default_notification_timeout_short",
        with = "humantime_serde"
    )]
    pub notification_timeout_short: Duration,
    #[serde(
        default = "Config::default_notification_timeout_long",
        with = "humantime_serde"
    )]
    pub notification_timeout_long: Duration,
}

impl Config {
    const fn default_idle_delay() -> Duration {
        Duration::from_secs(600)
    }

    const fn default_idle_dim() -> bool {
        true
    }

    const fn default_idle_brightness() -> u32 {
        30
    }

    const fn default_sleep_warning_multiplier() -> f64 {
        0.5
    }

    const fn default_sleep_inactive_ac_timeout() -> Duration {
        Duration::from_secs(20 * 60)
    }

    const fn default_sleep_inactive_battery_timeout() -> Duration {
        Duration::from_secs(20 * 60)
    }

    const fn default_sleep_action() -> PowerAction {
        PowerAction::Suspend
    }

    const fn default_screensaver_lock_enabled() -> bool {
        true
    }

    const fn default_notification_timeout_short() -> Duration {
        Duration::from_secs(10)
    }

    const fn default_notification_timeout_long() -> Duration {
        Duration::from_secs(30)
    }

    /// Sleep timeout for the current power source. Zero disables the sleep
    /// watch.
    pub fn sleep_timeout(&self, on_battery: bool) -> Duration {
        if on_battery {
            self.sleep_inactive_battery_timeout
        } else {
            self.sleep_inactive_ac_timeout
        }
    }

    /// Sleep action for the current power source.
    pub fn sleep_action(&self, on_battery: bool) -> PowerAction {
        if on_battery {
            self.sleep_inactive_battery_type
        } else {
            self.sleep_inactive_ac_type
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.idle_brightness <= 100,
            "idle-brightness must be a percentage between 0 and 100, got {}",
            self.idle_brightness
        );
        ensure!(
            self.sleep_warning_multiplier > 0.0 && self.sleep_warning_multiplier < 1.0,
            "sleep-warning-multiplier must be strictly between 0 and 1, got {}",
            self.sleep_warning_multiplier
        );
        ensure!(
            !self.notification_timeout_short.is_zero(),
            "notification-timeout-short must be non-zero"
        );
        ensure!(
            !self.notification_timeout_long.is_zero(),
            "notification-timeout-long must be non-zero"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_delay: Self::default_idle_delay(),
            idle_dim: Self::default_idle_dim(),
            idle_brightness: Self::default_idle_brightness(),
            sleep_warning_multiplier: Self::default_sleep_warning_multiplier(),
            sleep_inactive_ac_timeout: Self::default_sleep_inactive_ac_timeout(),
            sleep_inactive_ac_type: Self::default_sleep_action(),
            sleep_inactive_battery_timeout: Self::default_sleep_inactive_battery_timeout(),
            sleep_inactive_battery_type: Self::default_sleep_action(),
            lid_close_suspend_with_external_monitor: false,
            screensaver_lock_enabled: Self::default_screensaver_lock_enabled(),
            notification_timeout_short: Self::default_notification_timeout_short(),
            notification_timeout_long: Self::default_notification_timeout_long(),
        }
    }
}

pub fn from_yaml_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_working_policy() {
        let cfg = Config::default();
        assert_eq!(cfg.idle_delay, Duration::from_secs(600));
        assert!(cfg.idle_dim);
        assert_eq!(cfg.idle_brightness, 30);
        assert_eq!(cfg.sleep_action(false), PowerAction::Suspend);
        assert_eq!(cfg.sleep_action(true), PowerAction::Suspend);
        assert_eq!(cfg.sleep_timeout(true), Duration::from_secs(1200));
        cfg.validate().unwrap();
    }

    #[test]
    fn timeouts_parse_as_humantime() {
        let cfg: Config = serde_yaml::from_str(
            "idle-delay: 5m\nsleep-inactive-battery-timeout: 90s\nsleep-inactive-battery-type: hibernate\n",
        )
        .unwrap();
        assert_eq!(cfg.idle_delay, Duration::from_secs(300));
        assert_eq!(cfg.sleep_timeout(true), Duration::from_secs(90));
        assert_eq!(cfg.sleep_action(true), PowerAction::Hibernate);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<Config>("idle-dealy: 5m\n").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn out_of_range_brightness_fails_validation() {
        let cfg: Config = serde_yaml::from_str("idle-brightness: 130\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn multiplier_bounds_are_enforced() {
        let cfg: Config = serde_yaml::from_str("sleep-warning-multiplier: 1.0\n").unwrap();
        assert!(cfg.validate().is_err());
        let cfg: Config = serde_yaml::from_str("sleep-warning-multiplier: 0.25\n").unwrap();
        cfg.validate().unwrap();
    }
}
