//! Capability interfaces onto the host system, plus their live wirings.
//!
//! The manager only ever talks to these traits; the concrete D-Bus, sysfs
//! and evdev plumbing lives in the submodules. Tests substitute fakes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::actions::{InhibitorFlags, PowerAction};
use crate::battery::{Notice, NoticeClass, PowerDevice, SoundEvent};
use crate::config::Config;
use crate::error::Error;
use crate::events::{BrightnessTarget, Event};
use crate::inhibit::{InhibitorLease, LeaseKind};

pub mod activity;
pub mod control;
pub mod display;
pub mod logind;
pub mod notify;
pub mod screensaver;
pub mod session;
pub mod upower;

/// Desktop session manager: activity flag, application inhibitors, and the
/// logout/shutdown entry points.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn is_active(&self) -> Result<bool>;
    async fn inhibited_actions(&self) -> Result<InhibitorFlags>;
    /// Interactive shutdown, may prompt the user.
    async fn shutdown_dialog(&self) -> Result<()>;
    /// Forced logout, no prompting.
    async fn logout(&self) -> Result<()>;
}

/// Battery/UPS/peripheral enumeration and the machine-level power facts.
#[async_trait]
pub trait PowerSupply: Send + Sync {
    async fn devices(&self) -> Result<Vec<PowerDevice>>;
    /// Composite device aggregating all batteries.
    async fn display_device(&self) -> Result<PowerDevice>;
    async fn on_battery(&self) -> Result<bool>;
    async fn lid_is_present(&self) -> Result<bool>;
    async fn lid_is_closed(&self) -> Result<bool>;
    /// What the OS does when a battery is completely exhausted; used both
    /// for the grace-period action and for notice wording.
    async fn critical_policy(&self) -> Result<PowerAction>;
}

/// System sleep and inhibitor transport (logind).
#[async_trait]
pub trait SleepTransport: Send + Sync {
    async fn inhibit(&self, kind: LeaseKind, who: &str) -> Result<InhibitorLease>;
    async fn suspend(&self) -> Result<()>;
    async fn hibernate(&self) -> Result<()>;
    async fn power_off(&self) -> Result<()>;
}

/// Display output and backlight.
#[async_trait]
pub trait DisplayControl: Send + Sync {
    fn has_backlight(&self) -> bool;
    /// Absolute brightness in device units.
    async fn brightness(&self) -> Result<u32>;
    async fn max_brightness(&self) -> Result<u32>;
    async fn set_brightness(&self, value: u32) -> Result<()>;
    async fn dpms_on(&self) -> Result<()>;
    async fn dpms_off(&self) -> Result<()>;
    async fn external_monitor_connected(&self) -> Result<bool>;
    /// Re-read connector state after a lid or hot-plug event.
    async fn refresh_topology(&self) -> Result<()>;
}

#[async_trait]
pub trait KeyboardBacklight: Send + Sync {
    async fn brightness(&self) -> Result<i32>;
    async fn max_brightness(&self) -> Result<i32>;
    async fn set_brightness(&self, value: i32) -> Result<()>;
}

/// Fire-and-forget user feedback: notices, sounds, and the brightness
/// change announcement. Never fails observably.
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn show(&self, class: NoticeClass, notice: Notice);
    async fn close(&self, class: NoticeClass);
    async fn play(&self, sound: SoundEvent);
    /// Repeating alert while a battery or UPS sits at critical.
    async fn start_alert_loop(&self);
    async fn stop_alert_loop(&self);
    async fn brightness_changed(&self, target: BrightnessTarget, percentage: u32);
}

#[async_trait]
pub trait ScreenSaver: Send + Sync {
    async fn lock(&self) -> Result<()>;
    async fn set_active(&self, active: bool) -> Result<()>;
}

/// Bundle of live collaborators handed to the manager.
#[derive(Clone)]
pub struct Platform {
    pub session: Arc<dyn SessionControl>,
    pub power: Arc<dyn PowerSupply>,
    pub sleep: Arc<dyn SleepTransport>,
    pub display: Arc<dyn DisplayControl>,
    pub keyboard: Option<Arc<dyn KeyboardBacklight>>,
    pub notices: Arc<dyn NoticeSink>,
    pub screensaver: Arc<dyn ScreenSaver>,
    /// Virtualized guests never dim, blank, or sleep on idle.
    pub is_virtual_machine: bool,
}

/// Connect to the host system and spawn the listener tasks that feed
/// `events`. Fatal only when the sleep transport or the activity source is
/// missing; every other absent capability degrades to a no-op.
pub async fn connect(config: &Config, events: Sender<Event>) -> Result<Platform, Error> {
    let system_bus = zbus::Connection::system()
        .await
        .map_err(|err| Error::NoSleepTransport(err.to_string()))?;
    let session_bus = zbus::Connection::session().await?;

    let sleep = logind::Logind::connect(&system_bus, events.clone())
        .await
        .map_err(|err| Error::NoSleepTransport(err.to_string()))?;

    activity::spawn_watchers(events.clone())?;

    let session = session::SessionManager::connect(&session_bus, events.clone()).await?;
    let power = upower::UPower::connect(&system_bus, events.clone()).await?;

    let keyboard: Option<Arc<dyn KeyboardBacklight>> =
        match upower::KbdBacklight::connect(&system_bus).await {
            Ok(kbd) => Some(Arc::new(kbd)),
            Err(err) => {
                info!(error = %err, "no keyboard backlight, feature disabled");
                None
            }
        };

    let display = display::SysfsDisplay::probe();
    if !display.has_backlight() {
        info!("no display backlight control found, dimming disabled");
    }

    let screensaver = screensaver::GnomeScreenSaver::connect(&session_bus, events.clone()).await?;
    let notices = notify::Notifier::connect(&session_bus, config).await?;
    control::serve(&session_bus, events.clone()).await?;

    let is_virtual_machine = detect_virtual_machine();
    if is_virtual_machine {
        info!("virtual machine detected, idle transitions disabled");
    }

    Ok(Platform {
        session: Arc::new(session),
        power: Arc::new(power),
        sleep: Arc::new(sleep),
        display: Arc::new(display),
        keyboard,
        notices: Arc::new(notices),
        screensaver: Arc::new(screensaver),
        is_virtual_machine,
    })
}

fn detect_virtual_machine() -> bool {
    match std::process::Command::new("systemd-detect-virt")
        .arg("--quiet")
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            warn!(error = %err, "virtualization probe unavailable, assuming bare metal");
            false
        }
    }
}
