use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::actions::PowerAction;
use crate::battery::{DeviceKind, PowerDevice, WarningLevel};
use crate::events::Event;
use crate::platform::{KeyboardBacklight, PowerSupply};

#[zbus::proxy(
    interface = "org.freedesktop.UPower",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower"
)]
trait UPowerManager {
    fn enumerate_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
    fn get_display_device(&self) -> zbus::Result<OwnedObjectPath>;
    fn get_critical_action(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn device_added(&self, device: OwnedObjectPath) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_removed(&self, device: OwnedObjectPath) -> zbus::Result<()>;

    #[zbus(property)]
    fn on_battery(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn lid_is_present(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn lid_is_closed(&self) -> zbus::Result<bool>;
}

#[zbus::proxy(
    interface = "org.freedesktop.UPower.Device",
    default_service = "org.freedesktop.UPower",
    assume_defaults = false
)]
trait UPowerDevice {
    #[zbus(property, name = "Type")]
    fn device_type(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn percentage(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn time_to_empty(&self) -> zbus::Result<i64>;

    #[zbus(property)]
    fn warning_level(&self) -> zbus::Result<u32>;
}

#[zbus::proxy(
    interface = "org.freedesktop.UPower.KbdBacklight",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower/KbdBacklight"
)]
trait UPowerKbdBacklight {
    fn get_brightness(&self) -> zbus::Result<i32>;
    fn get_max_brightness(&self) -> zbus::Result<i32>;
    fn set_brightness(&self, value: i32) -> zbus::Result<()>;
}

/// Power-supply collaborator backed by upowerd.
pub struct UPower {
    connection: Connection,
    proxy: UPowerManagerProxy<'static>,
}

impl UPower {
    pub async fn connect(connection: &Connection, events: Sender<Event>) -> Result<Self> {
        let proxy = UPowerManagerProxy::new(connection)
            .await
            .context("failed to reach upower on the system bus")?;

        tokio::spawn(monitor(connection.clone(), proxy.clone(), events));

        Ok(Self {
            connection: connection.clone(),
            proxy,
        })
    }
}

#[async_trait]
impl PowerSupply for UPower {
    async fn devices(&self) -> Result<Vec<PowerDevice>> {
        let paths = self
            .proxy
            .enumerate_devices()
            .await
            .context("device enumeration failed")?;
        let mut devices = Vec::with_capacity(paths.len());
        for path in paths {
            match snapshot(&self.connection, &path).await {
                Ok(device) => devices.push(device),
                Err(err) => warn!(device = %path, error = %err, "skipping unreadable device"),
            }
        }
        Ok(devices)
    }

    async fn display_device(&self) -> Result<PowerDevice> {
        let path = self
            .proxy
            .get_display_device()
            .await
            .context("no composite display device")?;
        snapshot(&self.connection, &path).await
    }

    async fn on_battery(&self) -> Result<bool> {
        Ok(self.proxy.on_battery().await?)
    }

    async fn lid_is_present(&self) -> Result<bool> {
        Ok(self.proxy.lid_is_present().await?)
    }

    async fn lid_is_closed(&self) -> Result<bool> {
        Ok(self.proxy.lid_is_closed().await?)
    }

    async fn critical_policy(&self) -> Result<PowerAction> {
        let action = self
            .proxy
            .get_critical_action()
            .await
            .context("failed to read critical action policy")?;
        Ok(match action.as_str() {
            "PowerOff" => PowerAction::Shutdown,
            _ => PowerAction::Hibernate,
        })
    }
}

async fn snapshot(connection: &Connection, path: &OwnedObjectPath) -> Result<PowerDevice> {
    let proxy = UPowerDeviceProxy::builder(connection)
        .path(path.clone())?
        .build()
        .await?;
    let time_to_empty = proxy.time_to_empty().await.unwrap_or(0);
    Ok(PowerDevice {
        id: path.to_string(),
        kind: DeviceKind::from_raw(proxy.device_type().await?),
        percentage: proxy.percentage().await.unwrap_or(0.0),
        time_to_empty: (time_to_empty > 0).then(|| Duration::from_secs(time_to_empty as u64)),
        warning: WarningLevel::from_raw(proxy.warning_level().await?),
        composite: path.as_str().ends_with("/DisplayDevice"),
    })
}

/// Re-reads a device and reports it whenever its warning level moves.
async fn watch_device(connection: Connection, path: OwnedObjectPath, events: Sender<Event>) {
    let builder = match UPowerDeviceProxy::builder(&connection).path(path.clone()) {
        Ok(builder) => builder,
        Err(err) => {
            warn!(device = %path, error = %err, "cannot watch device");
            return;
        }
    };
    let proxy = match builder.build().await {
        Ok(proxy) => proxy,
        Err(err) => {
            warn!(device = %path, error = %err, "cannot watch device");
            return;
        }
    };
    let mut warnings = proxy.receive_warning_level_changed().await;
    while warnings.next().await.is_some() {
        match snapshot(&connection, &path).await {
            Ok(device) => {
                debug!(device = %path, warning = %device.warning, "device warning changed");
                if events.send(Event::DeviceChanged(device)).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(device = %path, error = %err, "failed to re-read device"),
        }
    }
}

async fn monitor(connection: Connection, proxy: UPowerManagerProxy<'static>, events: Sender<Event>) {
    let mut watchers: HashMap<String, JoinHandle<()>> = HashMap::new();

    // Watch whatever is already plugged in, plus the composite device.
    let mut initial = match proxy.enumerate_devices().await {
        Ok(paths) => paths,
        Err(err) => {
            warn!(error = %err, "initial device enumeration failed");
            Vec::new()
        }
    };
    if let Ok(display) = proxy.get_display_device().await {
        initial.push(display);
    }
    for path in initial {
        let handle = tokio::spawn(watch_device(
            connection.clone(),
            path.clone(),
            events.clone(),
        ));
        watchers.insert(path.to_string(), handle);
    }

    let (mut added, mut removed) = match (
        proxy.receive_device_added().await,
        proxy.receive_device_removed().await,
    ) {
        (Ok(added), Ok(removed)) => (added, removed),
        _ => {
            warn!("failed to subscribe to device hot-plug signals");
            return;
        }
    };
    let mut on_battery = proxy.receive_on_battery_changed().await;
    let mut lid_closed = proxy.receive_lid_is_closed_changed().await;

    loop {
        tokio::select! {
            signal = added.next() => {
                let Some(signal) = signal else { break };
                let Ok(args) = signal.args() else { continue };
                let path = args.device;
                let handle = tokio::spawn(watch_device(connection.clone(), path.clone(), events.clone()));
                if let Some(stale) = watchers.insert(path.to_string(), handle) {
                    stale.abort();
                }
                match snapshot(&connection, &path).await {
                    Ok(device) => {
                        if events.send(Event::DeviceAdded(device)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(device = %path, error = %err, "failed to read new device"),
                }
            }
            signal = removed.next() => {
                let Some(signal) = signal else { break };
                let Ok(args) = signal.args() else { continue };
                let id = args.device.to_string();
                if let Some(handle) = watchers.remove(&id) {
                    handle.abort();
                }
                if events.send(Event::DeviceRemoved(id)).await.is_err() {
                    break;
                }
            }
            change = on_battery.next() => {
                let Some(change) = change else { break };
                match change.get().await {
                    Ok(value) => {
                        if events.send(Event::OnBatteryChanged(value)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to read on-battery change"),
                }
            }
            change = lid_closed.next() => {
                let Some(change) = change else { break };
                match change.get().await {
                    Ok(value) => {
                        if events.send(Event::LidClosedChanged(value)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to read lid change"),
                }
            }
        }
    }

    for handle in watchers.into_values() {
        handle.abort();
    }
}

/// Keyboard backlight via upowerd. Absent on most desktops; the probe
/// fails fast so the feature can be disabled.
pub struct KbdBacklight {
    proxy: UPowerKbdBacklightProxy<'static>,
}

impl KbdBacklight {
    pub async fn connect(connection: &Connection) -> Result<Self> {
        let proxy = UPowerKbdBacklightProxy::new(connection).await?;
        proxy
            .get_max_brightness()
            .await
            .context("keyboard backlight probe failed")?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl KeyboardBacklight for KbdBacklight {
    async fn brightness(&self) -> Result<i32> {
        Ok(self.proxy.get_brightness().await?)
    }

    async fn max_brightness(&self) -> Result<i32> {
        Ok(self.proxy.get_max_brightness().await?)
    }

    async fn set_brightness(&self, value: i32) -> Result<()> {
        Ok(self.proxy.set_brightness(value).await?)
    }
}
