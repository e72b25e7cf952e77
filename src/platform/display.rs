use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::platform::DisplayControl;

const BACKLIGHT_ROOT: &str = "/sys/class/backlight";
const DRM_ROOT: &str = "/sys/class/drm";

/// FB_BLANK constants used by the backlight power file.
const BL_POWER_ON: &str = "0";
const BL_POWER_OFF: &str = "4";

/// Display collaborator backed by the kernel backlight and DRM sysfs trees.
///
/// Machines without a backlight device (desktops, VMs) still get DPMS-style
/// output control degraded to a logged no-op, and never an error.
pub struct SysfsDisplay {
    backlight: Option<PathBuf>,
    drm_root: PathBuf,
}

impl SysfsDisplay {
    pub fn probe() -> Self {
        Self::probe_at(Path::new(BACKLIGHT_ROOT), Path::new(DRM_ROOT))
    }

    fn probe_at(backlight_root: &Path, drm_root: &Path) -> Self {
        let backlight = fs::read_dir(backlight_root)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .find(|path| path.join("brightness").exists() && path.join("max_brightness").exists())
            });
        if let Some(ref path) = backlight {
            debug!(device = %path.display(), "backlight device found");
        }
        Self {
            backlight,
            drm_root: drm_root.to_path_buf(),
        }
    }

    fn backlight_file(&self, name: &str) -> Result<PathBuf> {
        let dir = self
            .backlight
            .as_ref()
            .context("no backlight device present")?;
        Ok(dir.join(name))
    }

    fn read_u32(&self, name: &str) -> Result<u32> {
        let path = self.backlight_file(name)?;
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("malformed value in {}", path.display()))
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        let path = self.backlight_file(name)?;
        fs::write(&path, value).with_context(|| format!("failed to write {}", path.display()))
    }

    /// A connector counts as external unless it is a built-in panel
    /// (eDP, LVDS, or DSI).
    fn scan_external_monitor(&self) -> Result<bool> {
        let entries = fs::read_dir(&self.drm_root)
            .with_context(|| format!("failed to list {}", self.drm_root.display()))?;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(connector) = name.split_once('-').map(|(_, rest)| rest) else {
                continue;
            };
            if connector.starts_with("eDP")
                || connector.starts_with("LVDS")
                || connector.starts_with("DSI")
            {
                continue;
            }
            let status = entry.path().join("status");
            match fs::read_to_string(&status) {
                Ok(state) if state.trim() == "connected" => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl DisplayControl for SysfsDisplay {
    fn has_backlight(&self) -> bool {
        self.backlight.is_some()
    }

    async fn brightness(&self) -> Result<u32> {
        self.read_u32("brightness")
    }

    async fn max_brightness(&self) -> Result<u32> {
        self.read_u32("max_brightness")
    }

    async fn set_brightness(&self, value: u32) -> Result<()> {
        self.write("brightness", &value.to_string())
    }

    async fn dpms_on(&self) -> Result<()> {
        if self.backlight.is_none() {
            debug!("no backlight device, skipping display power-on");
            return Ok(());
        }
        self.write("bl_power", BL_POWER_ON)
    }

    async fn dpms_off(&self) -> Result<()> {
        if self.backlight.is_none() {
            debug!("no backlight device, skipping display power-off");
            return Ok(());
        }
        self.write("bl_power", BL_POWER_OFF)
    }

    async fn external_monitor_connected(&self) -> Result<bool> {
        self.scan_external_monitor()
    }

    async fn refresh_topology(&self) -> Result<()> {
        match self.scan_external_monitor() {
            Ok(external) => {
                debug!(external, "display topology refreshed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "display topology scan failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_backlight(dir: &Path, brightness: u32, max: u32) {
        let device = dir.join("intel_backlight");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("brightness"), brightness.to_string()).unwrap();
        fs::write(device.join("max_brightness"), max.to_string()).unwrap();
        fs::write(device.join("bl_power"), "0").unwrap();
    }

    fn fake_connector(dir: &Path, name: &str, status: &str) {
        let connector = dir.join(name);
        fs::create_dir_all(&connector).unwrap();
        fs::write(connector.join("status"), format!("{status}\n")).unwrap();
    }

    #[tokio::test]
    async fn reads_and_writes_backlight_values() {
        let backlight = TempDir::new().unwrap();
        let drm = TempDir::new().unwrap();
        fake_backlight(backlight.path(), 120, 400);

        let display = SysfsDisplay::probe_at(backlight.path(), drm.path());
        assert!(display.has_backlight());
        assert_eq!(display.brightness().await.unwrap(), 120);
        assert_eq!(display.max_brightness().await.unwrap(), 400);
        display.set_brightness(200).await.unwrap();
        assert_eq!(display.brightness().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn missing_backlight_degrades_dpms_to_noop() {
        let backlight = TempDir::new().unwrap();
        let drm = TempDir::new().unwrap();
        let display = SysfsDisplay::probe_at(backlight.path(), drm.path());
        assert!(!display.has_backlight());
        display.dpms_off().await.unwrap();
        display.dpms_on().await.unwrap();
        assert!(display.brightness().await.is_err());
    }

    #[tokio::test]
    async fn builtin_panels_do_not_count_as_external() {
        let backlight = TempDir::new().unwrap();
        let drm = TempDir::new().unwrap();
        fake_connector(drm.path(), "card0-eDP-1", "connected");
        fake_connector(drm.path(), "card0-HDMI-A-1", "disconnected");

        let display = SysfsDisplay::probe_at(backlight.path(), drm.path());
        assert!(!display.external_monitor_connected().await.unwrap());

        fake_connector(drm.path(), "card0-HDMI-A-1", "connected");
        assert!(display.external_monitor_connected().await.unwrap());
    }
}
