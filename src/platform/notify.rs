use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::zvariant::Value;
use zbus::Connection;

use crate::battery::{Notice, NoticeClass, NoticeTimeout, SoundEvent, Urgency};
use crate::config::Config;
use crate::events::BrightnessTarget;
use crate::platform::NoticeSink;

const APP_NAME: &str = "drowsed";
const ALERT_LOOP_INTERVAL: Duration = Duration::from_secs(30);

#[zbus::proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    #[allow(clippy::too_many_arguments)]
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    fn close_notification(&self, id: u32) -> zbus::Result<()>;
}

/// Desktop notification and sound sink. All operations are fire-and-forget:
/// a missing notification daemon degrades to log lines.
pub struct Notifier {
    proxy: NotificationsProxy<'static>,
    timeout_short: Duration,
    timeout_long: Duration,
    shown: Mutex<HashMap<NoticeClass, u32>>,
    alert_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub async fn connect(connection: &Connection, config: &Config) -> Result<Self> {
        let proxy = NotificationsProxy::new(connection)
            .await
            .context("failed to reach the notification service")?;
        Ok(Self {
            proxy,
            timeout_short: config.notification_timeout_short,
            timeout_long: config.notification_timeout_long,
            shown: Mutex::new(HashMap::new()),
            alert_loop: Mutex::new(None),
        })
    }

    fn expire_timeout(&self, timeout: NoticeTimeout) -> i32 {
        match timeout {
            NoticeTimeout::Short => self.timeout_short.as_millis() as i32,
            NoticeTimeout::Long => self.timeout_long.as_millis() as i32,
            NoticeTimeout::Never => 0,
        }
    }
}

fn play_sound(event: SoundEvent) {
    let result = Command::new("canberra-gtk-play")
        .args(["-i", event.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match result {
        Ok(_) => debug!(sound = event.as_str(), "feedback sound queued"),
        Err(err) => debug!(sound = event.as_str(), error = %err, "sound playback unavailable"),
    }
}

#[async_trait]
impl NoticeSink for Notifier {
    async fn show(&self, class: NoticeClass, notice: Notice) {
        let urgency: u8 = match notice.urgency {
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        };
        let mut hints = HashMap::new();
        hints.insert("urgency", Value::U8(urgency));
        if notice.timeout != NoticeTimeout::Never {
            hints.insert("transient", Value::Bool(true));
        }

        let replaces = {
            let shown = self.shown.lock().await;
            shown.get(&class).copied().unwrap_or(0)
        };
        match self
            .proxy
            .notify(
                APP_NAME,
                replaces,
                "battery-caution-symbolic",
                &notice.summary,
                &notice.body,
                &[],
                hints,
                self.expire_timeout(notice.timeout),
            )
            .await
        {
            Ok(id) => {
                self.shown.lock().await.insert(class, id);
            }
            Err(err) => warn!(error = %err, summary = %notice.summary, "failed to show notice"),
        }
    }

    async fn close(&self, class: NoticeClass) {
        let id = self.shown.lock().await.remove(&class);
        if let Some(id) = id {
            if let Err(err) = self.proxy.close_notification(id).await {
                debug!(error = %err, "failed to close notice");
            }
        }
    }

    async fn play(&self, sound: SoundEvent) {
        play_sound(sound);
    }

    async fn start_alert_loop(&self) {
        let mut alert_loop = self.alert_loop.lock().await;
        if alert_loop.is_some() {
            return;
        }
        *alert_loop = Some(tokio::spawn(async move {
            loop {
                play_sound(SoundEvent::BatteryCaution);
                tokio::time::sleep(ALERT_LOOP_INTERVAL).await;
            }
        }));
    }

    async fn stop_alert_loop(&self) {
        if let Some(handle) = self.alert_loop.lock().await.take() {
            handle.abort();
        }
    }

    /// OSD-style notice with the standard progress-bar `value` hint.
    async fn brightness_changed(&self, target: BrightnessTarget, percentage: u32) {
        let (summary, icon) = match target {
            BrightnessTarget::Display => ("Brightness", "display-brightness-symbolic"),
            BrightnessTarget::Keyboard => {
                ("Keyboard brightness", "keyboard-brightness-symbolic")
            }
        };
        let mut hints = HashMap::new();
        hints.insert("urgency", Value::U8(1));
        hints.insert("transient", Value::Bool(true));
        hints.insert("value", Value::I32(percentage as i32));

        let replaces = {
            let shown = self.shown.lock().await;
            shown.get(&NoticeClass::Brightness).copied().unwrap_or(0)
        };
        match self
            .proxy
            .notify(
                APP_NAME,
                replaces,
                icon,
                summary,
                &format!("{percentage}%"),
                &[],
                hints,
                self.expire_timeout(NoticeTimeout::Short),
            )
            .await
        {
            Ok(id) => {
                self.shown.lock().await.insert(NoticeClass::Brightness, id);
            }
            Err(err) => debug!(error = %err, "failed to show brightness notice"),
        }
    }
}
