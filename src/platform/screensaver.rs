use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tracing::warn;
use zbus::Connection;

use crate::events::Event;
use crate::platform::ScreenSaver;

#[zbus::proxy(
    interface = "org.gnome.ScreenSaver",
    default_service = "org.gnome.ScreenSaver",
    default_path = "/org/gnome/ScreenSaver"
)]
trait GnomeScreenSaverIface {
    fn lock(&self) -> zbus::Result<()>;
    fn set_active(&self, active: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    fn active_changed(&self, active: bool) -> zbus::Result<()>;
}

/// Screensaver front-end collaborator.
pub struct GnomeScreenSaver {
    proxy: GnomeScreenSaverIfaceProxy<'static>,
}

impl GnomeScreenSaver {
    pub async fn connect(connection: &Connection, events: Sender<Event>) -> Result<Self> {
        let proxy = GnomeScreenSaverIfaceProxy::new(connection)
            .await
            .context("failed to reach the screensaver")?;

        let mut stream = proxy
            .receive_active_changed()
            .await
            .context("failed to subscribe to screensaver state")?;
        tokio::spawn(async move {
            while let Some(signal) = stream.next().await {
                match signal.args() {
                    Ok(args) => {
                        if events
                            .send(Event::ScreensaverActiveChanged(args.active))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "malformed screensaver signal"),
                }
            }
        });

        Ok(Self { proxy })
    }
}

#[async_trait]
impl ScreenSaver for GnomeScreenSaver {
    async fn lock(&self) -> Result<()> {
        self.proxy.lock().await.context("screen lock failed")
    }

    async fn set_active(&self, active: bool) -> Result<()> {
        self.proxy
            .set_active(active)
            .await
            .context("screensaver activation failed")
    }
}
