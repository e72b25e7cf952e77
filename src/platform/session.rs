use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tracing::warn;
use zbus::Connection;

use crate::actions::InhibitorFlags;
use crate::events::Event;
use crate::platform::SessionControl;

/// Forced logout, no confirmation dialog.
const LOGOUT_MODE_FORCE: u32 = 2;

#[zbus::proxy(
    interface = "org.gnome.SessionManager",
    default_service = "org.gnome.SessionManager",
    default_path = "/org/gnome/SessionManager"
)]
trait GnomeSession {
    fn shutdown(&self) -> zbus::Result<()>;
    fn logout(&self, mode: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn session_is_active(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn inhibited_actions(&self) -> zbus::Result<u32>;
}

/// Desktop session collaborator backed by the GNOME session manager.
pub struct SessionManager {
    proxy: GnomeSessionProxy<'static>,
}

impl SessionManager {
    pub async fn connect(connection: &Connection, events: Sender<Event>) -> Result<Self> {
        let proxy = GnomeSessionProxy::new(connection)
            .await
            .context("failed to reach the session manager")?;

        let mut active_stream = proxy.receive_session_is_active_changed().await;
        let active_events = events.clone();
        tokio::spawn(async move {
            while let Some(change) = active_stream.next().await {
                match change.get().await {
                    Ok(active) => {
                        if active_events
                            .send(Event::SessionActiveChanged(active))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to read session-active change"),
                }
            }
        });

        let mut inhibit_stream = proxy.receive_inhibited_actions_changed().await;
        tokio::spawn(async move {
            while let Some(change) = inhibit_stream.next().await {
                match change.get().await {
                    Ok(bits) => {
                        let flags = InhibitorFlags::from_bits_truncate(bits);
                        if events.send(Event::InhibitorsChanged(flags)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to read inhibitor change"),
                }
            }
        });

        Ok(Self { proxy })
    }
}

#[async_trait]
impl SessionControl for SessionManager {
    async fn is_active(&self) -> Result<bool> {
        self.proxy
            .session_is_active()
            .await
            .context("failed to read session-active flag")
    }

    async fn inhibited_actions(&self) -> Result<InhibitorFlags> {
        let bits = self
            .proxy
            .inhibited_actions()
            .await
            .context("failed to read inhibited actions")?;
        Ok(InhibitorFlags::from_bits_truncate(bits))
    }

    async fn shutdown_dialog(&self) -> Result<()> {
        self.proxy.shutdown().await.context("shutdown call failed")
    }

    async fn logout(&self) -> Result<()> {
        self.proxy
            .logout(LOGOUT_MODE_FORCE)
            .await
            .context("logout call failed")
    }
}
