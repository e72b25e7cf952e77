use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};
use zbus::zvariant::OwnedFd;
use zbus::Connection;

use crate::events::Event;
use crate::inhibit::{InhibitorLease, LeaseKind};
use crate::platform::SleepTransport;

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;
    fn suspend(&self, interactive: bool) -> zbus::Result<()>;
    fn hibernate(&self, interactive: bool) -> zbus::Result<()>;
    fn power_off(&self, interactive: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Sleep and inhibitor transport backed by systemd-logind.
pub struct Logind {
    proxy: Login1ManagerProxy<'static>,
}

impl Logind {
    /// Connects and spawns the prepare-for-sleep listener. Fails when logind
    /// is unreachable, which the caller treats as fatal.
    pub async fn connect(connection: &Connection, events: Sender<Event>) -> Result<Self> {
        let proxy = Login1ManagerProxy::new(connection)
            .await
            .context("failed to reach logind on the system bus")?;

        let mut stream = proxy
            .receive_prepare_for_sleep()
            .await
            .context("failed to subscribe to sleep notifications")?;
        tokio::spawn(async move {
            while let Some(signal) = stream.next().await {
                match signal.args() {
                    Ok(args) => {
                        debug!(start = args.start, "prepare-for-sleep");
                        if events
                            .send(Event::PrepareForSleep(args.start))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "malformed prepare-for-sleep signal"),
                }
            }
        });

        Ok(Self { proxy })
    }
}

#[async_trait]
impl SleepTransport for Logind {
    async fn inhibit(&self, kind: LeaseKind, who: &str) -> Result<InhibitorLease> {
        let fd = self
            .proxy
            .inhibit(kind.what(), who, kind.reason(), kind.mode())
            .await
            .with_context(|| format!("failed to take {kind} inhibitor"))?;
        Ok(InhibitorLease::new(kind, fd.into()))
    }

    async fn suspend(&self) -> Result<()> {
        self.proxy.suspend(false).await.context("suspend refused")
    }

    async fn hibernate(&self) -> Result<()> {
        self.proxy
            .hibernate(false)
            .await
            .context("hibernate refused")
    }

    async fn power_off(&self) -> Result<()> {
        self.proxy
            .power_off(false)
            .await
            .context("power-off refused")
    }
}
