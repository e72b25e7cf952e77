use anyhow::{Context, Result};
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tracing::info;
use zbus::{fdo, Connection};

use crate::events::{BrightnessTarget, ControlRequest, Event, StepDirection};

const CONTROL_NAME: &str = "org.drowsed";
const CONTROL_PATH: &str = "/org/drowsed/Control";

/// Session-bus surface for the externally invocable operations. Each method
/// translates to a `ControlRequest` and waits for the manager's reply, so
/// callers see the new brightness percentage synchronously.
pub struct ControlInterface {
    events: Sender<Event>,
}

impl ControlInterface {
    fn new(events: Sender<Event>) -> Self {
        Self { events }
    }

    async fn step(&self, target: BrightnessTarget, up: bool) -> fdo::Result<u32> {
        let direction = if up {
            StepDirection::Up
        } else {
            StepDirection::Down
        };
        let (reply, answer) = oneshot::channel();
        self.submit(
            Event::Control(ControlRequest::StepBrightness {
                target,
                direction,
                reply,
            }),
            answer,
        )
        .await
    }

    async fn submit(
        &self,
        event: Event,
        answer: oneshot::Receiver<Result<u32>>,
    ) -> fdo::Result<u32> {
        self.events
            .send(event)
            .await
            .map_err(|_| fdo::Error::Failed("daemon is shutting down".into()))?;
        match answer.await {
            Ok(Ok(percentage)) => Ok(percentage),
            Ok(Err(err)) => Err(fdo::Error::Failed(err.to_string())),
            Err(_) => Err(fdo::Error::Failed("request dropped".into())),
        }
    }
}

#[zbus::interface(name = "org.drowsed.Control")]
impl ControlInterface {
    async fn step_display_brightness(&self, up: bool) -> fdo::Result<u32> {
        self.step(BrightnessTarget::Display, up).await
    }

    async fn step_keyboard_brightness(&self, up: bool) -> fdo::Result<u32> {
        self.step(BrightnessTarget::Keyboard, up).await
    }

    async fn toggle_keyboard_backlight(&self) -> fdo::Result<u32> {
        let (reply, answer) = oneshot::channel();
        self.submit(
            Event::Control(ControlRequest::ToggleKeyboardBacklight { reply }),
            answer,
        )
        .await
    }
}

/// Claim the control name and register the interface on the session bus.
pub async fn serve(connection: &Connection, events: Sender<Event>) -> Result<()> {
    connection
        .object_server()
        .at(CONTROL_PATH, ControlInterface::new(events))
        .await
        .context("failed to register the control interface")?;
    connection
        .request_name(CONTROL_NAME)
        .await
        .context("failed to claim the control bus name")?;
    info!(name = CONTROL_NAME, "control interface ready");
    Ok(())
}
