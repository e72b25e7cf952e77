use std::thread;
use std::time::{Duration, Instant};

use evdev::{Device, EventType};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::Event;

/// Collapse bursts of input traffic into at most one activity event per
/// interval; the idle clock only cares that the user is there at all.
const ACTIVITY_DEBOUNCE: Duration = Duration::from_secs(1);

fn is_user_input(device: &Device) -> bool {
    let supported = device.supported_events();
    supported.contains(EventType::KEY)
        || supported.contains(EventType::RELATIVE)
        || supported.contains(EventType::ABSOLUTE)
}

/// Spawn one reader thread per input device, each reporting user activity.
///
/// The readers block on the kernel queue, so they live on plain threads and
/// feed the async side through the channel's blocking sender. Fails only
/// when no input device is readable at all, which leaves the daemon with no
/// way to observe the user and is fatal at startup.
pub fn spawn_watchers(events: Sender<Event>) -> Result<(), Error> {
    let mut spawned = 0usize;
    for (path, device) in evdev::enumerate() {
        if !is_user_input(&device) {
            continue;
        }
        let name = device.name().unwrap_or("unnamed").to_owned();
        debug!(device = %path.display(), name = %name, "watching for user activity");
        let tx = events.clone();
        thread::Builder::new()
            .name(format!("activity-{spawned}"))
            .spawn(move || read_device(device, tx))
            .map_err(Error::Io)?;
        spawned += 1;
    }
    if spawned == 0 {
        return Err(Error::NoActivitySource);
    }
    info!(devices = spawned, "user activity detection running");
    Ok(())
}

fn read_device(mut device: Device, events: Sender<Event>) {
    let mut last_report: Option<Instant> = None;
    loop {
        match device.fetch_events() {
            Ok(batch) => {
                // Drain the batch; one report covers all of it.
                if batch.count() == 0 {
                    continue;
                }
                let now = Instant::now();
                let debounced = last_report
                    .is_some_and(|last| now.duration_since(last) < ACTIVITY_DEBOUNCE);
                if debounced {
                    continue;
                }
                last_report = Some(now);
                if events.blocking_send(Event::UserActivity).is_err() {
                    return;
                }
            }
            Err(err) => {
                // Device unplugged or revoked; the remaining readers carry on.
                warn!(error = %err, "input device read failed, stopping watcher");
                return;
            }
        }
    }
}
