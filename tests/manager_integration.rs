use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use drowsed::actions::{InhibitorFlags, PowerAction};
use drowsed::battery::{DeviceKind, Notice, NoticeClass, PowerDevice, SoundEvent, WarningLevel};
use drowsed::config::Config;
use drowsed::events::{BrightnessTarget, ControlRequest, Event, StepDirection};
use drowsed::inhibit::{InhibitorLease, LeaseKind};
use drowsed::manager::PowerManager;
use drowsed::platform::{
    DisplayControl, KeyboardBacklight, NoticeSink, Platform, PowerSupply, ScreenSaver,
    SessionControl, SleepTransport,
};

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn count(log: &CallLog, entry: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| *e == entry).count()
}

fn count_prefixed(log: &CallLog, prefix: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .count()
}

struct FakeSession {
    active: AtomicBool,
    inhibited: Mutex<InhibitorFlags>,
    log: CallLog,
}

#[async_trait]
impl SessionControl for FakeSession {
    async fn is_active(&self) -> Result<bool> {
        Ok(self.active.load(Ordering::SeqCst))
    }
    async fn inhibited_actions(&self) -> Result<InhibitorFlags> {
        Ok(*self.inhibited.lock().unwrap())
    }
    async fn shutdown_dialog(&self) -> Result<()> {
        record(&self.log, "session-shutdown");
        Ok(())
    }
    async fn logout(&self) -> Result<()> {
        record(&self.log, "session-logout");
        Ok(())
    }
}

struct FakePower {
    on_battery: AtomicBool,
    lid_present: bool,
    critical_policy: PowerAction,
    devices: Mutex<Vec<PowerDevice>>,
    display: Mutex<PowerDevice>,
}

#[async_trait]
impl PowerSupply for FakePower {
    async fn devices(&self) -> Result<Vec<PowerDevice>> {
        Ok(self.devices.lock().unwrap().clone())
    }
    async fn display_device(&self) -> Result<PowerDevice> {
        Ok(self.display.lock().unwrap().clone())
    }
    async fn on_battery(&self) -> Result<bool> {
        Ok(self.on_battery.load(Ordering::SeqCst))
    }
    async fn lid_is_present(&self) -> Result<bool> {
        Ok(self.lid_present)
    }
    async fn lid_is_closed(&self) -> Result<bool> {
        Ok(false)
    }
    async fn critical_policy(&self) -> Result<PowerAction> {
        Ok(self.critical_policy)
    }
}

struct FakeSleep {
    log: CallLog,
}

#[async_trait]
impl SleepTransport for FakeSleep {
    async fn inhibit(&self, kind: LeaseKind, _who: &str) -> Result<InhibitorLease> {
        record(&self.log, format!("inhibit:{}", kind.what()));
        let fd = File::open("/dev/null")?;
        Ok(InhibitorLease::new(kind, fd.into()))
    }
    async fn suspend(&self) -> Result<()> {
        record(&self.log, "suspend");
        Ok(())
    }
    async fn hibernate(&self) -> Result<()> {
        record(&self.log, "hibernate");
        Ok(())
    }
    async fn power_off(&self) -> Result<()> {
        record(&self.log, "power-off");
        Ok(())
    }
}

struct FakeDisplay {
    brightness: AtomicU32,
    max: u32,
    external_monitor: AtomicBool,
    log: CallLog,
}

#[async_trait]
impl DisplayControl for FakeDisplay {
    fn has_backlight(&self) -> bool {
        true
    }
    async fn brightness(&self) -> Result<u32> {
        Ok(self.brightness.load(Ordering::SeqCst))
    }
    async fn max_brightness(&self) -> Result<u32> {
        Ok(self.max)
    }
    async fn set_brightness(&self, value: u32) -> Result<()> {
        self.brightness.store(value, Ordering::SeqCst);
        record(&self.log, format!("set-brightness:{value}"));
        Ok(())
    }
    async fn dpms_on(&self) -> Result<()> {
        record(&self.log, "dpms-on");
        Ok(())
    }
    async fn dpms_off(&self) -> Result<()> {
        record(&self.log, "dpms-off");
        Ok(())
    }
    async fn external_monitor_connected(&self) -> Result<bool> {
        Ok(self.external_monitor.load(Ordering::SeqCst))
    }
    async fn refresh_topology(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeKeyboard {
    brightness: Mutex<i32>,
    max: i32,
}

#[async_trait]
impl KeyboardBacklight for FakeKeyboard {
    async fn brightness(&self) -> Result<i32> {
        Ok(*self.brightness.lock().unwrap())
    }
    async fn max_brightness(&self) -> Result<i32> {
        Ok(self.max)
    }
    async fn set_brightness(&self, value: i32) -> Result<()> {
        *self.brightness.lock().unwrap() = value;
        Ok(())
    }
}

struct FakeNotices {
    log: CallLog,
}

#[async_trait]
impl NoticeSink for FakeNotices {
    async fn show(&self, class: NoticeClass, notice: Notice) {
        record(&self.log, format!("show:{class:?}:{}", notice.summary));
    }
    async fn close(&self, class: NoticeClass) {
        record(&self.log, format!("close:{class:?}"));
    }
    async fn play(&self, sound: SoundEvent) {
        record(&self.log, format!("play:{}", sound.as_str()));
    }
    async fn start_alert_loop(&self) {
        record(&self.log, "alert-loop-start");
    }
    async fn stop_alert_loop(&self) {
        record(&self.log, "alert-loop-stop");
    }
    async fn brightness_changed(&self, _target: BrightnessTarget, percentage: u32) {
        record(&self.log, format!("brightness-changed:{percentage}"));
    }
}

struct FakeScreenSaver {
    log: CallLog,
}

#[async_trait]
impl ScreenSaver for FakeScreenSaver {
    async fn lock(&self) -> Result<()> {
        record(&self.log, "screen-lock");
        Ok(())
    }
    async fn set_active(&self, _active: bool) -> Result<()> {
        record(&self.log, "screensaver-activate");
        Ok(())
    }
}

struct Fixture {
    platform: Platform,
    log: CallLog,
    session: Arc<FakeSession>,
    power: Arc<FakePower>,
    display: Arc<FakeDisplay>,
}

fn fixture(on_battery: bool, lid_present: bool, external_monitor: bool) -> Fixture {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let session = Arc::new(FakeSession {
        active: AtomicBool::new(true),
        inhibited: Mutex::new(InhibitorFlags::empty()),
        log: log.clone(),
    });
    let power = Arc::new(FakePower {
        on_battery: AtomicBool::new(on_battery),
        lid_present,
        critical_policy: PowerAction::Hibernate,
        devices: Mutex::new(Vec::new()),
        display: Mutex::new(composite(WarningLevel::None)),
    });
    let display = Arc::new(FakeDisplay {
        brightness: AtomicU32::new(400),
        max: 400,
        external_monitor: AtomicBool::new(external_monitor),
        log: log.clone(),
    });
    let platform = Platform {
        session: session.clone(),
        power: power.clone(),
        sleep: Arc::new(FakeSleep { log: log.clone() }),
        display: display.clone(),
        keyboard: None,
        notices: Arc::new(FakeNotices { log: log.clone() }),
        screensaver: Arc::new(FakeScreenSaver { log: log.clone() }),
        is_virtual_machine: false,
    };
    Fixture {
        platform,
        log,
        session,
        power,
        display,
    }
}

fn composite(warning: WarningLevel) -> PowerDevice {
    PowerDevice {
        id: "/devices/DisplayDevice".to_owned(),
        kind: DeviceKind::Battery,
        percentage: 50.0,
        time_to_empty: Some(Duration::from_secs(3600)),
        warning,
        composite: true,
    }
}

fn peripheral(kind: DeviceKind, warning: WarningLevel) -> PowerDevice {
    PowerDevice {
        id: "/devices/peripheral".to_owned(),
        kind,
        percentage: 7.0,
        time_to_empty: None,
        warning,
        composite: false,
    }
}

async fn settle() {
    // Lets the manager drain its queue without advancing far into a watch.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn dims_then_sleeps_exactly_once_on_battery() {
    let fixture = fixture(true, false, false);
    let config: Config = serde_yaml::from_str(
        "idle-delay: 60s\nsleep-inactive-battery-timeout: 120s\nsleep-inactive-battery-type: suspend\n",
    )
    .unwrap();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(config, fixture.platform.clone(), tx.clone()).run(rx, cancel.clone()),
    );

    // Dim point is 60s x 0.5 = 30s; the idle level is 30% of 400.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 1);

    // Sleep warning at 120s x 0.5 = 60s, suspend at 120s.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count_prefixed(&fixture.log, "show:SleepWarning"), 1);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(count(&fixture.log, "suspend"), 1);

    // The sleep watch is one-shot: nothing fires again without activity.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(count(&fixture.log, "suspend"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn user_activity_resets_dim_and_rearms() {
    let fixture = fixture(true, false, false);
    let config: Config = serde_yaml::from_str("idle-delay: 60s\n").unwrap();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(config, fixture.platform.clone(), tx.clone()).run(rx, cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 1);

    tx.send(Event::UserActivity).await.unwrap();
    settle().await;
    // Pre-dim level restored on the reset to normal.
    assert_eq!(count(&fixture.log, "set-brightness:400"), 1);

    // A fresh idle period dims again.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 2);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn idle_inhibitor_forces_normal_and_disarms_everything() {
    let fixture = fixture(true, false, false);
    let config: Config =
        serde_yaml::from_str("idle-delay: 60s\nsleep-inactive-battery-timeout: 120s\n").unwrap();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(config, fixture.platform.clone(), tx.clone()).run(rx, cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 1);

    tx.send(Event::InhibitorsChanged(InhibitorFlags::IDLE))
        .await
        .unwrap();
    settle().await;
    // Forced back to normal: brightness restored.
    assert_eq!(count(&fixture.log, "set-brightness:400"), 1);

    // All four watches disarmed: no sleep however long we wait.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(count(&fixture.log, "suspend"), 0);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn critical_action_survives_ac_reconnection() {
    let fixture = fixture(true, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    tx.send(Event::DeviceChanged(composite(WarningLevel::Action)))
        .await
        .unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "play:battery-caution"), 1);

    // AC comes back with one second to spare. Too late to stop now.
    tokio::time::sleep(Duration::from_secs(19)).await;
    fixture.power.on_battery.store(false, Ordering::SeqCst);
    tx.send(Event::OnBatteryChanged(false)).await.unwrap();
    settle().await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(count(&fixture.log, "hibernate"), 1);

    // And exactly once.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(count(&fixture.log, "hibernate"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn critical_battery_raises_alert_and_clears_on_ac() {
    let fixture = fixture(true, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    tx.send(Event::DeviceChanged(composite(WarningLevel::Critical)))
        .await
        .unwrap();
    settle().await;
    assert_eq!(count_prefixed(&fixture.log, "show:Low"), 1);
    assert_eq!(count(&fixture.log, "alert-loop-start"), 1);

    // Back on AC: alert stops and the stale notice closes.
    fixture.power.on_battery.store(false, Ordering::SeqCst);
    tx.send(Event::OnBatteryChanged(false)).await.unwrap();
    settle().await;
    assert!(count(&fixture.log, "alert-loop-stop") >= 1);
    assert!(count(&fixture.log, "close:Low") >= 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn lid_switch_lease_follows_external_monitor() {
    let fixture = fixture(false, true, true);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    // External monitor at startup: the lid-switch block is taken.
    assert_eq!(count(&fixture.log, "inhibit:handle-lid-switch"), 1);

    // Monitor goes away; the next safety tick releases the lease.
    fixture
        .display
        .external_monitor
        .store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(31)).await;

    // A new topology event with a monitor re-acquires, proving the slot
    // was released in between.
    fixture
        .display
        .external_monitor
        .store(true, Ordering::SeqCst);
    tx.send(Event::DisplayTopologyChanged).await.unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "inhibit:handle-lid-switch"), 2);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn lid_close_with_inhibited_suspend_locks_the_screen() {
    let fixture = fixture(false, true, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    *fixture.session.inhibited.lock().unwrap() = InhibitorFlags::SUSPEND;
    tx.send(Event::InhibitorsChanged(InhibitorFlags::SUSPEND))
        .await
        .unwrap();
    tx.send(Event::LidClosedChanged(true)).await.unwrap();
    settle().await;

    assert_eq!(count(&fixture.log, "play:lid-close"), 1);
    assert_eq!(count(&fixture.log, "screen-lock"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn sleep_prepare_lease_taken_once_and_reacquired_after_resume() {
    let fixture = fixture(false, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;
    assert_eq!(count(&fixture.log, "inhibit:sleep"), 1);

    tx.send(Event::PrepareForSleep(true)).await.unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "dpms-off"), 1);

    tx.send(Event::PrepareForSleep(false)).await.unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "inhibit:sleep"), 2);
    assert!(count(&fixture.log, "dpms-on") >= 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn screensaver_activation_blanks_immediately() {
    let fixture = fixture(false, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    tx.send(Event::ScreensaverActiveChanged(true)).await.unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "dpms-off"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn inactive_session_never_leaves_normal() {
    let fixture = fixture(true, false, false);
    fixture.session.active.store(false, Ordering::SeqCst);
    let config: Config = serde_yaml::from_str("idle-delay: 60s\n").unwrap();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(config, fixture.platform.clone(), tx.clone()).run(rx, cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 0);
    assert_eq!(count(&fixture.log, "suspend"), 0);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn startup_forces_the_display_on() {
    let fixture = fixture(false, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    // A previous instance may have left the panel blanked.
    assert_eq!(count(&fixture.log, "dpms-on"), 1);
    assert_eq!(count(&fixture.log, "dpms-off"), 0);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn coldplug_reports_the_composite_battery_before_peripherals() {
    let fixture = fixture(true, false, false);
    *fixture.power.devices.lock().unwrap() =
        vec![peripheral(DeviceKind::Mouse, WarningLevel::Low)];
    *fixture.power.display.lock().unwrap() = composite(WarningLevel::Low);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    {
        let log = fixture.log.lock().unwrap();
        let battery = log
            .iter()
            .position(|e| e == "show:Low:Battery low")
            .expect("composite battery notice");
        let mouse = log
            .iter()
            .position(|e| e == "show:Low:Mouse battery low")
            .expect("peripheral notice");
        assert!(battery < mouse);
    }

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn brightness_step_replies_and_announces() {
    let fixture = fixture(false, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    let (reply, answer) = oneshot::channel();
    tx.send(Event::Control(ControlRequest::StepBrightness {
        target: BrightnessTarget::Display,
        direction: StepDirection::Down,
        reply,
    }))
    .await
    .unwrap();

    // One step is 5% of the 400-unit range.
    assert_eq!(answer.await.unwrap().unwrap(), 95);
    assert_eq!(count(&fixture.log, "set-brightness:380"), 1);
    assert_eq!(count(&fixture.log, "brightness-changed:95"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn keyboard_toggle_round_trips_and_restores() {
    let mut fixture = fixture(false, false, false);
    let keyboard = Arc::new(FakeKeyboard {
        brightness: Mutex::new(3),
        max: 5,
    });
    fixture.platform.keyboard = Some(keyboard.clone());
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    let (reply, answer) = oneshot::channel();
    tx.send(Event::Control(ControlRequest::ToggleKeyboardBacklight { reply }))
        .await
        .unwrap();
    assert_eq!(answer.await.unwrap().unwrap(), 0);
    assert_eq!(*keyboard.brightness.lock().unwrap(), 0);
    assert_eq!(count(&fixture.log, "brightness-changed:0"), 1);

    // A second toggle restores the remembered level.
    let (reply, answer) = oneshot::channel();
    tx.send(Event::Control(ControlRequest::ToggleKeyboardBacklight { reply }))
        .await
        .unwrap();
    assert_eq!(answer.await.unwrap().unwrap(), 60);
    assert_eq!(*keyboard.brightness.lock().unwrap(), 3);
    assert_eq!(count(&fixture.log, "brightness-changed:60"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn low_flag_reconfigures_once_until_cleared() {
    let fixture = fixture(true, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );
    settle().await;

    // With the sleep action vetoed, every reconfigure closes the unplanned
    // sleep warning, which makes reconfigure runs countable in the log.
    tx.send(Event::InhibitorsChanged(InhibitorFlags::SUSPEND))
        .await
        .unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "close:SleepWarning"), 1);

    tx.send(Event::DeviceChanged(composite(WarningLevel::Low)))
        .await
        .unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "close:SleepWarning"), 2);

    // The flag is already set; a worse warning must not reconfigure again.
    tx.send(Event::DeviceChanged(composite(WarningLevel::Critical)))
        .await
        .unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "close:SleepWarning"), 2);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn config_reload_rearms_against_the_same_idle_clock() {
    let fixture = fixture(true, false, false);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(Config::default(), fixture.platform.clone(), tx.clone())
            .run(rx, cancel.clone()),
    );

    // Default dim point is 300s; nothing happens in the first 40s.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 0);

    // The reloaded dim point (30s) is already in the past, so the watch
    // fires as soon as it is re-armed.
    let reloaded: Config = serde_yaml::from_str("idle-delay: 60s\n").unwrap();
    tx.send(Event::ConfigChanged(reloaded)).await.unwrap();
    settle().await;
    assert_eq!(count(&fixture.log, "set-brightness:120"), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn keyboard_backlight_toggles_off_on_blank_and_back_on() {
    let mut fixture = fixture(true, false, false);
    let keyboard = Arc::new(FakeKeyboard {
        brightness: Mutex::new(3),
        max: 5,
    });
    fixture.platform.keyboard = Some(keyboard.clone());
    let config: Config = serde_yaml::from_str("idle-delay: 60s\n").unwrap();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(
        PowerManager::new(config, fixture.platform.clone(), tx.clone()).run(rx, cancel.clone()),
    );
    settle().await;

    tx.send(Event::ScreensaverActiveChanged(true)).await.unwrap();
    settle().await;
    assert_eq!(*keyboard.brightness.lock().unwrap(), 0);

    tx.send(Event::UserActivity).await.unwrap();
    settle().await;
    assert_eq!(*keyboard.brightness.lock().unwrap(), 3);

    cancel.cancel();
    run.await.unwrap().unwrap();
}
