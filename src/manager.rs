use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{self, InhibitorFlags, PowerAction};
use crate::battery::{
    notice_for, DeviceKind, Notice, NoticeClass, NoticeTimeout, PowerDevice, SoundEvent, Urgency,
    WarningLevel,
};
use crate::config::Config;
use crate::events::{BrightnessTarget, ControlRequest, Event, StepDirection};
use crate::inhibit::{LeaseKind, LeaseTable};
use crate::modes::{transition_allowed, IdleMode};
use crate::platform::Platform;
use crate::scheduler::{plan_watches, WatchInputs, WatchKind};

/// Grace period between an Action-level battery warning and the critical
/// power action. Deliberately not cancelable, even by AC reconnection.
pub const CRITICAL_ACTION_DELAY: Duration = Duration::from_secs(20);

/// How often the lid-switch safety timer re-checks for an external monitor.
pub const LID_SAFETY_INTERVAL: Duration = Duration::from_secs(30);

/// How long the screen stays awake after plugging into AC mid-idle.
pub const UNIDLE_ON_AC_GRACE: Duration = Duration::from_secs(5);

struct ArmedWatch {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns every piece of idle/power state and is the only task that mutates
/// it. Collaborator listeners feed it events over one channel; each event
/// runs to completion before the next is dispatched.
pub struct PowerManager {
    config: Config,
    platform: Platform,
    events: Sender<Event>,

    mode: IdleMode,
    session_active: bool,
    inhibited: InhibitorFlags,
    screensaver_active: bool,
    on_battery: bool,
    battery_low: bool,
    lid_present: bool,
    lid_closed: bool,

    last_activity: Instant,
    watches: HashMap<WatchKind, ArmedWatch>,
    generation: u64,
    sleep_action: PowerAction,

    leases: LeaseTable,
    lid_safety_timer: Option<JoinHandle<()>>,
    unidle_timer: Option<JoinHandle<()>>,
    pre_unidle_mode: IdleMode,
    critical_timer: Option<JoinHandle<()>>,
    pending_critical: Option<PowerAction>,

    device_warnings: HashMap<String, (DeviceKind, WarningLevel)>,

    pre_dim_brightness: Option<u32>,
    kbd_now: i32,
    kbd_max: i32,
    kbd_pre_dim: Option<i32>,
    kbd_toggled_off_from: Option<i32>,
}

impl PowerManager {
    pub fn new(config: Config, platform: Platform, events: Sender<Event>) -> Self {
        let sleep_action = config.sleep_action(false);
        Self {
            config,
            platform,
            events,
            mode: IdleMode::Normal,
            session_active: true,
            inhibited: InhibitorFlags::empty(),
            screensaver_active: false,
            on_battery: false,
            battery_low: false,
            lid_present: false,
            lid_closed: false,
            last_activity: Instant::now(),
            watches: HashMap::new(),
            generation: 0,
            sleep_action,
            leases: LeaseTable::new(),
            lid_safety_timer: None,
            unidle_timer: None,
            pre_unidle_mode: IdleMode::Normal,
            critical_timer: None,
            pending_critical: None,
            device_warnings: HashMap::new(),
            pre_dim_brightness: None,
            kbd_now: -1,
            kbd_max: 0,
            kbd_pre_dim: None,
            kbd_toggled_off_from: None,
        }
    }

    pub async fn run(mut self, mut rx: Receiver<Event>, cancel: CancellationToken) -> Result<()> {
        self.start().await?;
        loop {
            select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }
        self.stop().await;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        match self.platform.session.is_active().await {
            Ok(active) => self.session_active = active,
            Err(err) => warn!(error = %err, "cannot read session activity, assuming active"),
        }
        match self.platform.session.inhibited_actions().await {
            Ok(flags) => self.inhibited = flags,
            Err(err) => warn!(error = %err, "cannot read inhibited actions"),
        }
        match self.platform.power.on_battery().await {
            Ok(on_battery) => self.on_battery = on_battery,
            Err(err) => warn!(error = %err, "cannot read power source, assuming AC"),
        }
        self.lid_present = self.platform.power.lid_is_present().await.unwrap_or(false);
        if self.lid_present {
            self.lid_closed = self.platform.power.lid_is_closed().await.unwrap_or(false);
        }

        self.init_keyboard_backlight().await;

        // A previous instance may have died with the panel blanked.
        if let Err(err) = self.platform.display.dpms_on().await {
            warn!(error = %err, "failed to force the display on at startup");
        }

        // Hold the sleep-prepare delay lease from the start, so we always
        // get a chance to blank before the OS sleeps.
        self.request_lease(LeaseKind::SleepPrepare);

        // Coldplug: the composite battery first, then whatever else is
        // already attached.
        match self.platform.power.display_device().await {
            Ok(device) => self.handle_device_changed(device).await,
            Err(err) => debug!(error = %err, "no composite battery device"),
        }
        match self.platform.power.devices().await {
            Ok(devices) => {
                for device in devices {
                    self.handle_device_changed(device).await;
                }
            }
            Err(err) => warn!(error = %err, "device coldplug enumeration failed"),
        }

        if self.lid_present {
            self.handle_topology_changed().await;
        }

        self.reconfigure().await;
        info!(
            session_active = self.session_active,
            on_battery = self.on_battery,
            lid_present = self.lid_present,
            "power manager started"
        );
        Ok(())
    }

    async fn stop(&mut self) {
        for (_, watch) in self.watches.drain() {
            watch.handle.abort();
        }
        if let Some(handle) = self.lid_safety_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.unidle_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.critical_timer.take() {
            handle.abort();
        }
        self.platform.notices.stop_alert_loop().await;
        // Leases must not outlive the process or the OS stays blocked.
        self.leases.release_all();
        info!("power manager stopped");
    }

    async fn dispatch(&mut self, event: Event) {
        match event {
            Event::UserActivity => self.handle_user_activity().await,
            Event::WatchFired { kind, generation } => {
                self.handle_watch_fired(kind, generation).await
            }
            Event::SessionActiveChanged(active) => self.handle_session_active(active).await,
            Event::InhibitorsChanged(flags) => self.handle_inhibitors(flags).await,
            Event::ScreensaverActiveChanged(active) => self.handle_screensaver(active).await,
            Event::OnBatteryChanged(on_battery) => self.handle_on_battery(on_battery).await,
            Event::LidClosedChanged(closed) => self.handle_lid(closed).await,
            Event::DisplayTopologyChanged => self.handle_topology_changed().await,
            Event::PrepareForSleep(start) => self.handle_prepare_for_sleep(start).await,
            Event::DeviceAdded(device) => self.handle_device_changed(device).await,
            Event::DeviceRemoved(id) => {
                self.device_warnings.remove(&id);
                self.recompute_low_flag().await;
            }
            Event::DeviceChanged(device) => self.handle_device_changed(device).await,
            Event::LeaseAcquired { kind, lease } => self.leases.finish_acquire(kind, lease),
            Event::CriticalActionDue => self.handle_critical_due().await,
            Event::LidSafetyCheck => self.handle_lid_safety_check().await,
            Event::UnidleGraceElapsed => self.handle_unidle_elapsed().await,
            Event::ConfigChanged(config) => self.handle_config_changed(config).await,
            Event::Control(request) => self.handle_control(request).await,
        }
    }

    // ---- idle machinery -------------------------------------------------

    /// Re-arm the idle watches against the current inputs. The single
    /// re-entry point for every policy-relevant change.
    async fn reconfigure(&mut self) {
        if !self.session_active || self.inhibited.contains(InhibitorFlags::IDLE) {
            debug!(
                session_active = self.session_active,
                "idle inhibited, disarming all watches"
            );
            self.request_transition(IdleMode::Normal).await;
            self.disarm_all();
            self.platform.notices.close(NoticeClass::SleepWarning).await;
            return;
        }

        let action = self.config.sleep_action(self.on_battery);
        self.sleep_action = action;
        let inputs = WatchInputs {
            screensaver_active: self.screensaver_active,
            on_battery: self.on_battery,
            battery_low: self.battery_low,
            sleep_action_inhibited: self.is_action_inhibited(action),
        };
        let plan = plan_watches(&self.config, &inputs);
        for kind in WatchKind::ALL {
            self.arm(kind, plan.delay_for(kind));
        }
        if plan.sleep_warning.is_none() {
            self.platform.notices.close(NoticeClass::SleepWarning).await;
        }
        debug!(?plan, "idle watches reconfigured");
    }

    fn arm(&mut self, kind: WatchKind, delay: Option<Duration>) {
        if let Some(previous) = self.watches.remove(&kind) {
            previous.handle.abort();
        }
        let Some(delay) = delay else { return };
        self.generation += 1;
        let generation = self.generation;
        let deadline = self.last_activity + delay;
        let tx = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Event::WatchFired { kind, generation }).await;
        });
        self.watches.insert(kind, ArmedWatch { generation, handle });
    }

    fn disarm_all(&mut self) {
        for (_, watch) in self.watches.drain() {
            watch.handle.abort();
        }
    }

    async fn handle_watch_fired(&mut self, kind: WatchKind, generation: u64) {
        let live = self
            .watches
            .get(&kind)
            .is_some_and(|watch| watch.generation == generation);
        if !live {
            debug!(watch = %kind, "stale watch fire ignored");
            return;
        }
        self.watches.remove(&kind);
        debug!(watch = %kind, "idle watch fired");
        match kind {
            WatchKind::Dim => self.request_transition(IdleMode::Dim).await,
            WatchKind::Blank => self.request_transition(IdleMode::Blank).await,
            WatchKind::Sleep => self.request_transition(IdleMode::Sleep).await,
            WatchKind::SleepWarning => self.show_sleep_warning().await,
        }
    }

    async fn request_transition(&mut self, target: IdleMode) {
        if !transition_allowed(self.mode, target) {
            debug!(current = %self.mode, target = %target, "transition rejected");
            return;
        }
        if target != IdleMode::Normal
            && (!self.session_active || self.platform.is_virtual_machine)
        {
            debug!(target = %target, "transition blocked, session inactive or virtualized");
            return;
        }
        if self.mode != target {
            info!(from = %self.mode, to = %target, "idle mode");
        }
        self.mode = target;
        match target {
            IdleMode::Normal => self.apply_normal().await,
            IdleMode::Dim => self.apply_dim().await,
            IdleMode::Blank => self.apply_blank().await,
            IdleMode::Sleep => {
                actions::perform(self.config.sleep_action(self.on_battery), &self.platform).await
            }
        }
    }

    async fn apply_dim(&mut self) {
        if self.platform.display.has_backlight() {
            if let Err(err) = self.dim_display().await {
                warn!(error = %err, "failed to dim display");
            }
        }
        if self.platform.keyboard.is_some() {
            if let Err(err) = self.dim_keyboard().await {
                warn!(error = %err, "failed to dim keyboard backlight");
            }
        }
    }

    async fn dim_display(&mut self) -> Result<()> {
        let now = self.platform.display.brightness().await?;
        let max = self.platform.display.max_brightness().await?;
        let target = percentage_to_abs(max, self.config.idle_brightness);
        if target >= now {
            debug!("display already dimmer than the idle level");
            return Ok(());
        }
        self.platform.display.set_brightness(target).await?;
        self.pre_dim_brightness = Some(now);
        Ok(())
    }

    async fn dim_keyboard(&mut self) -> Result<()> {
        if self.kbd_now <= 0 {
            return Ok(());
        }
        let previous = self.kbd_now;
        self.kbd_set(0).await?;
        self.kbd_pre_dim = Some(previous);
        Ok(())
    }

    async fn apply_blank(&mut self) {
        if let Err(err) = self.platform.display.dpms_off().await {
            warn!(error = %err, "failed to power off display");
        }
        if self.platform.keyboard.is_some() && self.kbd_toggled_off_from.is_none() {
            if let Err(err) = self.kbd_toggle().await {
                warn!(error = %err, "failed to switch keyboard backlight off");
            }
        }
    }

    async fn apply_normal(&mut self) {
        if let Err(err) = self.platform.display.dpms_on().await {
            warn!(error = %err, "failed to power on display");
        }
        if let Some(previous) = self.pre_dim_brightness {
            match self.platform.display.set_brightness(previous).await {
                // Cleared only on success so the next reset retries.
                Ok(()) => self.pre_dim_brightness = None,
                Err(err) => warn!(error = %err, "failed to restore display brightness"),
            }
        }
        if self.kbd_toggled_off_from.is_some() {
            if let Err(err) = self.kbd_toggle().await {
                warn!(error = %err, "failed to switch keyboard backlight back on");
            }
        }
        if let Some(previous) = self.kbd_pre_dim.take() {
            if let Err(err) = self.kbd_set(previous).await {
                warn!(error = %err, "failed to restore keyboard brightness");
            }
        }
    }

    async fn handle_user_activity(&mut self) {
        self.last_activity = Instant::now();
        if let Some(handle) = self.unidle_timer.take() {
            handle.abort();
        }
        self.platform.notices.close(NoticeClass::SleepWarning).await;
        if self.mode != IdleMode::Normal {
            self.request_transition(IdleMode::Normal).await;
        }
        self.reconfigure().await;
    }

    async fn show_sleep_warning(&mut self) {
        let action = self.sleep_action;
        let body = match action {
            PowerAction::Logout => {
                "You will be logged out soon because of inactivity.".to_owned()
            }
            PowerAction::Hibernate => {
                "The computer will hibernate soon because of inactivity.".to_owned()
            }
            _ => "The computer will suspend soon because of inactivity.".to_owned(),
        };
        self.platform
            .notices
            .show(
                NoticeClass::SleepWarning,
                Notice {
                    summary: "Automatic sleep".to_owned(),
                    body,
                    urgency: Urgency::Critical,
                    timeout: NoticeTimeout::Never,
                },
            )
            .await;
        // A pending logout wakes the screen so the warning is seen.
        if action == PowerAction::Logout {
            self.start_unidle_grace().await;
        }
    }

    // ---- external condition changes -------------------------------------

    async fn handle_session_active(&mut self, active: bool) {
        if active == self.session_active {
            return;
        }
        self.session_active = active;
        if active {
            self.request_transition(IdleMode::Normal).await;
        }
        self.reconfigure().await;
    }

    async fn handle_config_changed(&mut self, config: Config) {
        info!("configuration reloaded");
        self.config = config;
        self.reconfigure().await;
    }

    async fn handle_inhibitors(&mut self, flags: InhibitorFlags) {
        if flags == self.inhibited {
            return;
        }
        debug!(?flags, "application inhibitors changed");
        self.inhibited = flags;
        self.reconfigure().await;
    }

    async fn handle_screensaver(&mut self, active: bool) {
        if active == self.screensaver_active {
            return;
        }
        self.screensaver_active = active;
        self.reconfigure().await;
        if active {
            self.request_transition(IdleMode::Blank).await;
        }
    }

    async fn handle_on_battery(&mut self, on_battery: bool) {
        if on_battery == self.on_battery {
            return;
        }
        self.on_battery = on_battery;
        self.reconfigure().await;
        if !on_battery {
            // Back on AC: stale low-power state no longer applies.
            self.platform.notices.stop_alert_loop().await;
            self.platform.notices.close(NoticeClass::Low).await;
            self.set_battery_low(false).await;
            if !self.lid_closed
                && (matches!(self.mode, IdleMode::Dim | IdleMode::Blank)
                    || self.unidle_timer.is_some())
            {
                self.start_unidle_grace().await;
            }
        }
    }

    async fn start_unidle_grace(&mut self) {
        match self.unidle_timer.take() {
            // Re-entrant call: extend the window, keep the remembered mode.
            Some(handle) => handle.abort(),
            None => {
                self.pre_unidle_mode = self.mode;
                self.request_transition(IdleMode::Normal).await;
            }
        }
        let tx = self.events.clone();
        self.unidle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(UNIDLE_ON_AC_GRACE).await;
            let _ = tx.send(Event::UnidleGraceElapsed).await;
        }));
    }

    async fn handle_unidle_elapsed(&mut self) {
        self.unidle_timer = None;
        let target = self.pre_unidle_mode;
        if target != IdleMode::Normal {
            debug!(mode = %target, "un-idle grace over, restoring idle mode");
            self.request_transition(target).await;
        }
    }

    async fn handle_prepare_for_sleep(&mut self, about_to_sleep: bool) {
        if about_to_sleep {
            info!("system going to sleep");
            if let Err(err) = self.platform.display.dpms_off().await {
                warn!(error = %err, "failed to blank display before sleep");
            }
            // The OS consumes the delay lease when sleep proceeds.
            self.leases.release(LeaseKind::SleepPrepare);
        } else {
            info!("system resumed");
            self.platform.notices.close(NoticeClass::Low).await;
            self.platform
                .notices
                .close(NoticeClass::UpsDischarging)
                .await;
            self.set_battery_low(false).await;
            if let Err(err) = self.platform.display.dpms_on().await {
                warn!(error = %err, "failed to wake display after resume");
            }
            self.last_activity = Instant::now();
            self.request_transition(IdleMode::Normal).await;
            self.reconfigure().await;
            self.request_lease(LeaseKind::SleepPrepare);
        }
    }

    // ---- lid ------------------------------------------------------------

    async fn handle_lid(&mut self, closed: bool) {
        if !self.lid_present || closed == self.lid_closed {
            return;
        }
        self.lid_closed = closed;
        if closed {
            self.handle_lid_closed().await;
        } else {
            self.handle_lid_opened().await;
        }
    }

    async fn handle_lid_closed(&mut self) {
        self.platform.notices.play(SoundEvent::LidClose).await;
        if let Err(err) = self.platform.display.refresh_topology().await {
            debug!(error = %err, "topology refresh on lid close failed");
        }
        if self.suspend_on_lid_close().await {
            // The OS will suspend unless an application holds it back; in
            // that case the screen must at least lock.
            if self.is_action_inhibited(PowerAction::Suspend) {
                info!("lid closed with suspend inhibited, locking screen");
                self.lock_screen().await;
            }
            self.restart_lid_safety_timer();
        } else {
            self.stop_lid_safety_timer();
        }
    }

    async fn handle_lid_opened(&mut self) {
        self.platform.notices.play(SoundEvent::LidOpen).await;
        self.last_activity = Instant::now();
        self.reconfigure().await;
    }

    async fn handle_topology_changed(&mut self) {
        if !self.lid_present {
            return;
        }
        if self.suspend_on_lid_close().await {
            if self.lid_safety_timer.is_some() {
                self.restart_lid_safety_timer();
            }
        } else {
            // An external monitor is driving the session: keep the OS from
            // suspending on lid close, and keep re-checking.
            self.request_lease(LeaseKind::LidSwitch);
            self.restart_lid_safety_timer();
        }
    }

    async fn handle_lid_safety_check(&mut self) {
        if self.suspend_on_lid_close().await {
            debug!("external monitor gone, releasing lid-switch inhibitor");
            self.leases.release(LeaseKind::LidSwitch);
            self.stop_lid_safety_timer();
        }
    }

    fn restart_lid_safety_timer(&mut self) {
        self.stop_lid_safety_timer();
        let tx = self.events.clone();
        self.lid_safety_timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(LID_SAFETY_INTERVAL).await;
                if tx.send(Event::LidSafetyCheck).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_lid_safety_timer(&mut self) {
        if let Some(handle) = self.lid_safety_timer.take() {
            handle.abort();
        }
    }

    async fn suspend_on_lid_close(&self) -> bool {
        if self.config.lid_close_suspend_with_external_monitor {
            return true;
        }
        match self.platform.display.external_monitor_connected().await {
            Ok(external) => !external,
            Err(err) => {
                warn!(error = %err, "cannot check for external monitors, assuming none");
                true
            }
        }
    }

    async fn lock_screen(&self) {
        let result = if self.config.screensaver_lock_enabled {
            self.platform.screensaver.lock().await
        } else {
            self.platform.screensaver.set_active(true).await
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to engage screensaver");
        }
    }

    // ---- leases ---------------------------------------------------------

    fn request_lease(&mut self, kind: LeaseKind) {
        if !self.leases.begin_acquire(kind) {
            return;
        }
        let sleep = self.platform.sleep.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let lease = match sleep.inhibit(kind, "drowsed").await {
                Ok(lease) => Some(lease),
                Err(err) => {
                    // The protection is simply absent; nothing retries until
                    // the next natural trigger.
                    warn!(lease = %kind, error = %err, "inhibitor acquisition failed");
                    None
                }
            };
            let _ = tx.send(Event::LeaseAcquired { kind, lease }).await;
        });
    }

    // ---- battery warnings -----------------------------------------------

    async fn handle_device_changed(&mut self, device: PowerDevice) {
        // Raw batteries and line power feed the composite device; only the
        // composite, UPSes, and peripherals warn on their own behalf.
        if !device.composite
            && matches!(device.kind, DeviceKind::Battery | DeviceKind::LinePower)
        {
            return;
        }
        let previous = self
            .device_warnings
            .get(&device.id)
            .map(|(_, warning)| *warning)
            .unwrap_or_default();
        self.device_warnings
            .insert(device.id.clone(), (device.kind, device.warning));
        if device.warning == previous {
            self.recompute_low_flag().await;
            return;
        }
        debug!(
            device = %device.id,
            kind = %device.kind,
            warning = %device.warning,
            "device warning level changed"
        );

        // A battery that is not discharging has nothing to warn about.
        let idle_battery = device.kind == DeviceKind::Battery && !self.on_battery;
        match device.warning {
            WarningLevel::None => {
                self.platform.notices.close(NoticeClass::Low).await;
                if device.kind == DeviceKind::Ups {
                    self.platform
                        .notices
                        .close(NoticeClass::UpsDischarging)
                        .await;
                }
            }
            _ if idle_battery => {
                debug!(device = %device.id, "on AC, suppressing battery warning");
            }
            WarningLevel::Discharging => {
                self.show_warning_notice(&device).await;
            }
            WarningLevel::Low => {
                self.show_warning_notice(&device).await;
                self.platform.notices.play(SoundEvent::BatteryLow).await;
            }
            WarningLevel::Critical => {
                self.show_warning_notice(&device).await;
                if matches!(device.kind, DeviceKind::Battery | DeviceKind::Ups) {
                    self.platform.notices.start_alert_loop().await;
                }
            }
            WarningLevel::Action => {
                self.show_warning_notice(&device).await;
                self.platform.notices.play(SoundEvent::BatteryCaution).await;
                if matches!(device.kind, DeviceKind::Battery | DeviceKind::Ups) {
                    self.arm_critical_action().await;
                }
            }
        }
        self.recompute_low_flag().await;
    }

    async fn show_warning_notice(&mut self, device: &PowerDevice) {
        let policy = self
            .platform
            .power
            .critical_policy()
            .await
            .unwrap_or(PowerAction::Hibernate);
        let Some(notice) = notice_for(device, policy) else {
            return;
        };
        let class = if device.kind == DeviceKind::Ups
            && device.warning == WarningLevel::Discharging
        {
            NoticeClass::UpsDischarging
        } else {
            NoticeClass::Low
        };
        self.platform.notices.show(class, notice).await;
    }

    async fn arm_critical_action(&mut self) {
        if self.pending_critical.is_some() {
            return;
        }
        let policy = self
            .platform
            .power
            .critical_policy()
            .await
            .unwrap_or(PowerAction::Hibernate);
        info!(
            action = %policy,
            delay = ?CRITICAL_ACTION_DELAY,
            "battery empty, critical action armed"
        );
        self.pending_critical = Some(policy);
        let tx = self.events.clone();
        self.critical_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(CRITICAL_ACTION_DELAY).await;
            let _ = tx.send(Event::CriticalActionDue).await;
        }));
    }

    async fn handle_critical_due(&mut self) {
        self.critical_timer = None;
        self.platform.notices.stop_alert_loop().await;
        if let Some(action) = self.pending_critical.take() {
            info!(action = %action, "critical action grace period over");
            actions::perform(action, &self.platform).await;
        }
    }

    /// The system-wide low flag follows batteries and UPSes only, via a
    /// single setter that short-circuits when nothing changed.
    async fn recompute_low_flag(&mut self) {
        let low = self
            .device_warnings
            .values()
            .any(|(kind, warning)| {
                matches!(kind, DeviceKind::Battery | DeviceKind::Ups)
                    && warning.is_low_or_worse()
            });
        self.set_battery_low(low).await;
    }

    async fn set_battery_low(&mut self, low: bool) {
        if low == self.battery_low {
            return;
        }
        self.battery_low = low;
        if !low {
            for (_, warning) in self.device_warnings.values_mut() {
                if warning.is_low_or_worse() {
                    *warning = WarningLevel::None;
                }
            }
        }
        self.reconfigure().await;
    }

    // ---- brightness controls --------------------------------------------

    fn is_action_inhibited(&self, action: PowerAction) -> bool {
        let flags = action.inhibitor_flags();
        !flags.is_empty() && self.inhibited.intersects(flags)
    }

    async fn init_keyboard_backlight(&mut self) {
        let Some(keyboard) = self.platform.keyboard.clone() else {
            return;
        };
        match keyboard.max_brightness().await {
            Ok(max) => self.kbd_max = max,
            Err(err) => {
                warn!(error = %err, "keyboard backlight unusable");
                self.platform.keyboard = None;
                return;
            }
        }
        match keyboard.brightness().await {
            Ok(now) => self.kbd_now = now,
            Err(err) => warn!(error = %err, "cannot read keyboard brightness"),
        }
        // A keyboard backlight that is off at login gets switched on full.
        if self.kbd_now <= 0 {
            if let Err(err) = self.kbd_set(self.kbd_max).await {
                warn!(error = %err, "cannot raise keyboard backlight");
            }
        }
    }

    async fn kbd_set(&mut self, value: i32) -> Result<()> {
        let Some(keyboard) = &self.platform.keyboard else {
            return Ok(());
        };
        if value == self.kbd_now {
            return Ok(());
        }
        keyboard.set_brightness(value).await?;
        self.kbd_now = value;
        Ok(())
    }

    /// Switch the keyboard backlight off (remembering the level) or back on.
    /// Returns the new absolute brightness.
    async fn kbd_toggle(&mut self) -> Result<i32> {
        match self.kbd_toggled_off_from.take() {
            Some(previous) => {
                if let Err(err) = self.kbd_set(previous).await {
                    self.kbd_toggled_off_from = Some(previous);
                    return Err(err);
                }
                Ok(previous)
            }
            None => {
                let previous = self.kbd_now;
                self.kbd_set(0).await?;
                self.kbd_toggled_off_from = Some(previous);
                Ok(0)
            }
        }
    }

    async fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::StepBrightness {
                target,
                direction,
                reply,
            } => {
                let result = match target {
                    BrightnessTarget::Display => self.step_display_brightness(direction).await,
                    BrightnessTarget::Keyboard => self.step_keyboard_brightness(direction).await,
                };
                match &result {
                    Ok(percentage) => {
                        self.platform
                            .notices
                            .brightness_changed(target, *percentage)
                            .await
                    }
                    Err(err) => warn!(error = %err, "brightness step failed"),
                }
                let _ = reply.send(result);
            }
            ControlRequest::ToggleKeyboardBacklight { reply } => {
                let result = self.toggle_keyboard_request().await;
                match &result {
                    Ok(percentage) => {
                        self.platform
                            .notices
                            .brightness_changed(BrightnessTarget::Keyboard, *percentage)
                            .await
                    }
                    Err(err) => warn!(error = %err, "keyboard backlight toggle failed"),
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn step_display_brightness(&mut self, direction: StepDirection) -> Result<u32> {
        if !self.platform.display.has_backlight() {
            return Err(anyhow!("no display backlight"));
        }
        let now = self.platform.display.brightness().await?;
        let max = self.platform.display.max_brightness().await?;
        let step = step_amount(max);
        let value = match direction {
            StepDirection::Up => (now + step).min(max),
            StepDirection::Down => now.saturating_sub(step),
        };
        self.platform.display.set_brightness(value).await?;
        Ok(abs_to_percentage(max, value))
    }

    async fn step_keyboard_brightness(&mut self, direction: StepDirection) -> Result<u32> {
        if self.platform.keyboard.is_none() || self.kbd_max <= 0 {
            return Err(anyhow!("no keyboard backlight"));
        }
        let step = step_amount(self.kbd_max as u32) as i32;
        let value = match direction {
            StepDirection::Up => (self.kbd_now + step).min(self.kbd_max),
            StepDirection::Down => (self.kbd_now - step).max(0),
        };
        self.kbd_set(value).await?;
        Ok(abs_to_percentage(self.kbd_max as u32, value as u32))
    }

    async fn toggle_keyboard_request(&mut self) -> Result<u32> {
        if self.platform.keyboard.is_none() || self.kbd_max <= 0 {
            return Err(anyhow!("no keyboard backlight"));
        }
        let value = self.kbd_toggle().await?;
        Ok(abs_to_percentage(self.kbd_max as u32, value.max(0) as u32))
    }
}

/// Five percent of the range, with a floor of one device unit.
fn step_amount(max: u32) -> u32 {
    (max / 20).max(1)
}

fn abs_to_percentage(max: u32, value: u32) -> u32 {
    if max == 0 {
        return 0;
    }
    ((value as f64) * 100.0 / (max as f64)).round() as u32
}

fn percentage_to_abs(max: u32, percentage: u32) -> u32 {
    ((max as f64) * (percentage as f64) / 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_is_five_percent_with_a_floor() {
        assert_eq!(step_amount(100), 5);
        assert_eq!(step_amount(400), 20);
        assert_eq!(step_amount(10), 1);
        assert_eq!(step_amount(3), 1);
    }

    #[test]
    fn percentage_conversions_round_trip_at_the_edges() {
        assert_eq!(abs_to_percentage(400, 400), 100);
        assert_eq!(abs_to_percentage(400, 0), 0);
        assert_eq!(abs_to_percentage(0, 0), 0);
        assert_eq!(percentage_to_abs(400, 30), 120);
        assert_eq!(percentage_to_abs(400, 100), 400);
    }
}
