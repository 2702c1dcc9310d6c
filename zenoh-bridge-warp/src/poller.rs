//! Poll scheduling: the update cycle and the sign-of-life heartbeat.
//!
//! The update timer fetches the charger state and hardware configuration,
//! maps them and publishes the results. Failures are contained to the
//! cycle they happen in. The heartbeat timer only reads the update state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use warp_bridge_common::{PropertyValue, current_timestamp_millis};

use crate::bus::{PropertyBus, publish_all};
use crate::client::DeviceApi;
use crate::error::{BridgeError, Result};
use crate::mapper::{Position, map_max_current_amps, map_status};
use crate::model::{PublishedModel, paths};

/// Default update period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

const COUNTER_BITS: u32 = 8;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;
const MAX_MILLIS: i64 = (1 << (64 - COUNTER_BITS)) - 1;

/// Where the update loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollPhase {
    /// Waiting for the next tick.
    Idle = 0,
    /// A cycle is in flight.
    Polling = 1,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every value was mapped and published.
    Success(RuntimeSnapshot),
    /// The cycle was abandoned; nothing was changed.
    Failed,
}

impl CycleOutcome {
    /// Whether the cycle succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success(_))
    }
}

/// Consistent view of the runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSnapshot {
    /// Unix milliseconds of the last successful cycle.
    pub last_update_millis: Option<i64>,
    /// Successful cycles so far, modulo 256.
    pub update_index: u8,
}

impl RuntimeSnapshot {
    /// Time of the last successful cycle.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update_millis
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

/// Last-update timestamp and update counter.
///
/// Both live in a single `AtomicU64` (timestamp in the upper 56 bits,
/// counter in the low byte) so the heartbeat never sees one without the
/// other. A zero timestamp means no cycle has succeeded yet.
#[derive(Debug, Default)]
pub struct RuntimeState {
    packed: AtomicU64,
    phase: AtomicU8,
    beats: AtomicU64,
}

impl RuntimeState {
    /// Create a state with no successful cycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read timestamp and counter together.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        unpack(self.packed.load(Ordering::Acquire))
    }

    /// Record a successful cycle finishing at `now_millis`.
    ///
    /// The counter wraps at 256. The timestamp never moves backwards,
    /// even when the wall clock does.
    pub fn record_success(&self, now_millis: i64) -> RuntimeSnapshot {
        let now = now_millis.clamp(1, MAX_MILLIS) as u64;
        let advance = |packed: u64| {
            let millis = (packed >> COUNTER_BITS).max(now);
            let counter = ((packed & COUNTER_MASK) as u8).wrapping_add(1);
            (millis << COUNTER_BITS) | u64::from(counter)
        };

        let previous = match self
            .packed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                Some(advance(packed))
            }) {
            Ok(previous) | Err(previous) => previous,
        };

        unpack(advance(previous))
    }

    /// Current phase of the update loop.
    pub fn phase(&self) -> PollPhase {
        match self.phase.load(Ordering::Acquire) {
            1 => PollPhase::Polling,
            _ => PollPhase::Idle,
        }
    }

    fn set_phase(&self, phase: PollPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Number of sign-of-life messages logged so far.
    pub fn sign_of_life_count(&self) -> u64 {
        self.beats.load(Ordering::Acquire)
    }

    fn record_beat(&self) -> u64 {
        self.beats.fetch_add(1, Ordering::AcqRel) + 1
    }
}

fn unpack(packed: u64) -> RuntimeSnapshot {
    let millis = packed >> COUNTER_BITS;
    RuntimeSnapshot {
        last_update_millis: (millis != 0).then_some(millis as i64),
        update_index: (packed & COUNTER_MASK) as u8,
    }
}

/// Scheduler settings taken from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Update timer period.
    pub poll_interval: Duration,
    /// Heartbeat period, `None` when disabled.
    pub sign_of_life: Option<Duration>,
    /// Position published each cycle, `None` when not published.
    pub position: Option<Position>,
    /// Nominal grid voltage published on `/Ac/Voltage`.
    pub nominal_voltage: f64,
    /// Charging mode published on `/Mode`.
    pub mode: i64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            sign_of_life: Some(Duration::from_secs(5 * 60)),
            position: Some(Position::AcOutput),
            nominal_voltage: 230.0,
            mode: 0,
        }
    }
}

/// Drives the update and heartbeat timers.
pub struct PollScheduler<D, B> {
    device: Arc<D>,
    bus: Arc<B>,
    model: Arc<RwLock<PublishedModel>>,
    state: Arc<RuntimeState>,
    settings: PollSettings,
}

impl<D, B> Clone for PollScheduler<D, B> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            bus: Arc::clone(&self.bus),
            model: Arc::clone(&self.model),
            state: Arc::clone(&self.state),
            settings: self.settings.clone(),
        }
    }
}

impl<D: DeviceApi, B: PropertyBus> PollScheduler<D, B> {
    /// Create a scheduler over an already declared model.
    pub fn new(
        device: Arc<D>,
        bus: Arc<B>,
        model: Arc<RwLock<PublishedModel>>,
        settings: PollSettings,
    ) -> Self {
        Self {
            device,
            bus,
            model,
            state: Arc::new(RuntimeState::new()),
            settings,
        }
    }

    /// Shared runtime state.
    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// Fetch, map and publish once.
    ///
    /// Any fetch or mapping error aborts the cycle before a property is
    /// touched. Publish failures are logged and do not fail the cycle.
    pub async fn poll_once(&self) -> Result<RuntimeSnapshot> {
        let (hardware, state) = tokio::try_join!(
            self.device.fetch_hardware_config(),
            self.device.fetch_state(),
        )?;

        debug!(
            charger_state = state.charger_state,
            error_state = ?state.error_state,
            allowed_charging_current = ?state.allowed_charging_current,
            jumper_configuration = hardware.jumper_configuration,
            "Device state fetched"
        );

        let status = map_status(state.charger_state)?;
        let max_current = map_max_current_amps(hardware.jumper_configuration);

        let mut values: Vec<(&'static str, PropertyValue)> = vec![
            (paths::STATUS, status.code().into()),
            (paths::MAX_CURRENT, max_current.into()),
        ];
        if let Some(position) = self.settings.position {
            values.push((paths::POSITION, position.code().into()));
        }
        values.extend([
            (paths::AC_VOLTAGE, self.settings.nominal_voltage.into()),
            (paths::MODE, self.settings.mode.into()),
            (paths::CONNECTED, 1i64.into()),
        ]);

        let (updates, snapshot) = {
            let mut model = self.model.write().await;
            if !model.contains(paths::UPDATE_INDEX) {
                return Err(BridgeError::UnknownProperty(paths::UPDATE_INDEX.to_string()));
            }

            let mut updates = model.set_values(values)?;
            let snapshot = self.state.record_success(current_timestamp_millis());
            updates.push(model.set_value(paths::UPDATE_INDEX, snapshot.update_index)?);
            (updates, snapshot)
        };

        let stats = publish_all(self.bus.as_ref(), &updates).await;
        debug!(
            status = %status,
            max_current,
            update_index = snapshot.update_index,
            published = stats.success,
            failed = stats.failed,
            "Poll cycle complete"
        );

        Ok(snapshot)
    }

    /// Run one cycle, containing and logging any failure.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.state.set_phase(PollPhase::Polling);

        let outcome = match self.poll_once().await {
            Ok(snapshot) => CycleOutcome::Success(snapshot),
            Err(e) if e.is_per_cycle() => {
                error!(
                    severity = "critical",
                    operation = e.endpoint().unwrap_or("update"),
                    error = %e,
                    "Poll cycle failed, retrying on next tick"
                );
                CycleOutcome::Failed
            }
            Err(e) => {
                error!(
                    severity = "critical",
                    operation = "update",
                    error = %e,
                    "Published model rejected the poll update"
                );
                CycleOutcome::Failed
            }
        };

        self.state.set_phase(PollPhase::Idle);
        outcome
    }

    /// Run the update timer until the task is aborted.
    ///
    /// Each cycle is awaited before the next tick; ticks missed while a
    /// slow cycle runs are skipped.
    pub async fn run_updates(self) {
        let period = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_ms = period.as_millis() as u64, "Starting update timer");

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    /// Run the heartbeat timer until the task is aborted.
    pub async fn run_heartbeat(self, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "Starting sign-of-life timer");

        loop {
            ticker.tick().await;
            self.log_sign_of_life();
        }
    }

    /// Log the last successful update and the counter.
    pub fn log_sign_of_life(&self) -> RuntimeSnapshot {
        let snapshot = self.state.snapshot();
        let last_update = snapshot
            .last_update()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "never".to_string());

        info!(
            last_update = %last_update,
            update_index = snapshot.update_index,
            phase = ?self.state.phase(),
            beat = self.state.record_beat(),
            "Sign of life"
        );

        snapshot
    }

    /// Spawn the update timer and, when enabled, the heartbeat timer.
    pub fn spawn(&self) -> SchedulerHandle {
        let update = tokio::spawn(self.clone().run_updates());
        let heartbeat = self
            .settings
            .sign_of_life
            .map(|period| tokio::spawn(self.clone().run_heartbeat(period)));

        SchedulerHandle { update, heartbeat }
    }
}

/// Handles to the running timer tasks.
#[derive(Debug)]
pub struct SchedulerHandle {
    update: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Whether a heartbeat timer was started.
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Stop both timers and wait until they are gone.
    pub async fn stop(self) {
        self.update.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }

        let _ = self.update.await;
        if let Some(heartbeat) = self.heartbeat {
            let _ = heartbeat.await;
        }

        debug!("Timers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::testing::{FakeDevice, poll_model};

    type Scheduler = PollScheduler<FakeDevice, MemoryBus>;

    fn build(
        device: FakeDevice,
        settings: PollSettings,
    ) -> (Scheduler, Arc<FakeDevice>, Arc<MemoryBus>) {
        let device = Arc::new(device);
        let bus = Arc::new(MemoryBus::new());
        let model = Arc::new(RwLock::new(poll_model()));
        let scheduler = PollScheduler::new(device.clone(), bus.clone(), model, settings);
        (scheduler, device, bus)
    }

    #[test]
    fn test_runtime_state_starts_empty() {
        let state = RuntimeState::new();
        assert_eq!(state.snapshot(), RuntimeSnapshot::default());
        assert_eq!(state.snapshot().last_update(), None);
        assert_eq!(state.phase(), PollPhase::Idle);
    }

    #[test]
    fn test_counter_wraps_at_256() {
        let state = RuntimeState::new();
        for i in 1..=255u32 {
            assert_eq!(state.record_success(1_700_000_000_000).update_index, i as u8);
        }
        assert_eq!(state.record_success(1_700_000_000_000).update_index, 0);
        assert_eq!(state.record_success(1_700_000_000_000).update_index, 1);
    }

    #[test]
    fn test_timestamp_never_goes_backwards() {
        let state = RuntimeState::new();
        state.record_success(1_700_000_005_000);
        let snapshot = state.record_success(1_700_000_000_000);

        assert_eq!(snapshot.last_update_millis, Some(1_700_000_005_000));
        assert_eq!(snapshot.update_index, 2);
        assert_eq!(
            snapshot.last_update().unwrap().timestamp_millis(),
            1_700_000_005_000
        );
    }

    #[tokio::test]
    async fn test_cycle_maps_and_publishes() {
        let (scheduler, _, bus) = build(FakeDevice::new(2, 4), PollSettings::default());

        let outcome = scheduler.run_cycle().await;
        assert!(outcome.is_success());

        assert_eq!(bus.last_value(paths::STATUS), Some(PropertyValue::Int(6)));
        assert_eq!(bus.last_value(paths::MAX_CURRENT), Some(PropertyValue::Int(20)));
        assert_eq!(bus.last_value(paths::POSITION), Some(PropertyValue::Int(0)));
        assert_eq!(bus.last_value(paths::AC_VOLTAGE), Some(PropertyValue::Float(230.0)));
        assert_eq!(bus.last_value(paths::MODE), Some(PropertyValue::Int(0)));
        assert_eq!(bus.last_value(paths::CONNECTED), Some(PropertyValue::Int(1)));
        assert_eq!(bus.last_value(paths::UPDATE_INDEX), Some(PropertyValue::Int(1)));

        let snapshot = scheduler.state().snapshot();
        assert_eq!(snapshot.update_index, 1);
        assert!(snapshot.last_update_millis.is_some());
        assert_eq!(scheduler.state().phase(), PollPhase::Idle);
    }

    #[tokio::test]
    async fn test_unknown_jumper_publishes_zero() {
        let (scheduler, _, bus) = build(FakeDevice::new(0, 17), PollSettings::default());

        assert!(scheduler.run_cycle().await.is_success());
        assert_eq!(bus.last_value(paths::STATUS), Some(PropertyValue::Int(0)));
        assert_eq!(bus.last_value(paths::MAX_CURRENT), Some(PropertyValue::Int(0)));
    }

    #[tokio::test]
    async fn test_position_not_published_when_disabled() {
        let settings = PollSettings {
            position: None,
            ..PollSettings::default()
        };
        let (scheduler, _, bus) = build(FakeDevice::new(1, 6), settings);

        assert!(scheduler.run_cycle().await.is_success());
        assert!(bus.updates_for(paths::POSITION).is_empty());
        assert_eq!(bus.last_value(paths::STATUS), Some(PropertyValue::Int(4)));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_state_untouched() {
        let (scheduler, device, bus) = build(FakeDevice::new(2, 4), PollSettings::default());
        assert!(scheduler.run_cycle().await.is_success());
        let before = scheduler.state().snapshot();
        let published = bus.updates().len();

        device.set_charger_state(1);
        device.set_fail_hardware(true);
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Failed);

        assert_eq!(scheduler.state().snapshot(), before);
        assert_eq!(bus.updates().len(), published);
        assert_eq!(scheduler.model.read().await.get(paths::STATUS), Some(&PropertyValue::Int(6)));

        device.set_fail_hardware(false);
        device.set_fail_state(true);
        assert!(matches!(
            scheduler.poll_once().await,
            Err(BridgeError::Transport { .. })
        ));
        assert_eq!(scheduler.state().snapshot(), before);
    }

    #[tokio::test]
    async fn test_unmapped_state_fails_cycle() {
        let (scheduler, _, bus) = build(FakeDevice::new(9, 4), PollSettings::default());

        assert!(matches!(
            scheduler.poll_once().await,
            Err(BridgeError::UnmappedValue { value: 9, .. })
        ));
        assert!(bus.updates().is_empty());
        assert_eq!(scheduler.state().snapshot().update_index, 0);
        assert_eq!(scheduler.model.read().await.get(paths::STATUS), Some(&PropertyValue::Null));
    }

    #[tokio::test]
    async fn test_model_error_is_not_per_cycle() {
        let device = Arc::new(FakeDevice::new(2, 4));
        let bus = Arc::new(MemoryBus::new());
        let model = Arc::new(RwLock::new(PublishedModel::new()));
        let scheduler = PollScheduler::new(device, bus.clone(), model, PollSettings::default());

        let err = scheduler.poll_once().await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownProperty(_)));
        assert!(!err.is_per_cycle());

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Failed);
        assert_eq!(scheduler.state().snapshot().update_index, 0);
        assert!(bus.updates().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_cycle() {
        let (scheduler, _, bus) = build(FakeDevice::new(3, 3), PollSettings::default());
        bus.set_fail_publish(true);

        let outcome = scheduler.run_cycle().await;
        assert!(outcome.is_success());
        assert_eq!(scheduler.state().snapshot().update_index, 1);
        assert_eq!(
            scheduler.model.read().await.get(paths::STATUS),
            Some(&PropertyValue::Int(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_timer_runs_at_interval() {
        let (scheduler, device, _) = build(FakeDevice::new(2, 4), PollSettings::default());
        let handle = scheduler.spawn();
        assert!(handle.has_heartbeat());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(device.state_calls(), 1);

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(device.state_calls(), 3);
        assert_eq!(scheduler.state().snapshot().update_index, 3);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(device.state_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_schedule() {
        let (scheduler, device, bus) = build(FakeDevice::new(2, 4), PollSettings::default());
        device.set_fail_hardware(true);
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(scheduler.state().snapshot().update_index, 0);
        assert!(bus.updates_for(paths::STATUS).is_empty());
        assert_eq!(scheduler.state().phase(), PollPhase::Idle);

        device.set_fail_hardware(false);
        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert_eq!(scheduler.state().snapshot().update_index, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduler.state().snapshot().update_index, 1);
        assert_eq!(bus.last_value(paths::STATUS), Some(PropertyValue::Int(6)));
        assert_eq!(bus.last_value(paths::UPDATE_INDEX), Some(PropertyValue::Int(1)));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_fires_at_period() {
        let settings = PollSettings {
            sign_of_life: Some(Duration::from_secs(60)),
            ..PollSettings::default()
        };
        let (scheduler, _, bus) = build(FakeDevice::new(2, 4), settings);
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(59_900)).await;
        assert_eq!(scheduler.state().sign_of_life_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduler.state().sign_of_life_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.state().sign_of_life_count(), 2);
        assert_eq!(scheduler.state().snapshot().update_index, 60);
        assert_eq!(bus.updates_for(paths::UPDATE_INDEX).len(), 60);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(scheduler.state().sign_of_life_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_disabled() {
        let settings = PollSettings {
            sign_of_life: None,
            ..PollSettings::default()
        };
        let (scheduler, device, _) = build(FakeDevice::new(0, 0), settings);

        let handle = scheduler.spawn();
        assert!(!handle.has_heartbeat());

        tokio::time::sleep(Duration::from_millis(600_100)).await;
        assert_eq!(device.state_calls(), 300);
        assert_eq!(scheduler.state().snapshot().update_index, 300u32 as u8);
        assert_eq!(scheduler.state().sign_of_life_count(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sign_of_life_reads_without_mutating() {
        let (scheduler, _, bus) = build(FakeDevice::new(2, 4), PollSettings::default());

        assert_eq!(scheduler.log_sign_of_life().last_update_millis, None);
        scheduler.run_cycle().await;
        let published = bus.updates().len();

        let snapshot = scheduler.log_sign_of_life();
        assert_eq!(snapshot.update_index, 1);
        assert_eq!(scheduler.state().snapshot(), snapshot);
        assert_eq!(bus.updates().len(), published);
        assert_eq!(scheduler.state().sign_of_life_count(), 2);
    }
}
