use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::machine::{Machine, SensorReading, round_to};
use super::models::{ErrorCode, MachineState, ProductType, Shift};
use super::SimulatorError;

pub const MIN_SIMULATION_SPEED: f64 = 0.1;
pub const MAX_SIMULATION_SPEED: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub machine_count: usize,
    pub update_interval: Duration,
    pub simulation_speed: f64,
    /// Fixed seed for reproducible runs; OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            machine_count: 10,
            update_interval: Duration::from_secs(5),
            simulation_speed: 1.0,
            seed: None,
        }
    }
}

/// Latest reading of every machine, in fleet order.
///
/// Serializes as a JSON object keyed by machine id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(pub Vec<SensorReading>);

impl Snapshot {
    pub fn get(&self, machine_id: &str) -> Option<&SensorReading> {
        self.0.iter().find(|r| r.machine_id == machine_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.0.iter()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for reading in &self.0 {
            map.serialize_entry(&reading.machine_id, reading)?;
        }
        map.end()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FactoryStatus {
    pub timestamp: Option<DateTime<Utc>>,
    pub total_machines: usize,
    pub machine_states: BTreeMap<MachineState, usize>,
    pub active_errors: BTreeMap<ErrorCode, usize>,
    pub overall_efficiency: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub machine_id: String,
    pub error_code: Option<ErrorCode>,
    pub error_description: Option<String>,
    pub product_type: ProductType,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub pressure: f64,
    pub energy_consumption: f64,
    pub vibration: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorDetails {
    pub total_errors: usize,
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug)]
struct SimulatorState {
    machines: Vec<Machine>,
    /// Parallel to `machines`.
    snapshot: Vec<SensorReading>,
    speed: f64,
    rng: StdRng,
}

/// Drives a fleet of machines on a fixed tick and keeps their latest readings.
#[derive(Debug)]
pub struct SensorSimulator {
    state: Mutex<SimulatorState>,
    update_interval: Duration,
    running: AtomicBool,
    /// Bumped on every `start`; each loop remembers the value it was started with.
    generation: AtomicU64,
    /// Generation allowed to keep running; zero once stopped.
    run_tx: watch::Sender<u64>,
}

impl SensorSimulator {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self::new_at(settings, Utc::now())
    }

    fn new_at(settings: SimulatorSettings, now: DateTime<Utc>) -> Self {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let stagger_secs = i64::try_from(settings.update_interval.as_secs())
            .ok()
            .and_then(|secs| secs.checked_mul(5))
            .unwrap_or(i64::MAX);

        let mut machines = Vec::with_capacity(settings.machine_count);
        for i in 0..settings.machine_count {
            let product = ProductType::ALL[i % ProductType::ALL.len()];
            let max_vibration = rng.random_range(0.6..=0.8);
            let mut machine = Machine::new(format!("Machine_{}", i + 1), product, max_vibration, now, &mut rng);

            // 70% active, 20% idle, 10% maintenance
            let initial = match rng.random_range(0..10) {
                0..=6 => MachineState::Active,
                7..=8 => MachineState::Idle,
                _ => MachineState::Maintenance,
            };
            machine.force_state(initial, now, &mut rng);
            // Stagger so the fleet does not reconsider its states in lockstep.
            let backdate = TimeDelta::try_seconds(rng.random_range(0..=stagger_secs)).unwrap_or(TimeDelta::MAX);
            machine.set_last_state_change(now.checked_sub_signed(backdate).unwrap_or(DateTime::<Utc>::MIN_UTC));
            machines.push(machine);
        }

        let snapshot = machines.iter().map(|m| m.reading(now, &mut rng)).collect();
        let (run_tx, _) = watch::channel(0);

        Self {
            state: Mutex::new(SimulatorState {
                machines,
                snapshot,
                speed: clamp_speed(settings.simulation_speed),
                rng,
            }),
            update_interval: settings.update_interval,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            run_tx,
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn machine_count(&self) -> usize {
        self.state.lock().await.machines.len()
    }

    pub async fn simulation_speed(&self) -> f64 {
        self.state.lock().await.speed
    }

    /// Advances every machine to `now` and refreshes the snapshot.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let shift = Shift::from_hour(now.hour());
        let mut guard = self.state.lock().await;
        let SimulatorState { machines, snapshot, rng, .. } = &mut *guard;
        for (machine, slot) in machines.iter_mut().zip(snapshot.iter_mut()) {
            machine.update_state(now, shift, rng);
            *slot = machine.reading(now, rng);
        }
        debug!(machines = machines.len(), ?shift, "Simulation tick complete.");
    }

    async fn tick_delay(&self) -> Duration {
        let speed = self.state.lock().await.speed;
        Duration::try_from_secs_f64(self.update_interval.as_secs_f64() / speed).unwrap_or(Duration::MAX)
    }

    /// Spawns the update loop. Returns `None` if it is already running.
    ///
    /// A loop still winding down from an earlier `stop` exits on its own and
    /// does not affect the new one.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_tx.send_replace(generation);
        let mut run_rx = self.run_tx.subscribe();
        let simulator = Arc::clone(self);

        Some(tokio::spawn(async move {
            let speed = simulator.simulation_speed().await;
            let machines = simulator.machine_count().await;
            info!(
                interval_secs = simulator.update_interval.as_secs_f64(),
                speed,
                machines,
                generation,
                "Sensor simulation started."
            );
            loop {
                simulator.tick(Utc::now()).await;
                let delay = simulator.tick_delay().await;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = run_rx.changed() => {
                        if changed.is_err() || *run_rx.borrow_and_update() != generation {
                            break;
                        }
                    }
                }
            }
            info!(generation, "Sensor simulation loop has ended.");
        }))
    }

    /// Asks the update loop to exit; it finishes the cycle in progress first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping sensor simulation.");
        }
        self.run_tx.send_replace(0);
    }

    pub async fn latest_data(&self) -> Snapshot {
        Snapshot(self.state.lock().await.snapshot.clone())
    }

    pub async fn latest_for(&self, machine_id: &str) -> Result<SensorReading, SimulatorError> {
        self.state
            .lock()
            .await
            .snapshot
            .iter()
            .find(|r| r.machine_id == machine_id)
            .cloned()
            .ok_or_else(|| SimulatorError::MachineNotFound(machine_id.to_string()))
    }

    pub async fn machine_states_summary(&self) -> BTreeMap<MachineState, usize> {
        states_summary(&self.state.lock().await.snapshot)
    }

    pub async fn error_summary(&self) -> BTreeMap<ErrorCode, usize> {
        error_summary(&self.state.lock().await.snapshot)
    }

    pub async fn force_state_change(&self, machine_id: &str, new_state: MachineState) -> Result<(), SimulatorError> {
        let now = Utc::now();
        let mut guard = self.state.lock().await;
        let SimulatorState { machines, snapshot, rng, .. } = &mut *guard;

        let Some(index) = machines.iter().position(|m| m.id() == machine_id) else {
            warn!(machine_id, "Machine not found for state change.");
            return Err(SimulatorError::MachineNotFound(machine_id.to_string()));
        };
        let machine = &mut machines[index];
        machine.force_state(new_state, now, rng);
        snapshot[index] = machine.reading(now, rng);

        info!(machine_id, state = %new_state, "Forced machine state.");
        Ok(())
    }

    /// Sets the speed multiplier, clamped to [0.1, 10.0]. Returns the applied value.
    pub async fn set_simulation_speed(&self, speed: f64) -> f64 {
        let applied = clamp_speed(speed);
        self.state.lock().await.speed = applied;
        info!(speed = applied, "Simulation speed updated.");
        applied
    }

    pub async fn factory_status(&self) -> FactoryStatus {
        let guard = self.state.lock().await;
        let machine_states = states_summary(&guard.snapshot);
        let total_machines = guard.machines.len();
        let active = machine_states.get(&MachineState::Active).copied().unwrap_or(0);
        let overall_efficiency = if total_machines == 0 {
            0.0
        } else {
            round_to(active as f64 / total_machines as f64 * 100.0, 1)
        };

        FactoryStatus {
            timestamp: guard.snapshot.first().map(|r| r.timestamp),
            total_machines,
            machine_states,
            active_errors: error_summary(&guard.snapshot),
            overall_efficiency,
        }
    }

    pub async fn error_details(&self) -> ErrorDetails {
        let guard = self.state.lock().await;
        let errors: Vec<ErrorRecord> = guard
            .snapshot
            .iter()
            .filter(|r| r.state == MachineState::Error)
            .map(|r| ErrorRecord {
                machine_id: r.machine_id.clone(),
                error_code: r.error_code,
                error_description: r.error_description.clone(),
                product_type: r.product_type,
                timestamp: r.timestamp,
                temperature: r.temperature,
                pressure: r.pressure,
                energy_consumption: r.energy_consumption,
                vibration: r.vibration,
            })
            .collect();
        ErrorDetails {
            total_errors: errors.len(),
            errors,
        }
    }

    /// Multi-line operator summary of the fleet.
    pub async fn status_report(&self) -> String {
        let status = self.factory_status().await;
        let speed = self.simulation_speed().await;
        let rule = "=".repeat(50);

        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "FACTORY SIMULATION STATUS");
        let _ = writeln!(out, "Timestamp: {}", Utc::now().to_rfc3339());
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total Machines: {}", status.total_machines);
        let _ = writeln!(out, "Simulation Speed: {speed}x");
        let _ = writeln!(out, "Update Interval: {}s", self.update_interval.as_secs_f64());
        let _ = writeln!(out, "{}", "-".repeat(50));
        let _ = writeln!(out, "Machine States:");
        for (state, count) in &status.machine_states {
            let _ = writeln!(out, "  {}: {count}", capitalize(state.as_str()));
        }

        if !status.active_errors.is_empty() {
            let _ = writeln!(out, "\nCurrent Errors:");
            for (code, count) in &status.active_errors {
                let _ = writeln!(out, "  {code} ({}): {count} machines", code.description());
            }
        } else {
            let _ = writeln!(out, "\nNo errors reported.");
        }
        let _ = write!(out, "{rule}");
        out
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SIMULATION_SPEED, MAX_SIMULATION_SPEED)
}

fn states_summary(snapshot: &[SensorReading]) -> BTreeMap<MachineState, usize> {
    let mut summary: BTreeMap<MachineState, usize> = MachineState::ALL.iter().map(|s| (*s, 0)).collect();
    for reading in snapshot {
        *summary.entry(reading.state).or_default() += 1;
    }
    summary
}

fn error_summary(snapshot: &[SensorReading]) -> BTreeMap<ErrorCode, usize> {
    let mut counts = BTreeMap::new();
    for reading in snapshot.iter().filter(|r| r.state == MachineState::Error) {
        if let Some(code) = reading.error_code {
            *counts.entry(code).or_default() += 1;
        }
    }
    counts
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
