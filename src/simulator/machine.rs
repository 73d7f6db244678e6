use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use super::models::{DEFAULT_ERROR_WEIGHTS, ErrorCode, MachineState, ProductType, Shift};

const MAINTENANCE_CYCLE_HOURS: std::ops::RangeInclusive<u32> = 200..=400;
const MAX_CHANGE_PROBABILITY: f64 = 0.1;
const MAINTENANCE_DUE_PROBABILITY: f64 = 0.3;
const OPERATOR_OVERRIDE_PROBABILITY: f64 = 0.05;

/// One sample of every sensor on a machine, as served over the API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub state: MachineState,
    pub temperature: f64,
    pub pressure: f64,
    pub energy_consumption: f64,
    pub vibration: f64,
    pub humidity: f64,
    pub production_rate: u32,
    pub raw_material_quality: f64,
    pub operator_override: bool,
    pub cooling_status: String,
    pub product_type: ProductType,
    pub uptime_hours: f64,
    pub error_code: Option<ErrorCode>,
    pub error_description: Option<String>,
}

/// A simulated extrusion machine with a stochastic operating-state machine.
#[derive(Debug, Clone)]
pub struct Machine {
    id: String,
    product_type: ProductType,
    temp_range: (f64, f64),
    pressure_range: (f64, f64),
    energy_multiplier: f64,
    max_vibration: f64,

    state: MachineState,
    last_state_change: DateTime<Utc>,
    last_update: DateTime<Utc>,
    error_code: Option<ErrorCode>,

    uptime_hours: f64,
    total_runtime_hours: f64,
    maintenance_cycle_hours: u32,
}

impl Machine {
    pub fn new<R: Rng + ?Sized>(
        id: impl Into<String>,
        product_type: ProductType,
        max_vibration: f64,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Self {
        let profile = product_type.profile();
        Self {
            id: id.into(),
            product_type,
            temp_range: profile.temp_range,
            pressure_range: profile.pressure_range,
            energy_multiplier: profile.energy_multiplier,
            // E104 readings draw vibration from [0.5, max_vibration].
            max_vibration: max_vibration.max(0.5),
            state: MachineState::Idle,
            last_state_change: now,
            last_update: now,
            error_code: None,
            uptime_hours: 0.0,
            total_runtime_hours: 0.0,
            maintenance_cycle_hours: rng.random_range(MAINTENANCE_CYCLE_HOURS),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn product_type(&self) -> ProductType {
        self.product_type
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn uptime_hours(&self) -> f64 {
        self.uptime_hours
    }

    pub fn total_runtime_hours(&self) -> f64 {
        self.total_runtime_hours
    }

    pub fn maintenance_cycle_hours(&self) -> u32 {
        self.maintenance_cycle_hours
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    /// Backdates the last state change, used to desynchronize a freshly built fleet.
    pub fn set_last_state_change(&mut self, at: DateTime<Utc>) {
        self.last_state_change = at;
    }

    fn minutes_in_state(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_state_change).num_milliseconds() as f64 / 60_000.0
    }

    /// Whether the machine is allowed, and randomly chosen, to reconsider its state.
    ///
    /// The chance grows linearly with time spent in the state, capped at 10%.
    pub fn should_change_state<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> bool {
        let minutes = self.minutes_in_state(now);
        if minutes < self.state.min_dwell_minutes() {
            return false;
        }
        let probability = (minutes / 1000.0).min(MAX_CHANGE_PROBABILITY);
        rng.random::<f64>() < probability
    }

    pub fn next_state<R: Rng + ?Sized>(&self, shift: Shift, rng: &mut R) -> MachineState {
        if self.uptime_hours > f64::from(self.maintenance_cycle_hours)
            && rng.random::<f64>() < MAINTENANCE_DUE_PROBABILITY
        {
            return MachineState::Maintenance;
        }

        let (active_mod, maintenance_mod) = shift.modifiers();
        let mut row = transition_row(self.state);
        for (state, weight) in row.iter_mut() {
            match state {
                MachineState::Active => *weight *= active_mod,
                MachineState::Maintenance => *weight *= maintenance_mod,
                _ => {}
            }
        }

        draw_state(self.state, row, rng)
    }

    pub fn update_state<R: Rng + ?Sized>(&mut self, now: DateTime<Utc>, shift: Shift, rng: &mut R) {
        if self.should_change_state(now, rng) {
            let new_state = self.next_state(shift, rng);
            if new_state != self.state {
                if self.state == MachineState::Maintenance {
                    self.uptime_hours = 0.0;
                    self.maintenance_cycle_hours = rng.random_range(MAINTENANCE_CYCLE_HOURS);
                }
                self.enter_state(new_state, now, rng);
            }
        }

        let elapsed_hours = ((now - self.last_update).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
        if self.state == MachineState::Active {
            self.uptime_hours += elapsed_hours;
            self.total_runtime_hours += elapsed_hours;
        }
        self.last_update = now;
    }

    /// Puts the machine into `state` regardless of dwell time or transition odds.
    pub fn force_state<R: Rng + ?Sized>(&mut self, state: MachineState, now: DateTime<Utc>, rng: &mut R) {
        self.enter_state(state, now, rng);
    }

    fn enter_state<R: Rng + ?Sized>(&mut self, state: MachineState, now: DateTime<Utc>, rng: &mut R) {
        self.state = state;
        self.last_state_change = now;
        if state == MachineState::Error {
            self.assign_error_code(rng);
        } else {
            self.error_code = None;
        }
    }

    /// Draws a fault for the machine, weighted by what its product tends to cause.
    pub fn assign_error_code<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let dist = WeightedIndex::new(self.product_type.error_weights())
            .or_else(|_| WeightedIndex::new(DEFAULT_ERROR_WEIGHTS));
        self.error_code = Some(match dist {
            Ok(dist) => ErrorCode::ALL[dist.sample(rng)],
            Err(_) => ErrorCode::E101,
        });
    }

    pub fn reading<R: Rng + ?Sized>(&self, timestamp: DateTime<Utc>, rng: &mut R) -> SensorReading {
        let base_temp = (self.temp_range.0 + self.temp_range.1) / 2.0;
        let base_pressure = (self.pressure_range.0 + self.pressure_range.1) / 2.0;
        let m = self.energy_multiplier;

        let (temp_offset, pressure_offset, energy, vibration, production_rate) = match self.state {
            MachineState::Active => (
                rng.random_range(-5.0..=10.0),
                rng.random_range(-0.05..=0.1),
                rng.random_range(0.8..=1.2) * m,
                rng.random_range(0.1..=0.4),
                rng.random_range(15..=25),
            ),
            MachineState::Idle => (
                rng.random_range(-10.0..=-5.0),
                rng.random_range(-0.1..=-0.05),
                rng.random_range(0.1..=0.3) * m,
                rng.random_range(0.01..=0.1),
                0,
            ),
            MachineState::Maintenance => (
                rng.random_range(-15.0..=-10.0),
                rng.random_range(-0.15..=-0.1),
                rng.random_range(0.05..=0.2) * m,
                rng.random_range(0.0..=0.05),
                0,
            ),
            MachineState::Error => {
                let (temp, pressure) = match self.error_code {
                    Some(ErrorCode::E101) => (
                        rng.random_range(15.0..=25.0),
                        rng.random_range(-0.05..=0.05),
                    ),
                    Some(ErrorCode::E102) => (
                        rng.random_range(-5.0..=5.0),
                        rng.random_range(-0.3..=-0.15),
                    ),
                    Some(ErrorCode::E103) => (
                        rng.random_range(5.0..=15.0),
                        rng.random_range(0.05..=0.15),
                    ),
                    Some(ErrorCode::E104) => (
                        rng.random_range(-5.0..=5.0),
                        rng.random_range(-0.05..=0.05),
                    ),
                    Some(ErrorCode::E105) | None => (
                        rng.random_range(10.0..=20.0),
                        rng.random_range(-0.1..=0.1),
                    ),
                };
                let energy = rng.random_range(0.3..=1.5) * m;
                let vibration = if self.error_code == Some(ErrorCode::E104) {
                    rng.random_range(0.5..=self.max_vibration)
                } else {
                    rng.random_range(0.1..=0.4)
                };
                (temp, pressure, energy, vibration, rng.random_range(0..=10))
            }
        };

        let temperature = (base_temp + temp_offset).max(0.0);
        let pressure = (base_pressure + pressure_offset).max(0.0);
        let error_code = match self.state {
            MachineState::Error => self.error_code,
            _ => None,
        };

        SensorReading {
            timestamp,
            machine_id: self.id.clone(),
            state: self.state,
            temperature: round_to(temperature, 2),
            pressure: round_to(pressure, 3),
            energy_consumption: round_to(energy, 3),
            vibration: round_to(vibration, 3),
            humidity: round_to(rng.random_range(45.0..=65.0), 2),
            production_rate,
            raw_material_quality: round_to(rng.random_range(0.7..=1.0), 2),
            operator_override: rng.random_bool(OPERATOR_OVERRIDE_PROBABILITY),
            cooling_status: if self.error_code == Some(ErrorCode::E105) { "FAIL" } else { "OK" }.to_string(),
            product_type: self.product_type,
            uptime_hours: round_to(self.uptime_hours, 1),
            error_code,
            error_description: error_code.map(|c| c.description().to_string()),
        }
    }
}

/// P(next | current), in the order the cumulative draw walks them.
fn transition_row(current: MachineState) -> [(MachineState, f64); 4] {
    use MachineState::*;
    let (active, idle, error, maintenance) = match current {
        Active => (0.85, 0.10, 0.03, 0.02),
        Idle => (0.70, 0.25, 0.02, 0.03),
        Error => (0.60, 0.20, 0.05, 0.15),
        Maintenance => (0.70, 0.25, 0.02, 0.03),
    };
    [(Active, active), (Idle, idle), (Error, error), (Maintenance, maintenance)]
}

/// Rounds to `decimals` places, ties to even on the exact binary value.
/// Cumulative draw over `row`; an all-zero row keeps `current`.
fn draw_state<R: Rng + ?Sized>(current: MachineState, row: [(MachineState, f64); 4], rng: &mut R) -> MachineState {
    let total: f64 = row.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return current;
    }

    let roll = rng.random::<f64>();
    let mut cumulative = 0.0;
    for (state, weight) in row {
        cumulative += weight / total;
        if roll <= cumulative {
            return state;
        }
    }
    current
}

pub(crate) fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}
