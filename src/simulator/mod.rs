pub mod machine;
pub mod models;
pub mod sensor_simulator;

use thiserror::Error;

pub use machine::{Machine, SensorReading};
pub use models::{ErrorCode, MachineState, ProductType, Shift};
pub use sensor_simulator::{SensorSimulator, SimulatorSettings, Snapshot};

/// Rejected simulator input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulatorError {
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Machine {0} not found")]
    MachineNotFound(String),
}
