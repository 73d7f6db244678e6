use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::SimulatorError;

/// Operating state of a machine, serialized in lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Idle,
    Active,
    Maintenance,
    Error,
}

impl MachineState {
    pub const ALL: [MachineState; 4] = [
        MachineState::Idle,
        MachineState::Active,
        MachineState::Maintenance,
        MachineState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Idle => "idle",
            MachineState::Active => "active",
            MachineState::Maintenance => "maintenance",
            MachineState::Error => "error",
        }
    }

    /// Minimum number of minutes a machine stays in this state before it may leave it.
    pub fn min_dwell_minutes(&self) -> f64 {
        match self {
            MachineState::Active => 15.0,
            MachineState::Idle => 5.0,
            MachineState::Maintenance => 60.0,
            MachineState::Error => 10.0,
        }
    }
}

impl FromStr for MachineState {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(MachineState::Idle),
            "active" => Ok(MachineState::Active),
            "maintenance" => Ok(MachineState::Maintenance),
            "error" => Ok(MachineState::Error),
            _ => Err(SimulatorError::InvalidState(s.to_string())),
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plastic a machine is set up to extrude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    Polyethylene,
    Polypropylene,
    #[serde(rename = "PVC")]
    Pvc,
    Polystyrene,
    #[serde(rename = "ABS")]
    Abs,
}

/// Operating envelope of a machine producing a given product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductProfile {
    pub temp_range: (f64, f64),
    pub pressure_range: (f64, f64),
    pub energy_multiplier: f64,
}

impl ProductType {
    pub const ALL: [ProductType; 5] = [
        ProductType::Polyethylene,
        ProductType::Polypropylene,
        ProductType::Pvc,
        ProductType::Polystyrene,
        ProductType::Abs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Polyethylene => "Polyethylene",
            ProductType::Polypropylene => "Polypropylene",
            ProductType::Pvc => "PVC",
            ProductType::Polystyrene => "Polystyrene",
            ProductType::Abs => "ABS",
        }
    }

    pub fn profile(&self) -> ProductProfile {
        let (temp_range, pressure_range, energy_multiplier) = match self {
            ProductType::Polyethylene => ((85.0, 125.0), (0.4, 0.9), 1.1),
            ProductType::Polypropylene => ((80.0, 120.0), (0.35, 0.85), 1.0),
            ProductType::Pvc => ((90.0, 135.0), (0.45, 0.95), 1.3),
            ProductType::Polystyrene => ((75.0, 115.0), (0.3, 0.8), 1.05),
            ProductType::Abs => ((82.0, 122.0), (0.38, 0.88), 0.95),
        };
        ProductProfile {
            temp_range,
            pressure_range,
            energy_multiplier,
        }
    }

    /// Relative likelihood of each fault for this product, in `ErrorCode::ALL` order.
    pub fn error_weights(&self) -> [f64; 5] {
        match self {
            ProductType::Polyethylene => [0.4, 0.3, 0.2, 0.1, 0.0],
            ProductType::Pvc => [0.5, 0.2, 0.2, 0.0, 0.1],
            ProductType::Polypropylene => [0.2, 0.4, 0.1, 0.3, 0.0],
            ProductType::Polystyrene => [0.2, 0.3, 0.0, 0.4, 0.1],
            ProductType::Abs => [0.2, 0.1, 0.4, 0.3, 0.0],
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault weights (E101..E105) used when a product's own weights are unusable.
pub const DEFAULT_ERROR_WEIGHTS: [f64; 5] = [0.3, 0.3, 0.2, 0.1, 0.1];

/// Fault reported by a machine in the `error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCode {
    E101,
    E102,
    E103,
    E104,
    E105,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::E101,
        ErrorCode::E102,
        ErrorCode::E103,
        ErrorCode::E104,
        ErrorCode::E105,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E101 => "E101",
            ErrorCode::E102 => "E102",
            ErrorCode::E103 => "E103",
            ErrorCode::E104 => "E104",
            ErrorCode::E105 => "E105",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::E101 => "Overtemperature detected",
            ErrorCode::E102 => "Pressure drop detected",
            ErrorCode::E103 => "Energy spike detected",
            ErrorCode::E104 => "Vibration anomaly detected",
            ErrorCode::E105 => "Cooling failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working period of the factory, derived from the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    Day,
    Evening,
    Night,
}

impl Shift {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=13 => Shift::Day,
            14..=21 => Shift::Evening,
            _ => Shift::Night,
        }
    }

    /// Multipliers applied to the (active, maintenance) transition weights.
    pub fn modifiers(&self) -> (f64, f64) {
        match self {
            Shift::Day => (1.2, 1.5),
            Shift::Evening => (1.0, 0.8),
            Shift::Night => (0.6, 0.3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_state_parse_is_case_insensitive() {
        assert_eq!("ACTIVE".parse::<MachineState>().unwrap(), MachineState::Active);
        assert_eq!("Maintenance".parse::<MachineState>().unwrap(), MachineState::Maintenance);
        assert_eq!("idle".parse::<MachineState>().unwrap(), MachineState::Idle);

        let err = "broken".parse::<MachineState>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid state: broken");
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&MachineState::Error).unwrap(), "\"error\"");
        assert_eq!(serde_json::to_string(&ProductType::Pvc).unwrap(), "\"PVC\"");
        assert_eq!(serde_json::to_string(&ProductType::Abs).unwrap(), "\"ABS\"");
        assert_eq!(
            serde_json::to_string(&ProductType::Polystyrene).unwrap(),
            "\"Polystyrene\""
        );
        assert_eq!(serde_json::to_string(&ErrorCode::E103).unwrap(), "\"E103\"");
    }

    #[test]
    fn test_shift_boundaries() {
        assert_eq!(Shift::from_hour(5), Shift::Night);
        assert_eq!(Shift::from_hour(6), Shift::Day);
        assert_eq!(Shift::from_hour(13), Shift::Day);
        assert_eq!(Shift::from_hour(14), Shift::Evening);
        assert_eq!(Shift::from_hour(21), Shift::Evening);
        assert_eq!(Shift::from_hour(22), Shift::Night);
        assert_eq!(Shift::from_hour(0), Shift::Night);
    }

    #[test]
    fn test_every_product_can_fail() {
        for product in ProductType::ALL {
            let total: f64 = product.error_weights().iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "{product} weights sum to {total}");
        }
    }
}
