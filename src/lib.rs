//! Control core for a simulated marine-grade energy-storage-system battery
//! array: derating curves, a per-pack state machine with layered software
//! and hardware alarms, and an array-level Kirchhoff current-distribution
//! solver.

pub mod alarm;
pub mod array;
pub mod config;
pub mod curves;
pub mod error;
pub mod pack;
pub mod plant;
pub mod solver;
pub mod telemetry;

pub use alarm::{Alarm, AlarmQuantity, AlarmSeverity, AlarmSource, Debouncer};
pub use array::ArrayController;
pub use config::Config;
pub use error::ControlError;
pub use curves::{cell_voltage_curve, ocv_cell_v, soc_curve, temperature_curve, CRatePair};
pub use pack::PackController;
pub use plant::{EquivalentCircuitPlant, Plant, TEMPERATURE_FLOOR_C};
pub use solver::{solve, PackSolverInput, SolveResult};
pub use telemetry::{PackMode, PackSample, PackTelemetry, TelemetryRecord};
