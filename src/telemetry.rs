//! Pack operating mode, the plant's read-only telemetry view, and the
//! per-tick telemetry record (§3, §6).

use serde::{Deserialize, Serialize};

/// The seven tagged pack states (§3). `Off`, `PowerSave`, `NotReady` are
/// reserved for interface fidelity — no transitions into or out of them are
/// defined by this spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackMode {
    Off,
    PowerSave,
    Fault,
    Ready,
    Connecting,
    Connected,
    NotReady,
}

impl Default for PackMode {
    fn default() -> Self {
        PackMode::Ready
    }
}

/// Read-only telemetry exposed by a pack's plant (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackTelemetry {
    /// State of charge, clamped to [0, 1].
    pub soc: f64,
    /// Cell temperature, clamped below at -40 C.
    pub temperature_c: f64,
    /// Signed pack current; positive = into the pack (charging).
    pub current_a: f64,
    pub cell_voltage_v: f64,
    pub pack_voltage_v: f64,
    pub ocv_pack_v: f64,
    pub r_pack_ohm: f64,
    pub num_modules: u32,
    pub num_cells_series: u32,
    pub capacity_ah: f64,
}

/// One pack's contribution to a [`TelemetryRecord`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackSample {
    pub soc: f64,
    pub pack_voltage_v: f64,
    pub cell_voltage_v: f64,
    pub temperature_c: f64,
    pub current_a: f64,
    pub charge_limit_a: f64,
    pub discharge_limit_a: f64,
    pub mode: PackMode,
}

/// A single tick's observable state, ready for external serialization (§6).
/// The core only derives `Serialize`/`Deserialize` here; encoding to CSV and
/// plotting remain external collaborators per the Non-goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub time_s: f64,
    pub bus_voltage_v: f64,
    pub array_charge_limit_a: f64,
    pub array_discharge_limit_a: f64,
    pub packs: Vec<PackSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_ready() {
        assert_eq!(PackMode::default(), PackMode::Ready);
    }

    #[test]
    fn telemetry_record_round_trips_through_json() {
        let record = TelemetryRecord {
            time_s: 1.0,
            bus_voltage_v: 800.0,
            array_charge_limit_a: 100.0,
            array_discharge_limit_a: 150.0,
            packs: vec![PackSample {
                soc: 0.5,
                pack_voltage_v: 800.0,
                cell_voltage_v: 3.6,
                temperature_c: 25.0,
                current_a: 10.0,
                charge_limit_a: 50.0,
                discharge_limit_a: 60.0,
                mode: PackMode::Connected,
            }],
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
