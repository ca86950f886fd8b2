//! The plant interface (§4.2) and a reference equivalent-circuit
//! implementation.
//!
//! This module is a [SUPPLEMENT]: the control core's actual dependency is
//! only the [`Plant`] trait and [`PackTelemetry`] — it never reaches into
//! [`EquivalentCircuitPlant`]'s internals. The reference implementation
//! exists so the pack/array controllers can be exercised end-to-end in
//! tests and the demo binary, grounded in `original_source/corvus_demo.py`'s
//! v4 changelog (2-D resistance lookup, 1,386,000 J/°C thermal mass,
//! 800 W/°C cooling, 24-point NMC 622 OCV curve).

use crate::curves::{bilinear, ocv_cell_v};
use crate::telemetry::PackTelemetry;

/// Floor applied to cell/pack temperature everywhere in the core (§3).
pub const TEMPERATURE_FLOOR_C: f64 = -40.0;

/// A per-pack electrical/thermal model. The control core depends only on
/// this trait: telemetry accessors plus a single time-advance operation.
pub trait Plant {
    fn telemetry(&self) -> PackTelemetry;

    /// Advances the plant by `dt` seconds. When `contactors_closed` is
    /// false, `applied_current_a` is forced to zero regardless of the value
    /// passed in (§4.2).
    fn step(&mut self, dt: f64, applied_current_a: f64, contactors_closed: bool, external_heat_w: f64);
}

/// Reference lumped equivalent-circuit plant: coulomb counting, OCV + IR
/// terminal voltage, and a single thermal node with ambient cooling.
#[derive(Debug, Clone)]
pub struct EquivalentCircuitPlant {
    soc: f64,
    temperature_c: f64,
    current_a: f64,
    num_modules: u32,
    cells_per_module: u32,
    capacity_ah: f64,

    ambient_c: f64,
    thermal_mass_j_per_c: f64,
    cooling_w_per_c: f64,

    r_t_axis: Vec<f64>,
    r_soc_axis: Vec<f64>,
    r_table_per_module_ohm: Vec<Vec<f64>>,
}

impl EquivalentCircuitPlant {
    /// `capacity_ah` is the pack's series-string capacity (each module
    /// contributes the same Ah rating since modules are in series).
    pub fn new(
        num_modules: u32,
        cells_per_module: u32,
        capacity_ah: f64,
        initial_soc: f64,
        initial_temperature_c: f64,
        ambient_c: f64,
    ) -> Self {
        // Baseline 3.3 mOhm/module, rising at temperature extremes and at
        // the edges of the SoC range (a coarse but physically plausible
        // resistance surface for a reference model).
        let r_t_axis = vec![-20.0, 0.0, 25.0, 45.0, 60.0];
        let r_soc_axis = vec![0.0, 0.2, 0.5, 0.8, 1.0];
        let baseline = 0.0033;
        let t_mult = [2.5, 1.4, 1.0, 1.05, 1.2];
        let soc_mult = [1.6, 1.1, 1.0, 1.05, 1.3];
        let r_table_per_module_ohm = t_mult
            .iter()
            .map(|tm| soc_mult.iter().map(|sm| baseline * tm * sm).collect())
            .collect();

        EquivalentCircuitPlant {
            soc: initial_soc.clamp(0.0, 1.0),
            temperature_c: initial_temperature_c.max(TEMPERATURE_FLOOR_C),
            current_a: 0.0,
            num_modules,
            cells_per_module,
            capacity_ah,
            ambient_c,
            thermal_mass_j_per_c: 1_386_000.0,
            cooling_w_per_c: 800.0,
            r_t_axis,
            r_soc_axis,
            r_table_per_module_ohm,
        }
    }

    fn r_pack_ohm(&self) -> f64 {
        let table: Vec<&[f64]> = self
            .r_table_per_module_ohm
            .iter()
            .map(|row| row.as_slice())
            .collect();
        let per_module = bilinear(&self.r_t_axis, &self.r_soc_axis, &table, self.temperature_c, self.soc);
        per_module * self.num_modules as f64
    }

    fn num_cells_series(&self) -> u32 {
        self.num_modules * self.cells_per_module
    }
}

impl Plant for EquivalentCircuitPlant {
    fn telemetry(&self) -> PackTelemetry {
        let n_cells = self.num_cells_series() as f64;
        let r_pack = self.r_pack_ohm();
        let ocv_cell = ocv_cell_v(self.soc);
        let cell_voltage_v = ocv_cell + self.current_a * r_pack / n_cells;
        PackTelemetry {
            soc: self.soc,
            temperature_c: self.temperature_c,
            current_a: self.current_a,
            cell_voltage_v,
            pack_voltage_v: cell_voltage_v * n_cells,
            ocv_pack_v: ocv_cell * n_cells,
            r_pack_ohm: r_pack,
            num_modules: self.num_modules,
            num_cells_series: self.num_cells_series(),
            capacity_ah: self.capacity_ah,
        }
    }

    fn step(&mut self, dt: f64, applied_current_a: f64, contactors_closed: bool, external_heat_w: f64) {
        let current = if contactors_closed { applied_current_a } else { 0.0 };
        self.current_a = current;

        self.soc = (self.soc + current * dt / (self.capacity_ah * 3600.0)).clamp(0.0, 1.0);

        let r_pack = self.r_pack_ohm();
        let heat_w = current * current * r_pack + external_heat_w;
        let cooling_w = self.cooling_w_per_c * (self.temperature_c - self.ambient_c);
        self.temperature_c =
            (self.temperature_c + (heat_w - cooling_w) * dt / self.thermal_mass_j_per_c).max(TEMPERATURE_FLOOR_C);
    }
}
