//! Array controller: connection sequencing, aggregate limits, and the
//! strict §4.4 tick order over an owned collection of pack controllers.

use std::collections::HashMap;

use crate::error::ControlError;
use crate::pack::PackController;
use crate::plant::Plant;
use crate::solver::{self, PackSolverInput};
use crate::telemetry::{PackMode, PackSample, TelemetryRecord};

/// Owns an ordered set of pack controllers and the array-level bus
/// voltage/limit estimate. No back-references from packs (§9 Ownership).
pub struct ArrayController<P: Plant> {
    packs: Vec<PackController<P>>,
    bus_voltage_v: f64,
    array_charge_limit_a: f64,
    array_discharge_limit_a: f64,
    kcl_residual_tolerance: f64,
    solver_reclamp_margin: f64,
}

impl<P: Plant> ArrayController<P> {
    pub fn new(packs: Vec<PackController<P>>, kcl_residual_tolerance: f64, solver_reclamp_margin: f64) -> Result<Self, ControlError> {
        if packs.is_empty() {
            return Err(ControlError::EmptyArray);
        }
        if kcl_residual_tolerance < 0.0 {
            return Err(ControlError::InvalidConfig(format!(
                "kcl_residual_tolerance must be non-negative, got {kcl_residual_tolerance}"
            )));
        }
        if solver_reclamp_margin < 1.0 {
            return Err(ControlError::InvalidConfig(format!(
                "solver_reclamp_margin must be >= 1.0 (a margin below a pack's own limit would violate it), got {solver_reclamp_margin}"
            )));
        }
        Ok(ArrayController {
            packs,
            bus_voltage_v: 0.0,
            array_charge_limit_a: 0.0,
            array_discharge_limit_a: 0.0,
            kcl_residual_tolerance,
            solver_reclamp_margin,
        })
    }

    pub fn bus_voltage_v(&self) -> f64 {
        self.bus_voltage_v
    }

    pub fn array_charge_limit_a(&self) -> f64 {
        self.array_charge_limit_a
    }

    pub fn array_discharge_limit_a(&self) -> f64 {
        self.array_discharge_limit_a
    }

    pub fn packs(&self) -> &[PackController<P>] {
        &self.packs
    }

    pub fn pack(&self, id: usize) -> Result<&PackController<P>, ControlError> {
        self.packs.get(id).ok_or(ControlError::UnknownPack(id))
    }

    /// Phase one of connection sequencing: if no pack is `Connected` or
    /// `Connecting`, picks the lowest-SoC `Ready` pack for a charge intent
    /// (highest-SoC for discharge), tie-broken by insertion order.
    pub fn connect_first(&mut self, for_charge: bool) -> Option<usize> {
        let any_in_flight = self
            .packs
            .iter()
            .any(|p| matches!(p.mode(), PackMode::Connected | PackMode::Connecting));
        if any_in_flight {
            return None;
        }

        let bus_voltage = self.bus_voltage_v;
        let candidate = self
            .packs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.mode() == PackMode::Ready)
            .min_by(|(ia, a), (ib, b)| {
                let soc_a = a.telemetry().soc;
                let soc_b = b.telemetry().soc;
                let key_a = if for_charge { soc_a } else { -soc_a };
                let key_b = if for_charge { soc_b } else { -soc_b };
                key_a
                    .partial_cmp(&key_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ia.cmp(ib))
            })
            .map(|(i, _)| i)?;

        if self.packs[candidate].request_connect(bus_voltage, for_charge) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Phase two: attempts `request_connect` on every remaining `Ready`
    /// pack in the same tick, once at least one pack is already
    /// `Connected`. Each pack's own voltage-match check gates it.
    pub fn connect_remaining(&mut self, for_charge: bool) -> Vec<usize> {
        let any_connected = self.packs.iter().any(|p| p.mode() == PackMode::Connected);
        if !any_connected {
            return Vec::new();
        }
        let bus_voltage = self.bus_voltage_v;
        let mut connected_ids = Vec::new();
        for (i, pack) in self.packs.iter_mut().enumerate() {
            if pack.mode() == PackMode::Ready && pack.request_connect(bus_voltage, for_charge) {
                connected_ids.push(i);
            }
        }
        connected_ids
    }

    pub fn disconnect_all(&mut self) {
        for pack in &mut self.packs {
            pack.request_disconnect();
        }
    }

    /// Attempts a manual fault reset on every pack, returning each pack's
    /// outcome keyed by its id.
    pub fn reset_all_faults(&mut self) -> HashMap<usize, bool> {
        self.packs
            .iter_mut()
            .enumerate()
            .map(|(i, pack)| (i, pack.manual_fault_reset()))
            .collect()
    }

    /// Fallback estimator: when no pack is connected, bus voltage tracks
    /// the mean `pack_voltage` across `Ready` packs (§4.4).
    pub fn update_bus_voltage(&mut self) {
        if self.packs.iter().any(|p| p.mode() == PackMode::Connected) {
            return;
        }
        let ready: Vec<f64> = self
            .packs
            .iter()
            .filter(|p| p.mode() == PackMode::Ready)
            .map(|p| p.telemetry().pack_voltage_v)
            .collect();
        if !ready.is_empty() {
            self.bus_voltage_v = ready.iter().sum::<f64>() / ready.len() as f64;
        }
    }

    /// Aggregate limits: `min_over_connected(limit) * count(connected)`,
    /// zero when no pack is connected (§4.4, intentionally conservative).
    pub fn compute_array_limits(&mut self) {
        let connected: Vec<&PackController<P>> = self.packs.iter().filter(|p| p.mode() == PackMode::Connected).collect();
        if connected.is_empty() {
            self.array_charge_limit_a = 0.0;
            self.array_discharge_limit_a = 0.0;
            return;
        }
        let min_charge = connected.iter().map(|p| p.charge_limit_a()).fold(f64::INFINITY, f64::min);
        let min_discharge = connected
            .iter()
            .map(|p| p.discharge_limit_a())
            .fold(f64::INFINITY, f64::min);
        let count = connected.len() as f64;
        self.array_charge_limit_a = min_charge * count;
        self.array_discharge_limit_a = min_discharge * count;
    }

    /// Snapshots the array and every pack into a serializable record for
    /// the given tick time (§6). `time_s` is supplied by the caller — the
    /// core never reads a clock.
    pub fn telemetry_record(&self, time_s: f64) -> TelemetryRecord {
        let packs = self
            .packs
            .iter()
            .map(|pack| {
                let t = pack.telemetry();
                PackSample {
                    soc: t.soc,
                    pack_voltage_v: t.pack_voltage_v,
                    cell_voltage_v: t.cell_voltage_v,
                    temperature_c: t.temperature_c,
                    current_a: t.current_a,
                    charge_limit_a: pack.charge_limit_a(),
                    discharge_limit_a: pack.discharge_limit_a(),
                    mode: pack.mode(),
                }
            })
            .collect();
        TelemetryRecord {
            time_s,
            bus_voltage_v: self.bus_voltage_v,
            array_charge_limit_a: self.array_charge_limit_a,
            array_discharge_limit_a: self.array_discharge_limit_a,
            packs,
        }
    }

    /// Runs one tick in the strict §4.4 order. Returns the ids of packs
    /// that were connected during this tick's solve.
    pub fn step(&mut self, dt: f64, requested_current_a: f64, external_heat_w_per_pack: &HashMap<usize, f64>) -> Vec<usize> {
        let bus_voltage = self.bus_voltage_v;
        for pack in &mut self.packs {
            pack.step(dt, bus_voltage);
        }

        let connected_ids: Vec<usize> = self
            .packs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.mode() == PackMode::Connected)
            .map(|(i, _)| i)
            .collect();

        let solver_inputs: Vec<PackSolverInput> = connected_ids
            .iter()
            .map(|&i| {
                let t = self.packs[i].telemetry();
                PackSolverInput {
                    id: i,
                    ocv_v: t.ocv_pack_v,
                    r_ohm: t.r_pack_ohm,
                    charge_limit_a: self.packs[i].charge_limit_a(),
                    discharge_limit_a: self.packs[i].discharge_limit_a(),
                }
            })
            .collect();

        let solved = solver::solve(
            &solver_inputs,
            requested_current_a,
            self.array_charge_limit_a,
            self.array_discharge_limit_a,
            self.solver_reclamp_margin,
            self.kcl_residual_tolerance,
        );

        let mut current_by_id: HashMap<usize, f64> = HashMap::new();
        if let Some(result) = &solved {
            self.bus_voltage_v = result.bus_voltage_v;
            for &(id, current) in &result.currents_a {
                current_by_id.insert(id, current);
            }
        }

        for (i, pack) in self.packs.iter_mut().enumerate() {
            let heat = external_heat_w_per_pack.get(&i).copied().unwrap_or(0.0);
            let current = current_by_id.get(&i).copied().unwrap_or(0.0);
            pack.advance_plant(dt, current, heat);
        }

        if connected_ids.is_empty() {
            self.update_bus_voltage();
        }
        self.compute_array_limits();

        connected_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plant::EquivalentCircuitPlant;

    fn make_array(socs: &[f64]) -> ArrayController<EquivalentCircuitPlant> {
        let packs = socs
            .iter()
            .enumerate()
            .map(|(i, &soc)| {
                let plant = EquivalentCircuitPlant::new(22, 14, 280.0, soc, 40.0, 40.0);
                PackController::new(i, plant, Config::default())
            })
            .collect();
        ArrayController::new(packs, 0.01, 1.01).unwrap()
    }

    #[test]
    fn new_rejects_empty_pack_list() {
        let result: Result<ArrayController<EquivalentCircuitPlant>, _> = ArrayController::new(vec![], 0.01, 1.01);
        assert!(result.is_err());
    }

    #[test]
    fn new_rejects_negative_kcl_residual_tolerance() {
        let plant = EquivalentCircuitPlant::new(22, 14, 280.0, 0.5, 40.0, 40.0);
        let packs = vec![PackController::new(0, plant, Config::default())];
        assert!(ArrayController::new(packs, -0.01, 1.01).is_err());
    }

    #[test]
    fn new_rejects_reclamp_margin_below_one() {
        let plant = EquivalentCircuitPlant::new(22, 14, 280.0, 0.5, 40.0, 40.0);
        let packs = vec![PackController::new(0, plant, Config::default())];
        assert!(ArrayController::new(packs, 0.01, 0.99).is_err());
    }

    #[test]
    fn connect_first_picks_lowest_soc_for_charge_intent() {
        let mut array = make_array(&[0.65, 0.45, 0.55]);
        let bus = array.packs()[1].telemetry().pack_voltage_v;
        array.bus_voltage_v = bus;
        let chosen = array.connect_first(true).unwrap();
        assert_eq!(chosen, 1);
    }

    #[test]
    fn connect_first_picks_highest_soc_for_discharge_intent() {
        let mut array = make_array(&[0.65, 0.45, 0.55]);
        let bus = array.packs()[0].telemetry().pack_voltage_v;
        array.bus_voltage_v = bus;
        let chosen = array.connect_first(false).unwrap();
        assert_eq!(chosen, 0);
    }

    #[test]
    fn connect_remaining_requires_one_already_connected() {
        let mut array = make_array(&[0.5, 0.5, 0.5]);
        assert!(array.connect_remaining(true).is_empty());
    }

    #[test]
    fn sequential_then_parallel_connect_matches_scenario_s1() {
        let mut array = make_array(&[0.45, 0.55, 0.65]);
        let heat = HashMap::new();
        let bus = array.packs()[0].telemetry().pack_voltage_v;
        array.bus_voltage_v = bus;

        let first = array.connect_first(true).unwrap();
        assert_eq!(first, 0);

        for _ in 0..5 {
            array.step(1.0, 0.0, &heat);
        }
        assert_eq!(array.packs()[0].mode(), PackMode::Connected);
        assert_eq!(array.packs()[1].mode(), PackMode::Ready);
        assert_eq!(array.packs()[2].mode(), PackMode::Ready);

        let newly = array.connect_remaining(true);
        assert_eq!(newly.len(), 2);
        for _ in 0..5 {
            array.step(1.0, 0.0, &heat);
        }
        assert_eq!(array.packs()[1].mode(), PackMode::Connected);
        assert_eq!(array.packs()[2].mode(), PackMode::Connected);
    }

    #[test]
    fn kirchhoff_distribution_matches_scenario_s2() {
        let mut array = make_array(&[0.45, 0.55, 0.65]);
        let heat = HashMap::new();
        let bus = array.packs()[0].telemetry().pack_voltage_v;
        array.bus_voltage_v = bus;
        array.connect_first(true);
        for _ in 0..5 {
            array.step(1.0, 0.0, &heat);
        }
        array.connect_remaining(true);
        for _ in 0..5 {
            array.step(1.0, 0.0, &heat);
        }

        let connected = array.step(1.0, 200.0, &heat);
        assert_eq!(connected.len(), 3);
        assert!(array.array_charge_limit_a() >= 0.0);
    }

    #[test]
    fn array_limits_are_zero_when_nothing_connected() {
        let mut array = make_array(&[0.5, 0.5]);
        let heat = HashMap::new();
        array.step(1.0, 0.0, &heat);
        assert_eq!(array.array_charge_limit_a(), 0.0);
        assert_eq!(array.array_discharge_limit_a(), 0.0);
    }

    #[test]
    fn reset_all_faults_reports_per_pack_outcome() {
        let mut array = make_array(&[0.5, 0.5]);
        let outcomes = array.reset_all_faults();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(|&ok| ok));
    }

    #[test]
    fn telemetry_record_snapshots_array_and_every_pack() {
        let mut array = make_array(&[0.4, 0.6]);
        let heat = HashMap::new();
        array.step(1.0, 0.0, &heat);

        let record = array.telemetry_record(12.0);
        assert_eq!(record.time_s, 12.0);
        assert_eq!(record.bus_voltage_v, array.bus_voltage_v());
        assert_eq!(record.array_charge_limit_a, array.array_charge_limit_a());
        assert_eq!(record.packs.len(), 2);
        for (sample, pack) in record.packs.iter().zip(array.packs()) {
            assert_eq!(sample.mode, pack.mode());
            assert_eq!(sample.soc, pack.telemetry().soc);
            assert_eq!(sample.charge_limit_a, pack.charge_limit_a());
        }
    }
}
