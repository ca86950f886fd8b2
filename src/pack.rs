//! Per-pack controller: state machine, alarm debouncing, the hardware
//! safety watchdog, and the computed current limits (§4.3).

use std::panic::{self, AssertUnwindSafe};

use crate::alarm::{Alarm, AlarmQuantity, AlarmSeverity, AlarmSource, Debouncer};
use crate::config::Config;
use crate::curves::{cell_voltage_curve, soc_curve, temperature_curve};
use crate::plant::Plant;
use crate::telemetry::{PackMode, PackTelemetry};

/// One battery pack's controller: state machine, debouncers, and limits.
/// Owns its plant exclusively (§9 Ownership) — no back-reference to the
/// array controller.
pub struct PackController<P: Plant> {
    id: usize,
    plant: P,
    config: Config,

    mode: PackMode,
    contactors_closed: bool,
    charge_limit_a: f64,
    discharge_limit_a: f64,

    has_warning: bool,
    has_fault: bool,
    fault_latched: bool,
    hw_fault_latched: bool,
    active_alarms: Vec<Alarm>,

    sw_fault_ov: Debouncer,
    sw_fault_uv: Debouncer,
    sw_fault_ot: Debouncer,
    sw_warn_ov: Debouncer,
    sw_warn_uv: Debouncer,
    sw_warn_ot: Debouncer,
    hw_safety_ov: Debouncer,
    hw_safety_uv: Debouncer,
    hw_safety_ot: Debouncer,
    oc_fault: Debouncer,
    oc_warn: Debouncer,

    warning_active_time: f64,
    precharge_timer: f64,
    time_in_safe_state: f64,
}

impl<P: Plant> PackController<P> {
    pub fn new(id: usize, plant: P, config: Config) -> Self {
        PackController {
            id,
            plant,
            config,
            mode: PackMode::Ready,
            contactors_closed: false,
            charge_limit_a: 0.0,
            discharge_limit_a: 0.0,
            has_warning: false,
            has_fault: false,
            fault_latched: false,
            hw_fault_latched: false,
            active_alarms: Vec::new(),
            sw_fault_ov: Debouncer::new(),
            sw_fault_uv: Debouncer::new(),
            sw_fault_ot: Debouncer::new(),
            sw_warn_ov: Debouncer::new(),
            sw_warn_uv: Debouncer::new(),
            sw_warn_ot: Debouncer::new(),
            hw_safety_ov: Debouncer::new(),
            hw_safety_uv: Debouncer::new(),
            hw_safety_ot: Debouncer::new(),
            oc_fault: Debouncer::new(),
            oc_warn: Debouncer::new(),
            warning_active_time: 0.0,
            precharge_timer: 0.0,
            time_in_safe_state: 0.0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn mode(&self) -> PackMode {
        self.mode
    }

    pub fn contactors_closed(&self) -> bool {
        self.contactors_closed
    }

    pub fn charge_limit_a(&self) -> f64 {
        self.charge_limit_a
    }

    pub fn discharge_limit_a(&self) -> f64 {
        self.discharge_limit_a
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning
    }

    pub fn has_fault(&self) -> bool {
        self.has_fault
    }

    pub fn fault_latched(&self) -> bool {
        self.fault_latched
    }

    pub fn hw_fault_latched(&self) -> bool {
        self.hw_fault_latched
    }

    pub fn active_alarms(&self) -> &[Alarm] {
        &self.active_alarms
    }

    pub fn time_in_safe_state(&self) -> f64 {
        self.time_in_safe_state
    }

    pub fn telemetry(&self) -> PackTelemetry {
        self.plant.telemetry()
    }

    fn voltage_matches(&self, bus_voltage: f64) -> bool {
        let t = self.plant.telemetry();
        (t.pack_voltage_v - bus_voltage).abs() <= self.config.voltage_match_per_module_v * t.num_modules as f64
    }

    /// Requests the bus connection sequence from `Ready`. `for_charge`
    /// records intent for the caller's logging/selection logic; the
    /// voltage-match gate itself is direction-independent (§4.3).
    pub fn request_connect(&mut self, bus_voltage: f64, for_charge: bool) -> bool {
        if self.mode != PackMode::Ready {
            return false;
        }
        if !self.voltage_matches(bus_voltage) {
            return false;
        }
        self.precharge_timer = 0.0;
        self.mode = PackMode::Connecting;
        log::debug!(
            "pack {}: Ready -> Connecting (for_charge={})",
            self.id,
            for_charge
        );
        true
    }

    /// Re-checks the voltage match and either closes contactors or aborts
    /// back to `Ready`. Only valid from `Connecting`.
    pub fn complete_connection(&mut self, bus_voltage: f64) -> bool {
        if self.mode != PackMode::Connecting {
            return false;
        }
        if !self.voltage_matches(bus_voltage) {
            self.mode = PackMode::Ready;
            log::debug!("pack {}: Connecting -> Ready (voltage mismatch)", self.id);
            return false;
        }
        self.mode = PackMode::Connected;
        self.contactors_closed = true;
        log::debug!("pack {}: Connecting -> Connected", self.id);
        true
    }

    pub fn request_disconnect(&mut self) {
        if matches!(self.mode, PackMode::Connected | PackMode::Connecting) {
            self.contactors_closed = false;
            self.mode = PackMode::Ready;
            log::debug!("pack {}: -> Ready (disconnect requested)", self.id);
        }
    }

    /// Clears a latched fault if the pack is currently safe and has dwelt
    /// there for at least `fault_reset_safe_hold_s` (§4.3).
    pub fn manual_fault_reset(&mut self) -> bool {
        if !self.fault_latched {
            return true;
        }
        let t = self.plant.telemetry();
        let safe = t.cell_voltage_v < self.config.sw_ov_fault_v
            && t.cell_voltage_v > self.config.sw_uv_fault_v
            && t.temperature_c < self.config.sw_ot_fault_c;

        if safe && self.time_in_safe_state >= self.config.fault_reset_safe_hold_s {
            self.clear_all_faults();
            self.mode = PackMode::Ready;
            log::debug!("pack {}: Fault -> Ready (manual reset)", self.id);
            return true;
        }
        if !safe {
            self.time_in_safe_state = 0.0;
        }
        false
    }

    fn clear_all_faults(&mut self) {
        self.has_fault = false;
        self.has_warning = false;
        self.fault_latched = false;
        self.hw_fault_latched = false;
        self.active_alarms.clear();
        self.sw_fault_ov.reset();
        self.sw_fault_uv.reset();
        self.sw_fault_ot.reset();
        self.sw_warn_ov.reset();
        self.sw_warn_uv.reset();
        self.sw_warn_ot.reset();
        self.hw_safety_ov.reset();
        self.hw_safety_uv.reset();
        self.hw_safety_ot.reset();
        self.oc_fault.reset();
        self.oc_warn.reset();
        self.warning_active_time = 0.0;
    }

    fn raise_fault(&mut self, alarm: Alarm, hw: bool) {
        self.has_fault = true;
        self.fault_latched = true;
        if hw {
            self.hw_fault_latched = true;
        }
        self.contactors_closed = false;
        self.mode = PackMode::Fault;
        self.charge_limit_a = 0.0;
        self.discharge_limit_a = 0.0;
        if !self.active_alarms.contains(&alarm) {
            self.active_alarms.push(alarm);
        }
        log::warn!(
            "pack {}: fault latched ({:?}/{:?})",
            self.id,
            alarm.source,
            alarm.quantity
        );
    }

    /// Hardware-safety watchdog: runs every tick regardless of the software
    /// fault latch. Defensive against telemetry-access panics, which are
    /// themselves converted into a HW fault (fail-safe, §4.3).
    fn hardware_safety_check(&mut self, dt: f64) {
        let telemetry = panic::catch_unwind(AssertUnwindSafe(|| self.plant.telemetry()));
        let t = match telemetry {
            Ok(t) => t,
            Err(_) => {
                self.raise_fault(
                    Alarm::new(AlarmSource::Hardware, AlarmQuantity::OverVoltage, AlarmSeverity::Fault),
                    true,
                );
                return;
            }
        };

        if self
            .hw_safety_ov
            .update(t.cell_voltage_v >= self.config.hw_ov_v, dt, self.config.hw_ov_uv_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Hardware, AlarmQuantity::OverVoltage, AlarmSeverity::Fault),
                true,
            );
        }
        if self
            .hw_safety_uv
            .update(t.cell_voltage_v <= self.config.hw_uv_v, dt, self.config.hw_ov_uv_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Hardware, AlarmQuantity::UnderVoltage, AlarmSeverity::Fault),
                true,
            );
        }
        if self
            .hw_safety_ot
            .update(t.temperature_c >= self.config.hw_ot_c, dt, self.config.hw_ot_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Hardware, AlarmQuantity::OverTemperature, AlarmSeverity::Fault),
                true,
            );
        }
    }

    /// Software fault/warning debouncing plus overcurrent checks (§4.3).
    fn software_alarm_check(&mut self, dt: f64) {
        let t = self.plant.telemetry();

        if self
            .sw_fault_ov
            .update(t.cell_voltage_v >= self.config.sw_ov_fault_v, dt, self.config.sw_fault_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Software, AlarmQuantity::OverVoltage, AlarmSeverity::Fault),
                false,
            );
        }
        if self
            .sw_fault_uv
            .update(t.cell_voltage_v <= self.config.sw_uv_fault_v, dt, self.config.sw_fault_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Software, AlarmQuantity::UnderVoltage, AlarmSeverity::Fault),
                false,
            );
        }
        if self
            .sw_fault_ot
            .update(t.temperature_c >= self.config.sw_ot_fault_c, dt, self.config.sw_fault_delay_s)
        {
            self.raise_fault(
                Alarm::new(AlarmSource::Software, AlarmQuantity::OverTemperature, AlarmSeverity::Fault),
                false,
            );
        }

        // Overcurrent, using the temperature curve only.
        let tc = temperature_curve(t.temperature_c);
        let charge_ceiling = tc.charge * t.capacity_ah;
        let discharge_ceiling = tc.discharge * t.capacity_ah;
        let oc_charge = t.current_a > 1.05 * charge_ceiling + 5.0;
        // Intentionally more sensitive than a naive outward 5A offset would
        // read: reproduced exactly as specified.
        let oc_discharge = t.current_a < -(1.05 * discharge_ceiling - 5.0);
        let oc_fault_condition = oc_charge && t.temperature_c < 0.0;

        let oc_warn_fired = self
            .oc_warn
            .update(oc_charge || oc_discharge, dt, self.config.oc_warn_delay_s);
        let oc_fault_fired = self.oc_fault.update(oc_fault_condition, dt, self.config.oc_fault_delay_s);

        if oc_fault_fired {
            self.raise_fault(
                Alarm::new(AlarmSource::Software, AlarmQuantity::OverCurrentCharge, AlarmSeverity::Fault),
                false,
            );
        }

        // Warning thresholds use asymmetric-deadband hysteresis: the
        // per-threshold accumulator only resets on crossing back through
        // the clear side of the band, not merely on the assert condition
        // going false.
        let ov_warn_fired = update_hysteretic(
            &mut self.sw_warn_ov,
            t.cell_voltage_v >= self.config.sw_ov_warn_v,
            t.cell_voltage_v <= self.config.sw_ov_warn_clear_v,
            dt,
            self.config.sw_warn_delay_s,
        );
        let uv_warn_fired = update_hysteretic(
            &mut self.sw_warn_uv,
            t.cell_voltage_v <= self.config.sw_uv_warn_v,
            t.cell_voltage_v >= self.config.sw_uv_warn_clear_v,
            dt,
            self.config.sw_warn_delay_s,
        );
        let ot_warn_fired = update_hysteretic(
            &mut self.sw_warn_ot,
            t.temperature_c >= self.config.sw_ot_warn_c,
            t.temperature_c <= self.config.sw_ot_warn_clear_c,
            dt,
            self.config.sw_warn_delay_s,
        );

        let any_warning_fired = ov_warn_fired || uv_warn_fired || ot_warn_fired || oc_warn_fired;
        let any_raw_predicate = (t.cell_voltage_v >= self.config.sw_ov_warn_v)
            || (t.cell_voltage_v <= self.config.sw_uv_warn_v)
            || (t.temperature_c >= self.config.sw_ot_warn_c)
            || oc_charge
            || oc_discharge;

        if any_warning_fired {
            self.has_warning = true;
        }
        if self.has_warning {
            if any_raw_predicate {
                self.warning_active_time = 0.0;
            } else {
                self.warning_active_time += dt;
                if self.warning_active_time >= self.config.warning_hold_time_s {
                    self.has_warning = false;
                    self.active_alarms.retain(|a| a.severity != AlarmSeverity::Warning);
                }
            }
        }

        if any_warning_fired {
            push_warning_alarm(&mut self.active_alarms, ov_warn_fired, AlarmQuantity::OverVoltage);
            push_warning_alarm(&mut self.active_alarms, uv_warn_fired, AlarmQuantity::UnderVoltage);
            push_warning_alarm(&mut self.active_alarms, ot_warn_fired, AlarmQuantity::OverTemperature);
            if oc_warn_fired {
                if oc_charge {
                    push_warning_alarm(&mut self.active_alarms, true, AlarmQuantity::OverCurrentCharge);
                }
                if oc_discharge {
                    push_warning_alarm(&mut self.active_alarms, true, AlarmQuantity::OverCurrentDischarge);
                }
            }
        }
    }

    fn update_safe_state_timer(&mut self, dt: f64) {
        let t = self.plant.telemetry();
        let safe = t.cell_voltage_v < self.config.sw_ov_fault_v
            && t.cell_voltage_v > self.config.sw_uv_fault_v
            && t.temperature_c < self.config.sw_ot_fault_c;
        if safe {
            self.time_in_safe_state += dt;
        } else {
            self.time_in_safe_state = 0.0;
        }
    }

    fn compute_limits(&mut self) {
        let t = self.plant.telemetry();
        let temp = temperature_curve(t.temperature_c);
        let soc = soc_curve(t.soc);
        let cellv = cell_voltage_curve(t.cell_voltage_v);

        let charge_rate = temp.charge.min(soc.charge).min(cellv.charge).max(0.0);
        let discharge_rate = temp.discharge.min(soc.discharge).min(cellv.discharge).max(0.0);

        self.charge_limit_a = charge_rate * t.capacity_ah;
        self.discharge_limit_a = discharge_rate * t.capacity_ah;
    }

    /// Executes one controller tick in the strict §4.3 order. Does **not**
    /// advance the plant's physics — that is the array controller's sole
    /// responsibility (§4.4, avoiding the double-step hazard).
    pub fn step(&mut self, dt: f64, bus_voltage: f64) {
        self.hardware_safety_check(dt);
        self.software_alarm_check(dt);
        self.update_safe_state_timer(dt);

        if self.fault_latched {
            self.contactors_closed = false;
            self.charge_limit_a = 0.0;
            self.discharge_limit_a = 0.0;
            return;
        }

        if self.mode == PackMode::Connecting {
            self.precharge_timer += dt;
            if self.precharge_timer >= self.config.precharge_duration_s {
                if self.voltage_matches(bus_voltage) {
                    self.mode = PackMode::Connected;
                    self.contactors_closed = true;
                } else {
                    self.mode = PackMode::Ready;
                }
            }
        }

        self.compute_limits();
    }

    /// Advances this pack's plant by `dt` with the given applied current
    /// and external heat input. The sole driver of pack physics (§4.4).
    pub fn advance_plant(&mut self, dt: f64, applied_current_a: f64, external_heat_w: f64) {
        self.plant
            .step(dt, applied_current_a, self.contactors_closed, external_heat_w);
    }
}

fn update_hysteretic(debouncer: &mut Debouncer, assert_cond: bool, clear_cond: bool, dt: f64, delay_s: f64) -> bool {
    if assert_cond {
        debouncer.accumulated_s += dt;
    } else if clear_cond {
        debouncer.accumulated_s = 0.0;
    }
    debouncer.accumulated_s >= delay_s
}

fn push_warning_alarm(alarms: &mut Vec<Alarm>, fired: bool, quantity: AlarmQuantity) {
    if !fired {
        return;
    }
    let alarm = Alarm::new(AlarmSource::Software, quantity, AlarmSeverity::Warning);
    if !alarms.contains(&alarm) {
        alarms.push(alarm);
    }
}

#[cfg(test)]
/// A plant stub whose telemetry is set directly by the test, so alarm and
/// state-machine edge cases can be exercised without depending on the
/// reference plant's dynamics.
struct FixedPlant {
    telemetry: PackTelemetry,
}

#[cfg(test)]
impl FixedPlant {
    fn new(cell_voltage_v: f64, temperature_c: f64) -> Self {
        let num_modules = 22;
        let num_cells_series = num_modules * 14;
        FixedPlant {
            telemetry: PackTelemetry {
                soc: 0.5,
                temperature_c,
                current_a: 0.0,
                cell_voltage_v,
                pack_voltage_v: cell_voltage_v * num_cells_series as f64,
                ocv_pack_v: cell_voltage_v * num_cells_series as f64,
                r_pack_ohm: 0.07,
                num_modules,
                num_cells_series,
                capacity_ah: 280.0,
            },
        }
    }

    fn with_current(mut self, current_a: f64) -> Self {
        self.telemetry.current_a = current_a;
        self
    }
}

#[cfg(test)]
impl Plant for FixedPlant {
    fn telemetry(&self) -> PackTelemetry {
        self.telemetry
    }

    fn step(&mut self, _dt: f64, applied_current_a: f64, contactors_closed: bool, _external_heat_w: f64) {
        self.telemetry.current_a = if contactors_closed { applied_current_a } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::EquivalentCircuitPlant;

    fn make_pack(id: usize, soc: f64, temp: f64) -> PackController<EquivalentCircuitPlant> {
        let plant = EquivalentCircuitPlant::new(22, 14, 280.0, soc, temp, 40.0);
        PackController::new(id, plant, Config::default())
    }

    fn make_fixed_pack(cell_voltage_v: f64, temperature_c: f64) -> PackController<FixedPlant> {
        PackController::new(0, FixedPlant::new(cell_voltage_v, temperature_c), Config::default())
    }

    #[test]
    fn initial_mode_is_ready() {
        let pack = make_pack(0, 0.5, 25.0);
        assert_eq!(pack.mode(), PackMode::Ready);
        assert!(!pack.contactors_closed());
    }

    #[test]
    fn request_connect_requires_voltage_match() {
        let mut pack = make_pack(0, 0.5, 25.0);
        let bus = pack.telemetry().pack_voltage_v;
        assert!(pack.request_connect(bus, true));
        assert_eq!(pack.mode(), PackMode::Connecting);
    }

    #[test]
    fn request_connect_rejects_voltage_mismatch() {
        let mut pack = make_pack(0, 0.5, 25.0);
        let bus = pack.telemetry().pack_voltage_v + 1000.0;
        assert!(!pack.request_connect(bus, true));
        assert_eq!(pack.mode(), PackMode::Ready);
    }

    #[test]
    fn precharge_completes_after_five_seconds() {
        let mut pack = make_pack(0, 0.5, 25.0);
        let bus = pack.telemetry().pack_voltage_v;
        assert!(pack.request_connect(bus, true));
        for _ in 0..4 {
            pack.step(1.0, bus);
            assert_eq!(pack.mode(), PackMode::Connecting);
        }
        pack.step(1.0, bus);
        assert_eq!(pack.mode(), PackMode::Connected);
        assert!(pack.contactors_closed());
    }

    #[test]
    fn sw_ov_fault_latches_after_five_seconds_not_before() {
        let mut pack = make_fixed_pack(4.30 - 0.002, 25.0); // above SW OV, below HW OV
        for _ in 0..4 {
            pack.step(1.0, 0.0);
            assert!(!pack.fault_latched(), "must not fault before 5s");
        }
        pack.step(1.0, 0.0);
        assert!(pack.fault_latched());
        assert_eq!(pack.mode(), PackMode::Fault);
        assert!(!pack.contactors_closed());
        assert_eq!(pack.charge_limit_a(), 0.0);
        assert_eq!(pack.discharge_limit_a(), 0.0);
    }

    #[test]
    fn hw_safety_fires_independently_of_already_latched_sw_fault() {
        // 66C is above the 65C SW-OT fault threshold but below the 70C HW-OT
        // threshold, so only the software path latches here.
        let mut pack = make_fixed_pack(3.6, 66.0);
        for _ in 0..4 {
            pack.step(1.0, 0.0);
            assert!(!pack.fault_latched());
        }
        pack.step(1.0, 0.0);
        assert!(pack.fault_latched(), "SW-OT must latch first");
        assert!(!pack.hw_fault_latched());

        // A later, unrelated HW breach (cell voltage past hw_ov_v) must
        // still assert on top of the pre-existing SW fault latch.
        pack.plant = FixedPlant::new(4.35, 66.0);
        pack.step(1.0, 0.0);
        assert!(pack.fault_latched());
        assert!(pack.hw_fault_latched());
    }

    #[test]
    fn ov_warning_asserts_after_delay_and_clears_after_hold_time() {
        let mut pack = PackController::new(0, FixedPlant::new(4.22, 25.0), Config::fast_test_profile());
        // sw_ov_warn_v is crossed; sw_warn_delay_s = 0.5s under the fast profile.
        pack.step(0.3, 0.0);
        assert!(!pack.has_warning());
        pack.step(0.3, 0.0);
        assert!(pack.has_warning());

        // Cell voltage drops back below the assert threshold: the warning
        // must stay latched until warning_hold_time_s (1.0s) of continuous
        // clear has elapsed, not the instant the condition goes away.
        pack.plant = FixedPlant::new(3.6, 25.0);
        pack.step(0.6, 0.0);
        assert!(pack.has_warning(), "warning must hold before the full dwell elapses");
        pack.step(0.6, 0.0);
        assert!(!pack.has_warning());
    }

    #[test]
    fn oc_fault_requires_subzero_temperature_and_overcurrent_charge() {
        // Above zero: overcurrent-charge alone must never fault, only warn.
        let mut pack_above_zero = PackController::new(
            0,
            FixedPlant::new(3.6, 25.0).with_current(10_000.0),
            Config::default(),
        );
        for _ in 0..20 {
            pack_above_zero.step(1.0, 0.0);
        }
        assert!(!pack_above_zero.fault_latched());

        // Below zero + overcurrent-charge for 5s: must fault.
        let mut pack_below_zero =
            PackController::new(0, FixedPlant::new(3.6, -5.0).with_current(10_000.0), Config::default());
        for _ in 0..4 {
            pack_below_zero.step(1.0, 0.0);
            assert!(!pack_below_zero.fault_latched());
        }
        pack_below_zero.step(1.0, 0.0);
        assert!(pack_below_zero.fault_latched());
    }

    #[test]
    fn limits_are_nonnegative_and_zero_when_faulted() {
        let mut pack = make_pack(0, 0.5, 25.0);
        pack.step(1.0, 0.0);
        assert!(pack.charge_limit_a() >= 0.0);
        assert!(pack.discharge_limit_a() >= 0.0);
    }

    #[test]
    fn manual_fault_reset_noop_when_not_latched() {
        let mut pack = make_pack(0, 0.5, 25.0);
        assert!(pack.manual_fault_reset());
    }

    #[test]
    fn manual_fault_reset_requires_safe_dwell() {
        let mut pack = make_pack(0, 0.99, 90.0);
        for _ in 0..10 {
            pack.step(1.0, 0.0);
        }
        assert!(pack.fault_latched());
        assert!(!pack.manual_fault_reset());
    }

    #[test]
    fn request_disconnect_from_connected_returns_to_ready() {
        let mut pack = make_pack(0, 0.5, 25.0);
        let bus = pack.telemetry().pack_voltage_v;
        pack.request_connect(bus, true);
        for _ in 0..5 {
            pack.step(1.0, bus);
        }
        assert_eq!(pack.mode(), PackMode::Connected);
        pack.request_disconnect();
        assert_eq!(pack.mode(), PackMode::Ready);
        assert!(!pack.contactors_closed());
    }
}
