//! Control core configuration — the §4.3 threshold/delay table as data.
//!
//! Kept as a single immutable value threaded through the controllers (rather
//! than module-level constants) so chemistry variants and tests can inject
//! their own thresholds without recompiling.

use serde::{Deserialize, Serialize};

/// Threshold, delay, and hold-time constants for one pack chemistry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Software over-voltage warning assert / clear thresholds (V).
    pub sw_ov_warn_v: f64,
    pub sw_ov_warn_clear_v: f64,
    /// Software under-voltage warning assert / clear thresholds (V).
    pub sw_uv_warn_v: f64,
    pub sw_uv_warn_clear_v: f64,
    /// Software over-temperature warning assert / clear thresholds (°C).
    pub sw_ot_warn_c: f64,
    pub sw_ot_warn_clear_c: f64,
    /// Software fault thresholds.
    pub sw_ov_fault_v: f64,
    pub sw_uv_fault_v: f64,
    pub sw_ot_fault_c: f64,

    /// Hardware safety thresholds (independent watchdog, §4.3).
    pub hw_ov_v: f64,
    pub hw_uv_v: f64,
    pub hw_ot_c: f64,

    /// Debounce delays (seconds).
    pub sw_warn_delay_s: f64,
    pub sw_fault_delay_s: f64,
    pub hw_ov_uv_delay_s: f64,
    pub hw_ot_delay_s: f64,
    pub oc_warn_delay_s: f64,
    pub oc_fault_delay_s: f64,

    /// Pre-charge dwell before auto-completing `Connecting` (s).
    pub precharge_duration_s: f64,
    /// Hold time a warning must be continuously clear before it drops (s).
    pub warning_hold_time_s: f64,
    /// Dwell time in a safe state required before `manual_fault_reset` may
    /// succeed (s).
    pub fault_reset_safe_hold_s: f64,
    /// Allowed voltage mismatch per module for a bus connection (V).
    pub voltage_match_per_module_v: f64,

    /// KCL residual tolerance fraction accepted after iteration-cap
    /// exhaustion (§4.4, §8 property 5). Not a hardware spec — a pragmatic
    /// engineering choice.
    pub kcl_residual_tolerance: f64,
    /// Fractional headroom allowed over a pack's own limit before the
    /// solver's defensive re-clamp kicks in (§4.4: "limit × 1.01").
    pub solver_reclamp_margin: f64,
}

impl Default for Config {
    /// The §4.3 threshold table, verbatim.
    fn default() -> Self {
        Config {
            sw_ov_warn_v: 4.210,
            sw_ov_warn_clear_v: 4.190,
            sw_uv_warn_v: 3.200,
            sw_uv_warn_clear_v: 3.220,
            sw_ot_warn_c: 60.0,
            sw_ot_warn_clear_c: 57.0,
            sw_ov_fault_v: 4.225,
            sw_uv_fault_v: 3.000,
            sw_ot_fault_c: 65.0,

            hw_ov_v: 4.300,
            hw_uv_v: 2.700,
            hw_ot_c: 70.0,

            sw_warn_delay_s: 5.0,
            sw_fault_delay_s: 5.0,
            hw_ov_uv_delay_s: 1.0,
            hw_ot_delay_s: 5.0,
            oc_warn_delay_s: 10.0,
            oc_fault_delay_s: 5.0,

            precharge_duration_s: 5.0,
            warning_hold_time_s: 10.0,
            fault_reset_safe_hold_s: 60.0,
            voltage_match_per_module_v: 1.2,

            kcl_residual_tolerance: 0.01,
            solver_reclamp_margin: 1.01,
        }
    }
}

impl Config {
    /// Tighter margins: useful for stress-testing debounce and hysteresis
    /// logic without waiting out the full production delays.
    pub fn fast_test_profile() -> Self {
        Config {
            sw_warn_delay_s: 0.5,
            sw_fault_delay_s: 0.5,
            hw_ov_uv_delay_s: 0.1,
            hw_ot_delay_s: 0.5,
            oc_warn_delay_s: 1.0,
            oc_fault_delay_s: 0.5,
            precharge_duration_s: 0.5,
            warning_hold_time_s: 1.0,
            fault_reset_safe_hold_s: 2.0,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_table() {
        let cfg = Config::default();
        assert_eq!(cfg.sw_ov_fault_v, 4.225);
        assert_eq!(cfg.hw_ov_v, 4.300);
        assert_eq!(cfg.fault_reset_safe_hold_s, 60.0);
        assert_eq!(cfg.voltage_match_per_module_v, 1.2);
    }

    #[test]
    fn fast_test_profile_keeps_thresholds() {
        let cfg = Config::fast_test_profile();
        assert_eq!(cfg.sw_ov_fault_v, Config::default().sw_ov_fault_v);
        assert!(cfg.fault_reset_safe_hold_s < Config::default().fault_reset_safe_hold_s);
    }
}
