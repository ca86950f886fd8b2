//! Alarm debouncing and the tagged alarm taxonomy.
//!
//! Replaces free-form message strings with a sum type over alarm kinds
//! (§9 Design Notes) rather than ad hoc string concatenation.

use serde::{Deserialize, Serialize};

/// Source layer of an alarm: software debounce, or the independent hardware
/// safety watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmSource {
    Software,
    Hardware,
}

/// Physical quantity an alarm is tripped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmQuantity {
    OverVoltage,
    UnderVoltage,
    OverTemperature,
    OverCurrentCharge,
    OverCurrentDischarge,
}

/// Severity of an asserted alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmSeverity {
    Warning,
    Fault,
}

/// A single active alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub source: AlarmSource,
    pub quantity: AlarmQuantity,
    pub severity: AlarmSeverity,
}

impl Alarm {
    pub const fn new(source: AlarmSource, quantity: AlarmQuantity, severity: AlarmSeverity) -> Self {
        Alarm {
            source,
            quantity,
            severity,
        }
    }
}

/// Accumulates `dt` while a condition holds; fires once the accumulator
/// crosses `delay_s`. Resets to zero whenever the condition does not hold,
/// *except* where asymmetric-deadband hysteresis is handled explicitly by
/// the caller (pack.rs controls the reset condition itself for warnings).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Debouncer {
    pub accumulated_s: f64,
}

impl Debouncer {
    pub fn new() -> Self {
        Debouncer { accumulated_s: 0.0 }
    }

    /// Advances the accumulator by `dt` while `condition` holds, resets to
    /// zero otherwise. Returns whether the accumulator has reached `delay_s`
    /// after this update.
    pub fn update(&mut self, condition: bool, dt: f64, delay_s: f64) -> bool {
        if condition {
            self.accumulated_s += dt;
        } else {
            self.accumulated_s = 0.0;
        }
        self.accumulated_s >= delay_s
    }

    pub fn reset(&mut self) {
        self.accumulated_s = 0.0;
    }
}
