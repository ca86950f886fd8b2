//! Error taxonomy for the demo/harness boundary.
//!
//! The control core itself never raises exceptional control flow (§7):
//! threshold breaches are flags, mode-transition refusals are `bool`, and
//! solver degeneracies terminate gracefully. `ControlError` exists only for
//! the handful of fallible setup operations a caller performs before the
//! tick loop starts (building an array from configuration, looking up a
//! pack by id).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown pack id: {0}")]
    UnknownPack(usize),
    #[error("array must contain at least one pack")]
    EmptyArray,
    #[error("invalid pack configuration: {0}")]
    InvalidConfig(String),
}
