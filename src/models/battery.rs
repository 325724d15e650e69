//! Battery model.
//!
//! Telemetry-only: nodes broadcast their battery voltage on a periodic
//! gateway task; the readings reach user event handlers as `BatData`.

pub const MODEL_ID: u16 = 0x0004;

/// Default battery reporting period (24 h).
pub const DEFAULT_BATTERY_PERIOD: u32 = 86_400;
