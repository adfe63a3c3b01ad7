//! Presentation bands for vital signs.

use serde::Serialize;

/// Upper bound of the normal band, inclusive.
pub const TEMPERATURE_NORMAL_MAX_C: f64 = 37.0;
/// Upper bound of the elevated band, inclusive.
pub const TEMPERATURE_ELEVATED_MAX_C: f64 = 38.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureBand {
    Normal,
    Elevated,
    High,
}

impl TemperatureBand {
    pub fn of(celsius: f64) -> Self {
        if celsius <= TEMPERATURE_NORMAL_MAX_C {
            TemperatureBand::Normal
        } else if celsius <= TEMPERATURE_ELEVATED_MAX_C {
            TemperatureBand::Elevated
        } else {
            TemperatureBand::High
        }
    }
}
