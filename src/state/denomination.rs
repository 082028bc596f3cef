//! Die denominations.
//!
//! A denomination classifies a die by its face count. Physical dice report
//! one of the firmware die types; `d100` only ever appears as the product
//! of percentile pairing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    /// Tens die of a percentile pair, reporting 00-90.
    D00,
    /// Percentile result produced from a d10 and a d00 (or two d10s).
    D100,
    /// Connected, but not usable for roll fulfillment.
    #[serde(other)]
    Unknown,
}

impl Denomination {
    /// Map a firmware die type to a denomination.
    ///
    /// Pipped d6 dice behave as plain d6. Fudge dice have no numeric face
    /// count and map to [`Denomination::Unknown`] along with anything else
    /// the firmware reports.
    pub fn from_die_type(die_type: &str) -> Self {
        match die_type {
            "d4" => Self::D4,
            "d6" | "d6pipped" => Self::D6,
            "d8" => Self::D8,
            "d10" => Self::D10,
            "d00" => Self::D00,
            "d12" => Self::D12,
            "d20" => Self::D20,
            _ => Self::Unknown,
        }
    }

    /// Face count used to match resolver terms.
    ///
    /// `None` for the d00 tens die and for unknown dice: neither is ever
    /// offered on its own.
    pub fn faces(&self) -> Option<u32> {
        match self {
            Self::D4 => Some(4),
            Self::D6 => Some(6),
            Self::D8 => Some(8),
            Self::D10 => Some(10),
            Self::D12 => Some(12),
            Self::D20 => Some(20),
            Self::D100 => Some(100),
            Self::D00 | Self::Unknown => None,
        }
    }

    /// Whether rolls from this die enter the aggregation pipeline.
    pub fn is_rollable(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::D4 => "d4",
            Self::D6 => "d6",
            Self::D8 => "d8",
            Self::D10 => "d10",
            Self::D12 => "d12",
            Self::D20 => "d20",
            Self::D00 => "d00",
            Self::D100 => "d100",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for Denomination {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
