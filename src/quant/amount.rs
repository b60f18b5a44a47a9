use std::fmt::Display;
use std::str::FromStr;

use super::label::QuantCondition;

/// The kind of scalar quantity an [`Amount`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AmountType {
    Intensity,
    NormalizedIntensity,
    TotalIntensity,
    NormalizedTotalIntensity,
    Area,
    XicArea,
    Ccs,
    SpectralCount,
}

impl Display for AmountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AmountType::Intensity => "INTENSITY",
            AmountType::NormalizedIntensity => "NORMALIZED_INTENSITY",
            AmountType::TotalIntensity => "TOTAL_INTENSITY",
            AmountType::NormalizedTotalIntensity => "NORMALIZED_TOTAL_INTENSITY",
            AmountType::Area => "AREA",
            AmountType::XicArea => "XIC",
            AmountType::Ccs => "CCS",
            AmountType::SpectralCount => "SPC",
        };
        f.write_str(name)
    }
}

impl FromStr for AmountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTENSITY" | "INT" => Ok(Self::Intensity),
            "NORMALIZED_INTENSITY" | "NORM_INTENSITY" => Ok(Self::NormalizedIntensity),
            "TOTAL_INTENSITY" => Ok(Self::TotalIntensity),
            "NORMALIZED_TOTAL_INTENSITY" => Ok(Self::NormalizedTotalIntensity),
            "AREA" => Ok(Self::Area),
            "XIC" => Ok(Self::XicArea),
            "CCS" => Ok(Self::Ccs),
            "SPC" | "SPECTRAL_COUNT" => Ok(Self::SpectralCount),
            _ => Err(format!("Unknown amount type {s}")),
        }
    }
}

/// A scalar quantity measured for one [`QuantCondition`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Amount {
    pub value: f64,
    pub kind: AmountType,
    pub condition: QuantCondition,
    /// Whether the measurement came from a singleton (one-sided) observation
    pub singleton: bool,
}

impl Amount {
    pub fn new(value: f64, kind: AmountType, condition: QuantCondition) -> Self {
        Self {
            value,
            kind,
            condition,
            singleton: false,
        }
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }
}
