use std::fmt::Display;
use std::str::FromStr;

use super::label::{LabelMap, QuantificationLabel};
use super::ratio::RatioSide;

/**
Describes one ratio that a tabular source reports: which label is the numerator, which
is the denominator, and which suffix distinguishes its columns from those of other
ratios in the same file.

A simple two-label experiment has a single descriptor with an empty suffix, so its
columns are `RATIO`, `AREA_RATIO` and so on. A light/medium/heavy experiment has three,
see [`RatioDescriptor::light_medium_heavy`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RatioDescriptor {
    pub numerator: QuantificationLabel,
    pub denominator: QuantificationLabel,
    pub column_suffix: String,
}

impl RatioDescriptor {
    pub fn new(numerator: QuantificationLabel, denominator: QuantificationLabel) -> Self {
        Self {
            numerator,
            denominator,
            column_suffix: String::new(),
        }
    }

    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.column_suffix = suffix.into();
        self
    }

    /// The three pairwise ratios of a triple-labeled experiment
    pub fn light_medium_heavy() -> Vec<RatioDescriptor> {
        use QuantificationLabel::*;
        [(Light, Medium), (Light, Heavy), (Medium, Heavy)]
            .into_iter()
            .map(|(num, den)| {
                let suffix = format!("_{}_{}", num.abbreviation(), den.abbreviation());
                Self::new(num, den).with_suffix(suffix)
            })
            .collect()
    }

    /// The column name for a ratio-valued column, e.g. `AREA_RATIO_L_H`
    pub fn column(&self, base: &str) -> String {
        format!("{base}{}", self.column_suffix)
    }

    /// Resolve the two labels to their conditions, or report the first label that has
    /// no condition in `labels`
    pub fn resolve(
        &self,
        labels: &LabelMap,
    ) -> Result<(RatioSide, RatioSide), QuantificationLabel> {
        let num = labels.condition(&self.numerator).ok_or(self.numerator)?;
        let den = labels.condition(&self.denominator).ok_or(self.denominator)?;
        Ok((
            RatioSide::labeled(self.numerator, num.clone()),
            RatioSide::labeled(self.denominator, den.clone()),
        ))
    }

    pub fn is_isobaric(&self) -> bool {
        self.numerator.is_tmt() && self.denominator.is_tmt()
    }
}

impl Display for RatioDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for RatioDescriptor {
    type Err = String;

    /// Parses `NUMERATOR/DENOMINATOR`, optionally followed by `:SUFFIX`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pair, suffix) = match s.split_once(':') {
            Some((pair, suffix)) => (pair, suffix),
            None => (s, ""),
        };
        let (num, den) = pair
            .split_once('/')
            .ok_or_else(|| format!("Expected NUMERATOR/DENOMINATOR, found {s}"))?;
        let num: QuantificationLabel = num.parse().map_err(|e| format!("{e}"))?;
        let den: QuantificationLabel = den.parse().map_err(|e| format!("{e}"))?;
        Ok(Self::new(num, den).with_suffix(suffix))
    }
}
