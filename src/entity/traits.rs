use crate::quant::{
    average_ratio, AggregationLevel, Amount, AmountType, QuantCondition, QuantRatio, RatioError,
    Score,
};

/// An entity with a canonical string key, unique within its kind
pub trait HasKey {
    fn key(&self) -> &str;
}

/// An entity that carries [`QuantRatio`]s
pub trait HasRatios {
    fn ratios(&self) -> &[QuantRatio];

    fn ratios_mut(&mut self) -> &mut Vec<QuantRatio>;

    /// Add a ratio unless a ratio with the same description and an equal value is
    /// already attached. Returns whether the ratio was added.
    ///
    /// Equality is plain floating point equality, so a legitimately recomputed ratio
    /// that happens to coincide with an existing one is dropped as well, and `NaN`
    /// ratios are never considered duplicates.
    fn add_ratio(&mut self, ratio: QuantRatio) -> bool {
        let duplicate = self
            .ratios()
            .iter()
            .any(|r| r.description() == ratio.description() && r.value() == ratio.value());
        if duplicate {
            false
        } else {
            self.ratios_mut().push(ratio);
            true
        }
    }

    fn ratios_described_as<'a>(&'a self, description: &'a str) -> Vec<&'a QuantRatio> {
        self.ratios()
            .iter()
            .filter(|r| r.description() == description)
            .collect()
    }

    /// All ratios comparing the two conditions, in either orientation
    fn ratios_between<'a>(
        &'a self,
        first: &'a QuantCondition,
        second: &'a QuantCondition,
    ) -> Vec<&'a QuantRatio> {
        self.ratios()
            .iter()
            .filter(|r| r.compares(first, second))
            .collect()
    }

    /// Average the finite log2 ratios between the two conditions
    fn consensus_ratio(
        &self,
        numerator: &QuantCondition,
        denominator: &QuantCondition,
        level: AggregationLevel,
    ) -> Result<QuantRatio, RatioError> {
        average_ratio(self.ratios(), numerator, denominator, level)
    }
}

/// An entity that carries per-condition [`Amount`]s
pub trait HasAmounts {
    fn amounts(&self) -> &[Amount];

    fn amounts_mut(&mut self) -> &mut Vec<Amount>;

    /// Add an amount unless an identical one is already attached
    fn add_amount(&mut self, amount: Amount) -> bool {
        if self.amounts().iter().any(|a| *a == amount) {
            false
        } else {
            self.amounts_mut().push(amount);
            true
        }
    }

    fn amounts_of(&self, kind: AmountType, condition: &QuantCondition) -> Vec<&Amount> {
        self.amounts()
            .iter()
            .filter(|a| a.kind == kind && a.condition == *condition)
            .collect()
    }
}

/// An entity that carries named [`Score`]s
pub trait HasScores {
    fn scores(&self) -> &[Score];

    fn scores_mut(&mut self) -> &mut Vec<Score>;

    /// Set a score, replacing any existing score of the same name
    fn set_score(&mut self, score: Score) {
        let scores = self.scores_mut();
        if let Some(existing) = scores.iter_mut().find(|s| s.name == score.name) {
            *existing = score;
        } else {
            scores.push(score);
        }
    }

    fn score(&self, name: &str) -> Option<&Score> {
        self.scores().iter().find(|s| s.name == name)
    }

    fn score_value(&self, name: &str) -> Option<f64> {
        self.score(name).map(|s| s.value)
    }
}

macro_rules! impl_capabilities {
    ($t:ty, key: $key:ident) => {
        impl $crate::entity::traits::HasKey for $t {
            fn key(&self) -> &str {
                &self.$key
            }
        }

        impl $crate::entity::traits::HasRatios for $t {
            fn ratios(&self) -> &[$crate::quant::QuantRatio] {
                &self.ratios
            }

            fn ratios_mut(&mut self) -> &mut Vec<$crate::quant::QuantRatio> {
                &mut self.ratios
            }
        }

        impl $crate::entity::traits::HasAmounts for $t {
            fn amounts(&self) -> &[$crate::quant::Amount] {
                &self.amounts
            }

            fn amounts_mut(&mut self) -> &mut Vec<$crate::quant::Amount> {
                &mut self.amounts
            }
        }

        impl $crate::entity::traits::HasScores for $t {
            fn scores(&self) -> &[$crate::quant::Score] {
                &self.scores
            }

            fn scores_mut(&mut self) -> &mut Vec<$crate::quant::Score> {
                &mut self.scores
            }
        }
    };
}

pub(crate) use impl_capabilities;
