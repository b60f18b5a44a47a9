use std::fmt::Display;

use thiserror::Error;

use super::label::{QuantCondition, QuantificationLabel};
use super::score::Score;

/// The description given to a ratio produced by [`average_ratio`]
pub const AVERAGE_RATIO_DESCRIPTION: &str = "combination=average";
/// The description given to an averaged ratio that had nothing to average
pub const NO_MEASUREMENTS_DESCRIPTION: &str = "no measurements";
/// The name of the score carried by an averaged ratio
pub const STANDARD_DEVIATION_SCORE: &str = "STDEV";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RatioError {
    #[error("The ratio {description} was not built from {first} and {second}")]
    UnknownLabelPair {
        description: String,
        first: String,
        second: String,
    },
    #[error("A ratio cannot compare {0} to itself")]
    IdenticalLabels(String),
}

/// The level of the entity graph a ratio was measured or aggregated at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregationLevel {
    #[default]
    Psm,
    Peptide,
    Protein,
    ProteinGroup,
}

/// How a ratio's value was computed, which decides its edge-case semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RatioKind {
    #[default]
    Generic,
    /// Built from two ion intensities where an absent ion is meaningful
    Isobaric,
}

/// One side of a ratio, the condition and optionally the physical label measured for it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RatioSide {
    pub condition: QuantCondition,
    pub label: Option<QuantificationLabel>,
}

impl RatioSide {
    pub fn new(condition: QuantCondition, label: Option<QuantificationLabel>) -> Self {
        Self { condition, label }
    }

    pub fn labeled(label: QuantificationLabel, condition: QuantCondition) -> Self {
        Self {
            condition,
            label: Some(label),
        }
    }

    pub fn condition(condition: QuantCondition) -> Self {
        Self {
            condition,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Forward,
    Reverse,
}

/**
A quantitative ratio between two conditions.

The value is stored in its non-log form, which may be `NaN` (not computable),
`+∞` (numerator only) or `0` (denominator only). The log2 form is always derived from
it on demand. Values may be requested in either orientation: asking for the reverse
pair returns the reciprocal (non-log) or the negation (log2).
*/
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantRatio {
    numerator: RatioSide,
    denominator: RatioSide,
    value: f64,
    description: String,
    score: Option<Score>,
    aggregation_level: AggregationLevel,
    kind: RatioKind,
}

fn check_sides(numerator: &RatioSide, denominator: &RatioSide) -> Result<(), RatioError> {
    match (&numerator.label, &denominator.label) {
        (Some(a), Some(b)) if a == b => Err(RatioError::IdenticalLabels(a.to_string())),
        _ => Ok(()),
    }
}

fn reciprocal(value: f64) -> f64 {
    if value.is_nan() {
        f64::NAN
    } else if value == 0.0 {
        f64::INFINITY
    } else if value.is_infinite() {
        0.0
    } else {
        1.0 / value
    }
}

impl QuantRatio {
    /// Build a ratio from a value which is either already a non-log ratio or, when
    /// `is_log_value` is set, a log2 ratio. A missing value resolves to `NaN`.
    pub fn new<S: Into<String>>(
        value: Option<f64>,
        is_log_value: bool,
        numerator: RatioSide,
        denominator: RatioSide,
        description: S,
        aggregation_level: AggregationLevel,
    ) -> Result<Self, RatioError> {
        check_sides(&numerator, &denominator)?;
        let value = match value {
            None => f64::NAN,
            Some(v) if v.is_nan() => f64::NAN,
            Some(v) if is_log_value => v.exp2(),
            Some(v) => v,
        };
        Ok(Self {
            numerator,
            denominator,
            value,
            description: description.into(),
            score: None,
            aggregation_level,
            kind: RatioKind::Generic,
        })
    }

    /// Build a ratio from the two intensities it compares. A `NaN` intensity on either
    /// side makes the ratio `NaN`.
    pub fn from_intensities<S: Into<String>>(
        numerator_intensity: f64,
        denominator_intensity: f64,
        numerator: RatioSide,
        denominator: RatioSide,
        description: S,
        aggregation_level: AggregationLevel,
    ) -> Result<Self, RatioError> {
        let value = if numerator_intensity.is_nan() || denominator_intensity.is_nan() {
            f64::NAN
        } else {
            numerator_intensity / denominator_intensity
        };
        Self::new(
            Some(value),
            false,
            numerator,
            denominator,
            description,
            aggregation_level,
        )
    }

    /**
    Build an isobaric ratio from two ion intensities, where `None`, zero or `NaN` means
    the ion was not detected.

    Unlike [`QuantRatio::from_intensities`], an absent ion does not make the ratio
    uncomputable: present/absent is `+∞` and absent/present is `0`. Only when both ions
    are absent is the ratio `NaN`.
    */
    pub fn isobaric<S: Into<String>>(
        numerator_ion: Option<f64>,
        denominator_ion: Option<f64>,
        numerator: RatioSide,
        denominator: RatioSide,
        description: S,
        aggregation_level: AggregationLevel,
    ) -> Result<Self, RatioError> {
        let detected = |ion: Option<f64>| ion.filter(|v| v.is_finite() && *v > 0.0);
        let value = match (detected(numerator_ion), detected(denominator_ion)) {
            (Some(a), Some(b)) => a / b,
            (Some(_), None) => f64::INFINITY,
            (None, Some(_)) => 0.0,
            (None, None) => f64::NAN,
        };
        let mut ratio = Self::new(
            Some(value),
            false,
            numerator,
            denominator,
            description,
            aggregation_level,
        )?;
        ratio.kind = RatioKind::Isobaric;
        Ok(ratio)
    }

    pub fn with_score(mut self, score: Score) -> Self {
        self.score = Some(score);
        self
    }

    pub fn set_score(&mut self, score: Option<Score>) {
        self.score = score;
    }

    pub fn numerator(&self) -> &RatioSide {
        &self.numerator
    }

    pub fn denominator(&self) -> &RatioSide {
        &self.denominator
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn aggregation_level(&self) -> AggregationLevel {
        self.aggregation_level
    }

    pub fn kind(&self) -> RatioKind {
        self.kind
    }

    /// The non-log value in the orientation the ratio was built with
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The log2 value in the orientation the ratio was built with
    #[inline]
    pub fn log2(&self) -> f64 {
        if self.value.is_nan() || self.value < 0.0 {
            f64::NAN
        } else {
            self.value.log2()
        }
    }

    /// Whether the log2 value is a usable number, neither `NaN` nor infinite
    pub fn is_finite(&self) -> bool {
        self.log2().is_finite()
    }

    fn label_orientation(
        &self,
        first: &QuantificationLabel,
        second: &QuantificationLabel,
    ) -> Result<Orientation, RatioError> {
        match (&self.numerator.label, &self.denominator.label) {
            (Some(n), Some(d)) if n == first && d == second => Ok(Orientation::Forward),
            (Some(n), Some(d)) if n == second && d == first => Ok(Orientation::Reverse),
            _ => Err(RatioError::UnknownLabelPair {
                description: self.description.clone(),
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    fn condition_orientation(
        &self,
        first: &QuantCondition,
        second: &QuantCondition,
    ) -> Result<Orientation, RatioError> {
        if self.numerator.condition == *first && self.denominator.condition == *second {
            Ok(Orientation::Forward)
        } else if self.numerator.condition == *second && self.denominator.condition == *first {
            Ok(Orientation::Reverse)
        } else {
            Err(RatioError::UnknownLabelPair {
                description: self.description.clone(),
                first: first.to_string(),
                second: second.to_string(),
            })
        }
    }

    fn oriented_log2(&self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Forward => self.log2(),
            Orientation::Reverse => -self.log2(),
        }
    }

    fn oriented_value(&self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Forward => self.value,
            Orientation::Reverse => reciprocal(self.value),
        }
    }

    /// The log2 ratio of `first` over `second`
    pub fn log2_ratio(
        &self,
        first: &QuantificationLabel,
        second: &QuantificationLabel,
    ) -> Result<f64, RatioError> {
        self.label_orientation(first, second)
            .map(|o| self.oriented_log2(o))
    }

    /// The non-log ratio of `first` over `second`
    pub fn non_log_ratio(
        &self,
        first: &QuantificationLabel,
        second: &QuantificationLabel,
    ) -> Result<f64, RatioError> {
        self.label_orientation(first, second)
            .map(|o| self.oriented_value(o))
    }

    pub fn log2_ratio_by_condition(
        &self,
        first: &QuantCondition,
        second: &QuantCondition,
    ) -> Result<f64, RatioError> {
        self.condition_orientation(first, second)
            .map(|o| self.oriented_log2(o))
    }

    pub fn non_log_ratio_by_condition(
        &self,
        first: &QuantCondition,
        second: &QuantCondition,
    ) -> Result<f64, RatioError> {
        self.condition_orientation(first, second)
            .map(|o| self.oriented_value(o))
    }

    /// Whether this ratio compares the two conditions, in either orientation
    pub fn compares(&self, first: &QuantCondition, second: &QuantCondition) -> bool {
        self.condition_orientation(first, second).is_ok()
    }
}

impl Display for QuantRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{}={}",
            self.description, self.numerator.condition, self.denominator.condition, self.value
        )
    }
}

/**
Average every finite log2 value among `ratios` that compares `numerator` to
`denominator`, in either orientation. Members comparing any other pair are skipped.

The result carries the standard deviation of the log2 values as its score. When nothing
qualifies, the result is a `NaN` ratio described as [`NO_MEASUREMENTS_DESCRIPTION`].
*/
pub fn average_ratio<'a, I: IntoIterator<Item = &'a QuantRatio>>(
    ratios: I,
    numerator: &QuantCondition,
    denominator: &QuantCondition,
    aggregation_level: AggregationLevel,
) -> Result<QuantRatio, RatioError> {
    let values: Vec<f64> = ratios
        .into_iter()
        .filter_map(|r| r.log2_ratio_by_condition(numerator, denominator).ok())
        .filter(|v| v.is_finite())
        .collect();

    let num_side = RatioSide::condition(numerator.clone());
    let den_side = RatioSide::condition(denominator.clone());

    if values.is_empty() {
        return QuantRatio::new(
            None,
            true,
            num_side,
            den_side,
            NO_MEASUREMENTS_DESCRIPTION,
            aggregation_level,
        );
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let stdev = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    Ok(QuantRatio::new(
        Some(mean),
        true,
        num_side,
        den_side,
        AVERAGE_RATIO_DESCRIPTION,
        aggregation_level,
    )?
    .with_score(Score::new(STANDARD_DEVIATION_SCORE, stdev).with_kind(AVERAGE_RATIO_DESCRIPTION)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sides() -> (RatioSide, RatioSide) {
        (
            RatioSide::labeled(QuantificationLabel::Light, "control".into()),
            RatioSide::labeled(QuantificationLabel::Heavy, "treated".into()),
        )
    }

    #[test]
    fn test_symmetry() {
        let (l, h) = sides();
        for value in [0.25, 1.0, 3.5, 1e-6, 1e6] {
            let ratio = QuantRatio::new(
                Some(value),
                false,
                l.clone(),
                h.clone(),
                "RATIO",
                AggregationLevel::Psm,
            )
            .unwrap();
            let light = QuantificationLabel::Light;
            let heavy = QuantificationLabel::Heavy;
            let fwd = ratio.log2_ratio(&light, &heavy).unwrap();
            let rev = ratio.log2_ratio(&heavy, &light).unwrap();
            assert!((fwd + rev).abs() < 1e-12);
            let fwd = ratio.non_log_ratio(&light, &heavy).unwrap();
            let rev = ratio.non_log_ratio(&heavy, &light).unwrap();
            assert!((fwd - 1.0 / rev).abs() < 1e-9 * fwd.max(1.0));

            let control = QuantCondition::new("control");
            let treated = QuantCondition::new("treated");
            assert_eq!(
                ratio.log2_ratio_by_condition(&control, &treated).unwrap(),
                -ratio.log2_ratio_by_condition(&treated, &control).unwrap()
            );
        }
    }

    #[test]
    fn test_log_construction() {
        let (l, h) = sides();
        let ratio =
            QuantRatio::new(Some(2.0), true, l.clone(), h.clone(), "LOG", AggregationLevel::Psm)
                .unwrap();
        assert!((ratio.value() - 4.0).abs() < 1e-12);
        assert!((ratio.log2() - 2.0).abs() < 1e-12);

        let ratio =
            QuantRatio::new(None, true, l.clone(), h.clone(), "LOG", AggregationLevel::Psm)
                .unwrap();
        assert!(ratio.value().is_nan());
        assert!(ratio.log2().is_nan());

        let ratio =
            QuantRatio::from_intensities(f64::NAN, 10.0, l, h, "INT", AggregationLevel::Psm)
                .unwrap();
        assert!(ratio.value().is_nan());
        assert!(ratio.log2().is_nan());
    }

    #[test]
    fn test_unknown_pair() {
        let (l, h) = sides();
        let ratio =
            QuantRatio::new(Some(2.0), false, l, h, "RATIO", AggregationLevel::Psm).unwrap();
        let err = ratio
            .log2_ratio(&QuantificationLabel::Light, &QuantificationLabel::Medium)
            .unwrap_err();
        assert!(matches!(err, RatioError::UnknownLabelPair { .. }));
        assert!(ratio
            .non_log_ratio_by_condition(&"control".into(), &"other".into())
            .is_err());
    }

    #[test]
    fn test_identical_labels() {
        let a = RatioSide::labeled(QuantificationLabel::Heavy, "a".into());
        let b = RatioSide::labeled(QuantificationLabel::Heavy, "b".into());
        assert!(matches!(
            QuantRatio::new(Some(1.0), false, a, b, "RATIO", AggregationLevel::Psm),
            Err(RatioError::IdenticalLabels(_))
        ));
    }

    #[test]
    fn test_isobaric_absence() {
        const PSM: AggregationLevel = AggregationLevel::Psm;
        let (l, h) = sides();
        let light = QuantificationLabel::Light;
        let heavy = QuantificationLabel::Heavy;

        let present_absent =
            QuantRatio::isobaric(Some(100.0), None, l.clone(), h.clone(), "y3", PSM).unwrap();
        assert_eq!(present_absent.non_log_ratio(&light, &heavy).unwrap(), f64::INFINITY);
        assert_eq!(present_absent.log2_ratio(&light, &heavy).unwrap(), f64::INFINITY);

        let absent_present =
            QuantRatio::isobaric(Some(0.0), Some(100.0), l.clone(), h.clone(), "y3", PSM).unwrap();
        assert_eq!(absent_present.non_log_ratio(&light, &heavy).unwrap(), 0.0);
        assert_eq!(absent_present.log2_ratio(&light, &heavy).unwrap(), f64::NEG_INFINITY);

        let neither = QuantRatio::isobaric(None, None, l.clone(), h.clone(), "y3", PSM).unwrap();
        assert!(neither.value().is_nan());

        // a generic ratio with a missing side is not computable
        let generic = QuantRatio::from_intensities(100.0, f64::NAN, l, h, "y3", PSM).unwrap();
        assert!(generic.value().is_nan());
    }

    #[test]
    fn test_average() {
        let control = QuantCondition::new("control");
        let treated = QuantCondition::new("treated");
        let other = QuantCondition::new("other");
        let mk = |num: &QuantCondition, den: &QuantCondition, v: f64| {
            QuantRatio::new(
                Some(v),
                true,
                RatioSide::condition(num.clone()),
                RatioSide::condition(den.clone()),
                "RATIO",
                AggregationLevel::Psm,
            )
            .unwrap()
        };
        let ratios = vec![
            mk(&control, &treated, 1.0),
            mk(&treated, &control, -3.0),
            mk(&control, &other, 10.0),
            mk(&control, &treated, f64::INFINITY),
        ];
        let avg = average_ratio(&ratios, &control, &treated, AggregationLevel::Peptide).unwrap();
        assert!((avg.log2() - 2.0).abs() < 1e-12);
        assert_eq!(avg.description(), AVERAGE_RATIO_DESCRIPTION);
        let stdev = avg.score().unwrap().value;
        assert!((stdev - 2.0f64.sqrt()).abs() < 1e-12);

        let empty =
            average_ratio(&ratios[2..], &control, &treated, AggregationLevel::Peptide).unwrap();
        assert!(empty.value().is_nan());
        assert_eq!(empty.description(), NO_MEASUREMENTS_DESCRIPTION);
    }
}
