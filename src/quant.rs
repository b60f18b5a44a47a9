//! Value types and algebra for quantitative measurements: ratios between conditions,
//! per-condition amounts, and the scores attached to them.
pub mod amount;
pub mod descriptor;
pub mod label;
pub mod ratio;
pub mod score;

pub use amount::{Amount, AmountType};
pub use descriptor::RatioDescriptor;
pub use label::{LabelMap, LabelParsingError, PlexSize, QuantCondition, QuantificationLabel};
pub use ratio::{
    average_ratio, AggregationLevel, QuantRatio, RatioError, RatioKind, RatioSide,
    AVERAGE_RATIO_DESCRIPTION, NO_MEASUREMENTS_DESCRIPTION, STANDARD_DEVIATION_SCORE,
};
pub use score::Score;

/// Parse an optional numeric field. Empty text, `NA`, `N/A` and unparseable text all
/// yield `None` so that the field is omitted rather than failing the record.
pub fn parse_optional_f64(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("na") || value.eq_ignore_ascii_case("n/a") {
        return None;
    }
    match value.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        _ => value.parse::<f64>().ok(),
    }
}
