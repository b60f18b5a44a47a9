use std::fmt::Display;
use std::str::FromStr;

use indexmap::map::{Iter, Keys};
use indexmap::IndexMap;
use thiserror::Error;

/// The number of channels in an isobaric multiplexing experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlexSize {
    Four,
    Six,
    Ten,
    Eleven,
    Sixteen,
}

/// `(channel name, reporter mass tag)` pairs. The tag is the reporter ion m/z truncated
/// to three decimals, which is how it appears embedded in column headers.
const TMT4_CHANNELS: [(&str, &str); 4] = [
    ("126", "126.127"),
    ("127", "127.124"),
    ("128", "128.134"),
    ("129", "129.131"),
];

const TMT6_CHANNELS: [(&str, &str); 6] = [
    ("126", "126.127"),
    ("127", "127.124"),
    ("128", "128.134"),
    ("129", "129.131"),
    ("130", "130.141"),
    ("131", "131.138"),
];

const TMT10_CHANNELS: [(&str, &str); 10] = [
    ("126", "126.127"),
    ("127N", "127.124"),
    ("127C", "127.131"),
    ("128N", "128.128"),
    ("128C", "128.134"),
    ("129N", "129.131"),
    ("129C", "129.137"),
    ("130N", "130.134"),
    ("130C", "130.141"),
    ("131", "131.138"),
];

const TMT11_CHANNELS: [(&str, &str); 11] = [
    ("126", "126.127"),
    ("127N", "127.124"),
    ("127C", "127.131"),
    ("128N", "128.128"),
    ("128C", "128.134"),
    ("129N", "129.131"),
    ("129C", "129.137"),
    ("130N", "130.134"),
    ("130C", "130.141"),
    ("131N", "131.138"),
    ("131C", "131.144"),
];

const TMT16_CHANNELS: [(&str, &str); 16] = [
    ("126", "126.127"),
    ("127N", "127.124"),
    ("127C", "127.131"),
    ("128N", "128.128"),
    ("128C", "128.134"),
    ("129N", "129.131"),
    ("129C", "129.137"),
    ("130N", "130.134"),
    ("130C", "130.141"),
    ("131N", "131.138"),
    ("131C", "131.144"),
    ("132N", "132.141"),
    ("132C", "132.147"),
    ("133N", "133.144"),
    ("133C", "133.151"),
    ("134N", "134.148"),
];

impl PlexSize {
    pub const ALL: [PlexSize; 5] = [
        PlexSize::Four,
        PlexSize::Six,
        PlexSize::Ten,
        PlexSize::Eleven,
        PlexSize::Sixteen,
    ];

    /// The number of channels
    pub const fn channel_count(&self) -> usize {
        match self {
            PlexSize::Four => 4,
            PlexSize::Six => 6,
            PlexSize::Ten => 10,
            PlexSize::Eleven => 11,
            PlexSize::Sixteen => 16,
        }
    }

    pub fn from_channel_count(count: usize) -> Option<PlexSize> {
        Self::ALL.into_iter().find(|p| p.channel_count() == count)
    }

    pub(crate) fn channel_table(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            PlexSize::Four => &TMT4_CHANNELS,
            PlexSize::Six => &TMT6_CHANNELS,
            PlexSize::Ten => &TMT10_CHANNELS,
            PlexSize::Eleven => &TMT11_CHANNELS,
            PlexSize::Sixteen => &TMT16_CHANNELS,
        }
    }

    /// All the labels of this plex, in channel order
    pub fn labels(&self) -> impl Iterator<Item = QuantificationLabel> + '_ {
        (0..self.channel_count()).map(|i| QuantificationLabel::Tmt(*self, i as u8))
    }

    fn channel_index(&self, name: &str) -> Option<u8> {
        self.channel_table()
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|i| i as u8)
    }
}

impl Display for PlexSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}PLEX", self.channel_count())
    }
}

/**
The physical tag that produced a quantitative signal, an isotope label for metabolic
or chemical labeling, or a reporter channel for isobaric multiplexing.

A [`QuantificationLabel`] is mapped to a logical [`QuantCondition`] per input file
through a [`LabelMap`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QuantificationLabel {
    Light,
    Medium,
    Heavy,
    N14,
    N15,
    O16,
    O18,
    /// An isobaric reporter channel, the index into the plex's channel table
    Tmt(PlexSize, u8),
}

impl QuantificationLabel {
    pub fn is_tmt(&self) -> bool {
        matches!(self, Self::Tmt(_, _))
    }

    pub fn plex(&self) -> Option<PlexSize> {
        match self {
            Self::Tmt(plex, _) => Some(*plex),
            _ => None,
        }
    }

    /// The channel name, e.g. `127N`, for isobaric labels
    pub fn channel_name(&self) -> Option<&'static str> {
        match self {
            Self::Tmt(plex, i) => plex.channel_table().get(*i as usize).map(|(n, _)| *n),
            _ => None,
        }
    }

    /// The reporter mass substring used to find this channel among column headers
    pub fn mass_tag(&self) -> Option<&'static str> {
        match self {
            Self::Tmt(plex, i) => plex.channel_table().get(*i as usize).map(|(_, t)| *t),
            _ => None,
        }
    }

    /// The one-letter abbreviation used for column suffixes of isotope labels
    pub fn abbreviation(&self) -> String {
        match self {
            Self::Light => "L".into(),
            Self::Medium => "M".into(),
            Self::Heavy => "H".into(),
            Self::Tmt(_, _) => self.channel_name().unwrap_or_default().to_string(),
            _ => self.to_string(),
        }
    }
}

impl Display for QuantificationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => f.write_str("LIGHT"),
            Self::Medium => f.write_str("MEDIUM"),
            Self::Heavy => f.write_str("HEAVY"),
            Self::N14 => f.write_str("N14"),
            Self::N15 => f.write_str("N15"),
            Self::O16 => f.write_str("O16"),
            Self::O18 => f.write_str("O18"),
            Self::Tmt(plex, _) => write!(
                f,
                "TMT_{}_{}",
                plex,
                self.channel_name().unwrap_or("?")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown quantification label {0:?}")]
pub struct LabelParsingError(pub String);

impl FromStr for QuantificationLabel {
    type Err = LabelParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "LIGHT" | "L" => return Ok(Self::Light),
            "MEDIUM" | "M" => return Ok(Self::Medium),
            "HEAVY" | "H" => return Ok(Self::Heavy),
            "N14" => return Ok(Self::N14),
            "N15" => return Ok(Self::N15),
            "O16" => return Ok(Self::O16),
            "O18" => return Ok(Self::O18),
            _ => {}
        }
        // TMT_<n>PLEX_<channel>
        let mut parts = upper.splitn(3, '_');
        if parts.next() != Some("TMT") {
            return Err(LabelParsingError(s.to_string()));
        }
        let plex = parts
            .next()
            .and_then(|p| p.strip_suffix("PLEX"))
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(PlexSize::from_channel_count)
            .ok_or_else(|| LabelParsingError(s.to_string()))?;
        let channel = parts
            .next()
            .and_then(|c| plex.channel_index(c))
            .ok_or_else(|| LabelParsingError(s.to_string()))?;
        Ok(Self::Tmt(plex, channel))
    }
}

/// A logical experimental condition, the sample a quantitative signal is attributed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantCondition(String);

impl QuantCondition {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Display for QuantCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QuantCondition {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QuantCondition {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/**
The per-file mapping from physical [`QuantificationLabel`] to logical [`QuantCondition`]
that drives every ratio and amount built from that file.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelMap {
    conditions: IndexMap<QuantificationLabel, QuantCondition>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<C: Into<QuantCondition>>(
        mut self,
        label: QuantificationLabel,
        condition: C,
    ) -> Self {
        self.insert(label, condition);
        self
    }

    pub fn insert<C: Into<QuantCondition>>(
        &mut self,
        label: QuantificationLabel,
        condition: C,
    ) -> Option<QuantCondition> {
        self.conditions.insert(label, condition.into())
    }

    #[inline]
    pub fn condition(&self, label: &QuantificationLabel) -> Option<&QuantCondition> {
        self.conditions.get(label)
    }

    pub fn contains_label(&self, label: &QuantificationLabel) -> bool {
        self.conditions.contains_key(label)
    }

    pub fn labels(&self) -> Keys<'_, QuantificationLabel, QuantCondition> {
        self.conditions.keys()
    }

    /// The isobaric labels, in declaration order
    pub fn tmt_labels(&self) -> impl Iterator<Item = &QuantificationLabel> {
        self.conditions.keys().filter(|l| l.is_tmt())
    }

    /// Find the label a condition was declared for, if it was declared exactly once
    pub fn label_for(&self, condition: &QuantCondition) -> Option<&QuantificationLabel> {
        let mut hits = self.conditions.iter().filter(|(_, c)| *c == condition);
        match (hits.next(), hits.next()) {
            (Some((label, _)), None) => Some(label),
            _ => None,
        }
    }

    pub fn iter(&self) -> Iter<'_, QuantificationLabel, QuantCondition> {
        self.conditions.iter()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl FromIterator<(QuantificationLabel, QuantCondition)> for LabelMap {
    fn from_iter<T: IntoIterator<Item = (QuantificationLabel, QuantCondition)>>(iter: T) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}
