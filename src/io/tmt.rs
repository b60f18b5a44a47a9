//! Locate isobaric reporter channel columns among report headers.
use indexmap::IndexMap;
use log::warn;
use thiserror::Error;

use crate::quant::{AmountType, LabelMap, PlexSize, QuantificationLabel};

/// The intensity flavours a channel may be reported in, each under its own header prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntensityKind {
    Raw,
    Normalized,
    Total,
    NormalizedTotal,
}

impl IntensityKind {
    pub const ALL: [IntensityKind; 4] = [
        IntensityKind::Raw,
        IntensityKind::Normalized,
        IntensityKind::Total,
        IntensityKind::NormalizedTotal,
    ];

    pub const fn prefix(&self) -> &'static str {
        match self {
            IntensityKind::Raw => "m/z_",
            IntensityKind::Normalized => "norm_m/z_",
            IntensityKind::Total => "total m/z_",
            IntensityKind::NormalizedTotal => "norm_total m/z_",
        }
    }

    pub const fn amount_type(&self) -> AmountType {
        match self {
            IntensityKind::Raw => AmountType::Intensity,
            IntensityKind::Normalized => AmountType::NormalizedIntensity,
            IntensityKind::Total => AmountType::TotalIntensity,
            IntensityKind::NormalizedTotal => AmountType::NormalizedTotalIntensity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TmtError {
    #[error(
        "Labels were declared for a {declared} experiment but the file has {detected} channels"
    )]
    PlexMismatch {
        declared: PlexSize,
        detected: PlexSize,
    },
    #[error("Labels from more than one plex were declared: {0:?}")]
    MixedPlexLabels(Vec<PlexSize>),
}

/// Count the raw intensity channel headers and map the count to a plex size
pub fn detect_plex<S: AsRef<str>>(headers: &[S]) -> Option<PlexSize> {
    let prefix = IntensityKind::Raw.prefix();
    let count = headers
        .iter()
        .filter(|h| h.as_ref().trim().starts_with(prefix))
        .count();
    PlexSize::from_channel_count(count)
}

/// Find the header holding the `kind` intensity of the `label` channel
pub fn channel_header<'a, S: AsRef<str>>(
    label: &QuantificationLabel,
    headers: &'a [S],
    kind: IntensityKind,
) -> Option<&'a str> {
    let tag = label.mass_tag()?;
    headers
        .iter()
        .map(|h| h.as_ref().trim())
        .find(|h| {
            h.strip_prefix(kind.prefix())
                .is_some_and(|rest| rest.contains(tag))
        })
}

/// The headers found for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelColumns {
    columns: IndexMap<IntensityKind, String>,
}

impl ChannelColumns {
    pub fn get(&self, kind: IntensityKind) -> Option<&str> {
        self.columns.get(&kind).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (IntensityKind, &str)> {
        self.columns.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/**
The reporter channels of a file, resolved once from its header.

Construction checks the declared isobaric labels against the plex inferred from the
header. Labels belonging to a different plex size are a configuration error, while
labels that cover only part of the detected plex are accepted with a warning.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmtChannelResolver {
    plex: PlexSize,
    channels: IndexMap<QuantificationLabel, ChannelColumns>,
}

impl TmtChannelResolver {
    /// Resolve the declared labels' channels, or `None` when the file is not isobaric
    /// or no isobaric labels were declared.
    pub fn resolve<S: AsRef<str>>(
        headers: &[S],
        labels: &LabelMap,
    ) -> Result<Option<Self>, TmtError> {
        let declared: Vec<&QuantificationLabel> = labels.tmt_labels().collect();
        let mut declared_plexes: Vec<PlexSize> =
            declared.iter().filter_map(|l| l.plex()).collect();
        declared_plexes.sort();
        declared_plexes.dedup();
        if declared_plexes.len() > 1 {
            return Err(TmtError::MixedPlexLabels(declared_plexes));
        }

        let detected = match detect_plex(headers) {
            Some(plex) => plex,
            None => {
                if !declared.is_empty() {
                    warn!(
                        "Isobaric labels were declared but no reporter channel columns were found"
                    );
                }
                return Ok(None);
            }
        };
        let declared_plex = match declared_plexes.first() {
            Some(plex) => *plex,
            None => return Ok(None),
        };
        if declared_plex != detected {
            return Err(TmtError::PlexMismatch {
                declared: declared_plex,
                detected,
            });
        }
        if declared.len() < detected.channel_count() {
            warn!(
                "Only {} of the {} channels of a {detected} experiment were declared",
                declared.len(),
                detected.channel_count()
            );
        }

        let mut channels = IndexMap::new();
        for label in declared {
            let mut columns = ChannelColumns::default();
            for kind in IntensityKind::ALL {
                if let Some(header) = channel_header(label, headers, kind) {
                    columns.columns.insert(kind, header.to_string());
                }
            }
            if columns.is_empty() {
                warn!("No column found for channel {label}");
            }
            channels.insert(*label, columns);
        }
        Ok(Some(Self {
            plex: detected,
            channels,
        }))
    }

    pub fn plex(&self) -> PlexSize {
        self.plex
    }

    pub fn columns(&self, label: &QuantificationLabel) -> Option<&ChannelColumns> {
        self.channels.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuantificationLabel, &ChannelColumns)> {
        self.channels.iter()
    }
}
