use std::fmt::Display;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::bufread::MultiGzDecoder;

use crate::io::census_chro::is_chro;
use crate::io::census_out::is_census_out;
use crate::io::compression::{is_gzipped, is_gzipped_extension, open_maybe_gzipped};
use crate::io::maxquant::is_maxquant_dir;

/// How many (decompressed) bytes are read from the head of an input to sniff its format
const SNIFF_LENGTH: u64 = 512;

/// The quantitative result formats that [`quantparse`](crate) reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QuantFormat {
    /// The chro XML dialect of fragment ion intensities
    CensusChro,
    /// The tab separated H/P/S report
    CensusOut,
    /// A MaxQuant export directory
    MaxQuant,
    /// The wide replicate comparison format
    Replicates,
    /// One PSM per row in a fixed column order
    Delimited,
}

impl Display for QuantFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QuantFormat::CensusChro => "chro",
            QuantFormat::CensusOut => "census-out",
            QuantFormat::MaxQuant => "maxquant",
            QuantFormat::Replicates => "replicates",
            QuantFormat::Delimited => "delimited",
        };
        f.write_str(name)
    }
}

impl FromStr for QuantFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chro" | "census-chro" | "xml" => Ok(Self::CensusChro),
            "census-out" | "census" | "out" => Ok(Self::CensusOut),
            "maxquant" | "mq" => Ok(Self::MaxQuant),
            "replicates" | "replicate" => Ok(Self::Replicates),
            "delimited" | "tsv" | "csv" => Ok(Self::Delimited),
            _ => Err(format!("Unknown input format {s:?}")),
        }
    }
}

/// Given a path, infer the format from the name alone and whether the file is GZIP
/// compressed. A directory holding `evidence.txt` is a MaxQuant export.
pub fn infer_from_path<P: AsRef<Path>>(path: P) -> (Option<QuantFormat>, bool) {
    let path = path.as_ref();
    if path.is_dir() {
        return if is_maxquant_dir(path) {
            (Some(QuantFormat::MaxQuant), false)
        } else {
            (None, false)
        };
    }
    let (is_gzipped, path) = is_gzipped_extension(path);
    let form = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
            "xml" | "chro" => Some(QuantFormat::CensusChro),
            _ => None,
        });
    (form, is_gzipped)
}

/// Infer the format from the first bytes of an input. Anything not recognized is
/// taken to be the generic delimited format.
pub fn infer_from_bytes(buf: &[u8]) -> QuantFormat {
    if is_chro(buf) {
        QuantFormat::CensusChro
    } else if is_census_out(buf) {
        QuantFormat::CensusOut
    } else if buf.starts_with(b"SLINE\t") {
        QuantFormat::Replicates
    } else {
        QuantFormat::Delimited
    }
}

/// Given a stream of bytes, infer the format and whether the stream is GZIP compressed.
/// The stream is returned to its starting position afterwards.
pub fn infer_from_stream<R: BufRead + Seek>(stream: &mut R) -> io::Result<(QuantFormat, bool)> {
    let current_pos = stream.stream_position()?;
    let is_stream_gzipped = is_gzipped(stream.fill_buf()?);
    let mut buf = Vec::with_capacity(SNIFF_LENGTH as usize);
    if is_stream_gzipped {
        // An incomplete gzip member is an error, so keep what was decoded before it
        let mut decoder = MultiGzDecoder::new(&mut *stream).take(SNIFF_LENGTH);
        let mut chunk = [0u8; 64];
        loop {
            match decoder.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(_) if !buf.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
    } else {
        stream.by_ref().take(SNIFF_LENGTH).read_to_end(&mut buf)?;
    }
    stream.seek(io::SeekFrom::Start(current_pos))?;
    Ok((infer_from_bytes(&buf), is_stream_gzipped))
}

/// Given a path, infer the format and whether the file is GZIP compressed, using the
/// name first and then the content of the file's head
pub fn infer_format<P: Into<PathBuf>>(path: P) -> io::Result<(QuantFormat, bool)> {
    let path: PathBuf = path.into();
    match infer_from_path(&path) {
        (Some(format), is_gzipped) => Ok((format, is_gzipped)),
        (None, _) if path.is_dir() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory without an evidence table", path.display()),
        )),
        (None, _) => {
            let (mut stream, is_gzipped) = open_maybe_gzipped(&path)?;
            let mut buf = Vec::with_capacity(SNIFF_LENGTH as usize);
            stream.as_mut().take(SNIFF_LENGTH).read_to_end(&mut buf)?;
            Ok((infer_from_bytes(&buf), is_gzipped))
        }
    }
}
