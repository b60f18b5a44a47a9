//! Read the XML "chro" documents of fragment ion intensities written by Census.
mod reader;

pub use reader::{ChroParser, ChroParserState, IonSeries, CHRO_VERSION};

/// Whether the buffer looks like the start of a chro document
pub fn is_chro(buf: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&buf[..buf.len().min(512)]);
    head.trim_start().starts_with('<') && head.contains("<chro")
}
