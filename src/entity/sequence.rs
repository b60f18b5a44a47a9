//! Helpers for annotated peptide sequences such as `R.PEPM(15.9949)TIDEK.A` or
//! `PEPM[+15.9949]TIDEK`.

/// A post-translational modification found in an annotated sequence
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ptm {
    /// 1-based position of the modified residue, 0 for the N-terminus
    pub position: usize,
    pub residue: Option<char>,
    pub mass_shift: Option<f64>,
    pub name: Option<String>,
}

/// Find the index of the bracket closing the one just before `start`, taking nesting
/// into account.
pub(crate) fn end_of_enclosure(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let mut state = 1;
    for (i, ch) in text.as_bytes()[start..].iter().enumerate() {
        if *ch == open {
            state += 1;
        } else if *ch == close {
            state -= 1;
            if state == 0 {
                return Some(start + i);
            }
        }
    }
    None
}

fn closing(open: u8) -> Option<u8> {
    match open {
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        _ => None,
    }
}

/// Remove the flanking residues of a `K.PEPTIDE.R` style sequence, returning the
/// sequence unchanged if it has none.
pub fn strip_flanking(sequence: &str) -> &str {
    let bytes = sequence.as_bytes();
    let n = bytes.len();
    if n > 4 && bytes[1] == b'.' && bytes[n - 2] == b'.' {
        &sequence[2..n - 2]
    } else {
        sequence
    }
}

/// The bare residue sequence: flanking residues and every modification annotation
/// removed, upper-cased.
pub fn clean_sequence(sequence: &str) -> String {
    let core = strip_flanking(sequence.trim().trim_matches('_'));
    let bytes = core.as_bytes();
    let mut out = String::with_capacity(core.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(close) = closing(b) {
            match end_of_enclosure(core, i + 1, b, close) {
                Some(end) => i = end + 1,
                None => break,
            }
            continue;
        }
        if b.is_ascii_alphabetic() {
            out.push(b.to_ascii_uppercase() as char);
        }
        i += 1;
    }
    out
}

/// Extract the modifications annotated in a sequence. Bracketed numbers become mass
/// shifts, other bracketed text and special symbols (`*`, `#`, `@`) become names.
pub fn extract_ptms(sequence: &str) -> Vec<Ptm> {
    let core = strip_flanking(sequence.trim().trim_matches('_'));
    let bytes = core.as_bytes();
    let mut ptms = Vec::new();
    let mut position = 0;
    let mut last_residue = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(close) = closing(b) {
            let end = match end_of_enclosure(core, i + 1, b, close) {
                Some(end) => end,
                None => break,
            };
            let content = core[i + 1..end].trim();
            let mass_shift = content.trim_start_matches('+').parse::<f64>().ok();
            ptms.push(Ptm {
                position,
                residue: last_residue,
                mass_shift,
                name: mass_shift.is_none().then(|| content.to_string()),
            });
            i = end + 1;
            continue;
        }
        if b.is_ascii_alphabetic() {
            position += 1;
            last_residue = Some(b.to_ascii_uppercase() as char);
        } else if matches!(b, b'*' | b'#' | b'@' | b'^' | b'~') {
            ptms.push(Ptm {
                position,
                residue: last_residue,
                mass_shift: None,
                name: Some((b as char).to_string()),
            });
        }
        i += 1;
    }
    ptms
}

/// Whether the sequence carries any modification annotation
pub fn is_modified(sequence: &str) -> bool {
    strip_flanking(sequence)
        .bytes()
        .any(|b| matches!(b, b'(' | b'[' | b'{' | b'*' | b'#' | b'@' | b'^' | b'~'))
}
