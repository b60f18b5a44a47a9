use super::sequence::{clean_sequence, strip_flanking};

/**
The equivalence policy that decides when two observations are the same entity.

Peptides are keyed by their clean sequence unless modified forms are kept apart, in
which case the annotated sequence (without flanking residues) is used, and the charge
state is appended when peptides are charge-sensitive. PSMs are always keyed by raw
file, scan number and annotated sequence, with the charge appended when PSMs are
charge-sensitive.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyPolicy {
    pub distinguish_modified_peptides: bool,
    pub charge_sensitive_peptides: bool,
    pub charge_sensitive_psms: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            distinguish_modified_peptides: false,
            charge_sensitive_peptides: false,
            charge_sensitive_psms: true,
        }
    }
}

impl KeyPolicy {
    pub fn peptide_key(&self, full_sequence: &str, charge: Option<i32>) -> String {
        let mut key = if self.distinguish_modified_peptides {
            strip_flanking(full_sequence.trim()).to_string()
        } else {
            clean_sequence(full_sequence)
        };
        if self.charge_sensitive_peptides {
            if let Some(z) = charge {
                key.push('-');
                key.push_str(&z.to_string());
            }
        }
        key
    }

    pub fn psm_key(
        &self,
        raw_file: &str,
        scan_number: &str,
        full_sequence: &str,
        charge: Option<i32>,
    ) -> String {
        let mut key = format!(
            "{}-{}-{}",
            raw_file.trim(),
            scan_number.trim(),
            strip_flanking(full_sequence.trim())
        );
        if self.charge_sensitive_psms {
            if let Some(z) = charge {
                key.push('-');
                key.push_str(&z.to_string());
            }
        }
        key
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_peptide_keys() {
        let policy = KeyPolicy::default();
        assert_eq!(policy.peptide_key("R.PEPM(15.99)TIDEK.A", Some(2)), "PEPMTIDEK");
        let policy = KeyPolicy {
            distinguish_modified_peptides: true,
            charge_sensitive_peptides: true,
            ..Default::default()
        };
        assert_eq!(policy.peptide_key("R.PEPM(15.99)TIDEK.A", Some(2)), "PEPM(15.99)TIDEK-2");
        assert_eq!(policy.peptide_key("PEPTIDEK", None), "PEPTIDEK");
    }

    #[test]
    fn test_psm_keys() {
        let policy = KeyPolicy::default();
        assert_eq!(policy.psm_key("run1", "1234", "K.PEPTIDEK.A", Some(3)), "run1-1234-PEPTIDEK-3");
        let policy = KeyPolicy {
            charge_sensitive_psms: false,
            ..Default::default()
        };
        assert_eq!(policy.psm_key("run1", "1234", "PEPTIDEK", Some(3)), "run1-1234-PEPTIDEK");
    }
}
