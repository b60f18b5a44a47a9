//! Read the tab separated "out" reports written by the Census quantification tool.
mod reader;

pub use reader::{
    CensusOutParser, CensusOutParserState, CensusSection, ProteinEntry, PSM_SCORE_COLUMNS,
};

/// Whether the buffer looks like the start of a census out report
pub fn is_census_out(buf: &[u8]) -> bool {
    buf.starts_with(b"H\t")
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, BufReader};

    use regex::Regex;

    use super::*;
    use crate::entity::{HasAmounts, HasRatios, HasScores};
    use crate::io::traits::{FormatParser, ParseContext, QuantParserError};
    use crate::quant::{
        AmountType, LabelMap, PlexSize, QuantCondition, QuantificationLabel, RatioDescriptor,
        RatioKind,
    };
    use crate::store::IdentityStore;

    fn light_heavy() -> LabelMap {
        LabelMap::new()
            .with(QuantificationLabel::Light, "control")
            .with(QuantificationLabel::Heavy, "treated")
    }

    fn context() -> ParseContext {
        ParseContext::new(IdentityStore::new())
            .with_labels(light_heavy())
            .with_decoy_pattern(Regex::new("^REV_").unwrap())
            .with_source_name("census_small_out.txt")
    }

    #[test_log::test]
    fn test_read_file() -> io::Result<()> {
        let ctx = context();
        let handle = BufReader::new(fs::File::open("./test/data/census_small_out.txt")?);
        let mut parser = CensusOutParser::new();
        let result = parser.parse(handle, &ctx)?;
        assert_eq!(parser.state, CensusOutParserState::Done);

        assert_eq!(result.records, 5);
        assert_eq!(result.decoys_rejected, 1);
        assert_eq!(result.proteins.len(), 2);
        assert_eq!(result.psms.len(), 5);
        assert_eq!(result.peptides.len(), 4);

        let graph = ctx.store.read();
        assert!(!graph.proteins.contains("REV_P12345"));
        assert!(!graph.proteins.contains("P00001"));

        let albumin = graph.proteins.get("P02768").unwrap();
        assert!(albumin.taxonomies.contains("Homo sapiens"));
        assert_eq!(albumin.psms.len(), 3);
        let average = albumin.ratios_described_as("AVERAGE_RATIO");
        assert_eq!(average.len(), 1);
        assert_eq!(average[0].value(), 1.8);
        assert_eq!(average[0].score().unwrap().value, 0.2);

        let psm = graph.psms.get("H_run1-1201-LVNEVTEFAK-2").unwrap();
        assert_eq!(psm.peptide.as_deref(), Some("LVNEVTEFAK"));
        let ratio = psm.ratios_described_as("RATIO")[0];
        assert_eq!(ratio.value(), 1.9);
        assert_eq!(ratio.score().unwrap().name, "REGRESSION_FACTOR");
        assert_eq!(ratio.numerator().condition.name(), "control");
        assert_eq!(psm.score_value("XCorr"), Some(3.2));
        let control = QuantCondition::new("control");
        assert_eq!(psm.amounts_of(AmountType::Intensity, &control)[0].value, 1000.0);

        let singleton = graph.psms.get("L_run1-1403-AEFAEVSK-2").unwrap();
        assert!(singleton.singleton);
        assert!(singleton.amounts().iter().all(|a| a.singleton));

        let shared = graph.peptides.get("LVNEVTEFAK").unwrap();
        assert_eq!(shared.proteins.len(), 2);
        assert_eq!(shared.psms.len(), 2);

        assert!(graph.psms.contains("H_run1-1702-QTALVELLK-2"));
        Ok(())
    }

    #[test]
    fn test_orphans_and_unknown_headers() -> io::Result<()> {
        let text = "H\tPLINE\tLOCUS\tDESCRIPTION\n\
                    H\tSLINE\tUNIQUE\tSEQUENCE\tFILE_NAME\tSCAN\tCS\n\
                    S\t\tPEPTIDEK\trun\t1\t2\n\
                    P\tP1\tfirst\n\
                    S\t\tPEPTIDER\trun\t2\t2\n";
        let ctx = context();
        let result = CensusOutParser::new().parse(text.as_bytes(), &ctx)?;
        assert_eq!(result.records, 1);
        assert!(ctx.store.read().psms.contains("run-2-PEPTIDER-2"));
        assert_eq!(ctx.store.psm_count(), 1);
        Ok(())
    }

    #[test]
    fn test_malformed_policy() {
        let text = "H\tSLINE\tUNIQUE\tSEQUENCE\tFILE_NAME\tSCAN\tCS\n\
                    H\tPLINE\tLOCUS\tDESCRIPTION\n\
                    P\tP1\tfirst\n\
                    S\tPEPTIDEK\trun\t1\n\
                    S\t\tPEPTIDER\trun\t2\t2\n";
        let ctx = context();
        let err = CensusOutParser::new().parse(text.as_bytes(), &ctx).unwrap_err();
        match err {
            QuantParserError::MalformedRecord { line_number, .. } => assert_eq!(line_number, 4),
            other => panic!("Unexpected error {other}"),
        }

        let mut ctx = context();
        ctx.skip_malformed_records = true;
        let result = CensusOutParser::new().parse(text.as_bytes(), &ctx).unwrap();
        assert_eq!(result.records, 1);
        assert_eq!(result.malformed_skipped, 1);
    }

    #[test]
    fn test_triple_labels() {
        let text = "H\tPLINE\tLOCUS\tAVERAGE_RATIO_L_M\tAVERAGE_RATIO_L_H\tAVERAGE_RATIO_M_H\n\
                    H\tSLINE\tUNIQUE\tSEQUENCE\tAREA_RATIO_L_M\tAREA_RATIO_L_H\tAREA_RATIO_M_H\tFILE_NAME\tSCAN\tCS\n\
                    P\tP1\t1.0\t2.0\t2.0\n\
                    S\t\tPEPTIDEK\t1.5\t3.0\tNA\trun\t1\t2\n";
        let ctx = context()
            .with_labels(
                light_heavy().with(QuantificationLabel::Medium, "intermediate"),
            )
            .with_descriptors(RatioDescriptor::light_medium_heavy());
        CensusOutParser::new().parse(text.as_bytes(), &ctx).unwrap();
        let graph = ctx.store.read();
        let psm = graph.psms.get("run-1-PEPTIDEK-2").unwrap();
        assert_eq!(psm.ratios().len(), 2);
        let ratio = psm.ratios_described_as("AREA_RATIO_L_H")[0];
        assert_eq!(ratio.numerator().label, Some(QuantificationLabel::Light));
        assert_eq!(ratio.denominator().label, Some(QuantificationLabel::Heavy));
        assert_eq!(ratio.value(), 3.0);
        assert_eq!(graph.proteins.get("P1").unwrap().ratios().len(), 3);
    }

    #[test]
    fn test_isobaric_channels() {
        let plex = PlexSize::Six;
        let mut header = vec!["H", "SLINE", "UNIQUE", "SEQUENCE", "FILE_NAME", "SCAN", "CS"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let mut values = vec!["S", "", "PEPTIDEK", "run", "1", "2"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for (i, label) in plex.labels().enumerate() {
            header.push(format!("m/z_{}", label.mass_tag().unwrap()));
            values.push(if i == 1 { "0".to_string() } else { format!("{}", 100 * (i + 1)) });
        }
        let text = format!(
            "H\tPLINE\tLOCUS\tDESCRIPTION\n{}\nP\tP1\tfirst\n{}\n",
            header.join("\t"),
            values.join("\t")
        );
        let channel = |i| QuantificationLabel::Tmt(plex, i);
        let ctx = context()
            .with_labels(
                LabelMap::new()
                    .with(channel(0), "a")
                    .with(channel(1), "b")
                    .with(channel(2), "c"),
            )
            .with_descriptors(vec![
                RatioDescriptor::new(channel(0), channel(1)),
                RatioDescriptor::new(channel(2), channel(0)),
            ]);
        let mut parser = CensusOutParser::new();
        parser.parse(text.as_bytes(), &ctx).unwrap();
        assert_eq!(parser.tmt_channels().unwrap().plex(), plex);

        let graph = ctx.store.read();
        let psm = graph.psms.get("run-1-PEPTIDEK-2").unwrap();
        assert_eq!(psm.amounts().len(), 3);
        assert!(psm.ratios().iter().all(|r| r.kind() == RatioKind::Isobaric));
        assert_eq!(psm.ratios()[0].value(), f64::INFINITY);
        assert_eq!(psm.ratios()[1].value(), 3.0);
    }

    #[test]
    fn test_sniff() {
        assert!(is_census_out(b"H\tCensus version"));
        assert!(!is_census_out(b"<?xml version=\"1.0\"?>"));
    }
}
