use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::info;
use regex::Regex;

use quantparse::{
    InputFile, LabelMap, QuantCondition, QuantFormat, QuantParser, QuantificationLabel,
    RatioDescriptor,
};

fn parse_label(value: &str) -> Result<(QuantificationLabel, QuantCondition), String> {
    let (label, condition) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected LABEL=CONDITION, found {value}"))?;
    let label: QuantificationLabel = label.parse().map_err(|e| format!("{e}"))?;
    if condition.trim().is_empty() {
        return Err(format!("No condition given for {label}"));
    }
    Ok((label, QuantCondition::new(condition.trim())))
}

fn parse_separator(value: &str) -> Result<char, String> {
    match value {
        "\\t" | "tab" => Ok('\t'),
        _ => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("A separator is a single character, found {value:?}")),
            }
        }
    }
}

/// Read quantitative proteomics results into one protein, peptide and PSM graph
#[derive(Parser, Debug)]
#[command(name = "quantparse", author, version, about, long_about = None)]
struct Cli {
    /// Input files, or MaxQuant export directories
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// The input format, inferred from each input when absent
    #[arg(short, long)]
    format: Option<QuantFormat>,

    /// Map a label to an experimental condition, e.g. HEAVY=treated
    #[arg(short, long = "label", value_name = "LABEL=CONDITION", value_parser = parse_label)]
    labels: Vec<(QuantificationLabel, QuantCondition)>,

    /// A ratio to read, e.g. LIGHT/HEAVY. Defaults to the first two labels.
    #[arg(short, long = "ratio", value_name = "NUM/DEN")]
    ratios: Vec<RatioDescriptor>,

    /// Regular expression matching decoy protein accessions
    #[arg(short, long, value_name = "REGEX")]
    decoy: Option<Regex>,

    /// The column separator of delimited inputs
    #[arg(short, long, value_parser = parse_separator)]
    separator: Option<char>,

    /// Record peptides missing from the sequence index instead of failing
    #[arg(long)]
    ignore_missing_peptides: bool,

    /// Skip malformed records instead of failing the input
    #[arg(long)]
    skip_malformed: bool,

    /// Keep only the most confident spectrum of each chromatographic peak
    #[arg(long)]
    one_spectrum_per_peak: bool,

    /// Write the parsed graph as JSON to this path
    #[cfg(feature = "serde")]
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let labels: LabelMap = cli.labels.iter().cloned().collect();
    let inputs = cli.inputs.iter().map(|path| {
        let mut input = InputFile::new(path)
            .labels(labels.clone())
            .descriptors(cli.ratios.clone());
        if let Some(format) = cli.format {
            input = input.format(format);
        }
        if let Some(separator) = cli.separator {
            input = input.separator(separator);
        }
        input
    });

    let mut builder = QuantParser::builder()
        .inputs(inputs)
        .ignore_missing_peptides(cli.ignore_missing_peptides)
        .skip_malformed_records(cli.skip_malformed)
        .one_spectrum_per_chromatographic_peak(cli.one_spectrum_per_peak);
    if let Some(decoy) = cli.decoy.clone() {
        builder = builder.decoy_pattern(decoy);
    }
    let mut parser = builder.build();

    let graph = parser.process()?;
    info!("Finished reading {} inputs", cli.inputs.len());
    println!("Proteins: {}", graph.proteins.len());
    println!("Peptides: {}", graph.peptides.len());
    println!("PSMs: {}", graph.psms.len());
    println!("Taxonomies: {}", graph.taxonomies.len());
    println!("Missing peptides: {}", graph.missing_peptides.len());

    #[cfg(feature = "serde")]
    if let Some(path) = cli.json.as_ref() {
        let handle = std::io::BufWriter::new(std::fs::File::create(path)?);
        graph.write_json(handle)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}
