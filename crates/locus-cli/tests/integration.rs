use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use locus_cli::input::Input;
use locus_cli::runner::Runner;
use locus_core::ion_series::mz;
use locus_core::mass::MassTool;
use locus_core::peptide::{Peptide, Peptide0};
use locus_core::task::Summary;

const PHOSPHO: f32 = 79.96633;

fn truth() -> Peptide {
    let mut p = Peptide::new(
        Arc::new(Peptide0::new("PEPTSDEK", false)),
        Arc::new(MassTool::new(Default::default(), 2)),
        0.0,
        1,
    );
    p.set_modifications([(4, PHOSPHO)].into_iter().collect());
    p
}

/// Scan 1 carries the full b/y ladder of the phosphopeptide, scan 2 only a
/// few of its peaks
fn write_mgf(path: &Path) -> anyhow::Result<()> {
    let truth = truth();
    let ions = truth.ion_matrix();
    let precursor = mz(truth.theoretical_mass(), 2);

    let mut mgf = String::new();
    for (scan, take) in [(1, usize::MAX), (2, 3)] {
        writeln!(mgf, "BEGIN IONS")?;
        writeln!(mgf, "TITLE=fixture.{}.{}.2", scan, scan)?;
        writeln!(mgf, "PEPMASS={} 1000.0", precursor)?;
        writeln!(mgf, "CHARGE=2+")?;
        writeln!(mgf, "SCANS={}", scan)?;
        for &m in ions.b.iter().chain(ions.y.iter()).take(take) {
            writeln!(mgf, "{} 100.0", mz(m, 1))?;
        }
        writeln!(mgf, "END IONS")?;
    }
    std::fs::write(path, mgf)?;
    Ok(())
}

fn write_candidates(path: &Path) -> anyhow::Result<()> {
    let hits = serde_json::json!({
        "ptm_free": [{ "peptide": 0, "cross_corr": 0.4, "rank": 2 }],
        "ptm_only": [{ "peptide": 0, "cross_corr": 0.9, "rank": 1, "modifications": [[0, PHOSPHO]] }]
    });
    let mut one = hits.clone();
    one["scan"] = 1.into();
    let mut two = hits;
    two["scan"] = 2.into();

    let file = serde_json::json!({
        "peptides": [{ "sequence": "PEPTSDEK", "proteins": ["sp|P00001|TEST"], "left_flank": "K", "right_flank": "A" }],
        "spectra": [one, two]
    });
    std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    Ok(())
}

fn workspace(name: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("locus-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = workspace("integration")?;
    let mgf = dir.join("fixture.mgf");
    let candidates = dir.join("candidates.json");
    let output = dir.join("out");
    write_mgf(&mgf)?;
    write_candidates(&candidates)?;

    let parameters = serde_json::json!({
        "precursor_tol": { "ppm": [-10.0, 10.0] },
        "fragment_tol": 0.02,
        "min_fragment_mz": 50.0,
        "variable_mods": { "STY": PHOSPHO },
        "mgf_path": mgf,
        "candidates_path": candidates,
        "output_directory": output,
    });
    let input: Input = serde_json::from_value(parameters)?;
    let runner = Runner::new(input.build()?)?;
    let summary = runner.run()?;
    assert_eq!(
        summary,
        Summary {
            identified: 1,
            unidentified: 1,
            failed: 0,
        }
    );

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(output.join("results.locus.tsv"))?;
    let headers = rdr.headers()?.clone();
    let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 1);

    let field = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .map(|ix| rows[0][ix].to_string())
    };
    assert_eq!(field("scannr").as_deref(), Some("1"));
    assert_eq!(field("title").as_deref(), Some("fixture.1.1.2"));
    assert_eq!(field("peptide").as_deref(), Some("PEPTS[+79.96633]DEK"));
    assert_eq!(field("proteins").as_deref(), Some("sp|P00001|TEST"));
    assert_eq!(field("left_flank").as_deref(), Some("K"));
    assert_eq!(field("label").as_deref(), Some("1"));
    assert_eq!(field("matched_peaks").as_deref(), Some("14"));

    let echoed: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output.join("results.json"))?)?;
    assert_eq!(echoed["report_top_k"], 5);
    assert_eq!(echoed["output_paths"].as_array().map(Vec::len), Some(2));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn missing_candidates() -> anyhow::Result<()> {
    let dir = workspace("missing")?;
    let input: Input = serde_json::from_value(serde_json::json!({
        "mgf_path": dir.join("fixture.mgf"),
        "candidates_path": dir.join("nope.json"),
        "output_directory": dir,
    }))?;
    assert!(Runner::new(input.build()?).is_err());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
