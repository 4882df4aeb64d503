use std::path::PathBuf;

use locus_core::store::StoredPsm;
use rayon::prelude::*;

use crate::runner::Runner;

pub const HEADERS: [&str; 24] = [
    "scannr",
    "title",
    "charge",
    "expmass",
    "calcmass",
    "peptide",
    "sequence",
    "proteins",
    "left_flank",
    "right_flank",
    "label",
    "modifications",
    "global_rank",
    "cross_corr",
    "score",
    "matched_peaks",
    "ion_frac",
    "matched_highest_intensity_frac",
    "explained_aa_frac",
    "ptm_delta_score",
    "second_best_pattern",
    "delta_lc",
    "delta_c",
    "probability",
];

impl Runner {
    pub fn serialize_psm(&self, psm: &StoredPsm) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        let mut flank = [0; 4];
        record.push_field(itoa::Buffer::new().format(psm.spectrum).as_bytes());
        record.push_field(psm.title.as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.precursor_charge).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.precursor_mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.theoretical_mass).as_bytes());
        record.push_field(psm.peptide.as_bytes());
        record.push_field(psm.sequence.as_bytes());
        record.push_field(psm.proteins.join(";").as_bytes());
        record.push_field(psm.left_flank.encode_utf8(&mut flank).as_bytes());
        record.push_field(psm.right_flank.encode_utf8(&mut flank).as_bytes());
        record.push_field(if psm.decoy { "-1" } else { "1" }.as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.modifications).as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.global_rank).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.cross_corr).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.score).as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.matched_peaks).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.ion_frac).as_bytes());
        record.push_field(
            ryu::Buffer::new()
                .format(psm.matched_highest_intensity_frac)
                .as_bytes(),
        );
        record.push_field(ryu::Buffer::new().format(psm.explained_aa_frac).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.ptm_delta_score).as_bytes());
        record.push_field(psm.second_best_pattern.as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.delta_lc).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.delta_c).as_bytes());
        record.push_field(psm.probability.as_bytes());
        record
    }

    /// Write one row per identified spectrum, ordered by scan
    pub fn write_psms(&self, psms: &[StoredPsm]) -> anyhow::Result<PathBuf> {
        let path = self.make_path("results.locus.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        wtr.write_byte_record(&csv::ByteRecord::from(HEADERS.to_vec()))?;
        for record in psms
            .par_iter()
            .map(|psm| self.serialize_psm(psm))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Echo the resolved parameters, for reproducibility
    pub fn write_parameters(&self) -> anyhow::Result<PathBuf> {
        let path = self.make_path("results.json");
        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
