use std::path::Path;
use std::sync::Arc;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::mass::{MassTool, Tolerance, VALID_AA};
use crate::peptide::{ModificationMap, Peptide, Peptide0};
use crate::spectrum::{ProcessedSpectrum, SpectrumEntry};
use crate::Error;

/// Candidates retrieved for one spectrum
pub enum Retrieval {
    /// No sequence tags could be derived from the spectrum
    NoTags,
    Candidates {
        /// Unmodified candidates within the precursor window
        ptm_free: Vec<Peptide>,
        /// Candidates carrying an unlocalized modification mass bag
        ptm_only: Vec<Peptide>,
    },
}

pub trait CandidateSource: Sync {
    fn retrieve(
        &self,
        entry: &SpectrumEntry,
        spectrum: &ProcessedSpectrum,
        precursor_tol: Tolerance,
    ) -> Result<Retrieval, Error>;
}

/// A reference to a sequence in [`CandidateFile::peptides`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub peptide: usize,
    #[serde(default)]
    pub cross_corr: f64,
    #[serde(default)]
    pub rank: u32,
    /// `(position, mass)` pairs; for PTM-only hits, only the masses matter
    #[serde(default)]
    pub modifications: Vec<(usize, f32)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumHits {
    pub scan: usize,
    /// Number of sequence tags extracted upstream
    #[serde(default = "one")]
    pub tags: usize,
    #[serde(default)]
    pub ptm_free: Vec<Hit>,
    #[serde(default)]
    pub ptm_only: Vec<Hit>,
}

fn one() -> usize {
    1
}

/// Output of an upstream tag-based retrieval pass
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub peptides: Vec<Peptide0>,
    pub spectra: Vec<SpectrumHits>,
}

/// Precomputed candidates, looked up by scan
pub struct CandidateTable {
    tool: Arc<MassTool>,
    peptides: Vec<Arc<Peptide0>>,
    spectra: FnvHashMap<usize, SpectrumHits>,
}

impl CandidateTable {
    /// Validate `file` and index it by scan. Hits pointing at unknown
    /// sequences, or placing modifications outside their sequence, are
    /// dropped with a warning
    pub fn new(file: CandidateFile, tool: Arc<MassTool>) -> Result<Self, Error> {
        for peptide in &file.peptides {
            if peptide.sequence.is_empty()
                || !peptide.sequence.bytes().all(|r| VALID_AA.contains(&r))
            {
                return Err(Error::InvalidSequence(peptide.sequence.clone()));
            }
        }

        let peptides = file.peptides.into_iter().map(Arc::new).collect::<Vec<_>>();
        let valid = |hit: &Hit| match peptides.get(hit.peptide) {
            Some(p) => hit.modifications.iter().all(|&(pos, _)| pos < p.sequence.len()),
            None => false,
        };

        let mut spectra = FnvHashMap::default();
        let mut dropped = 0;
        for mut hits in file.spectra {
            let before = hits.ptm_free.len() + hits.ptm_only.len();
            hits.ptm_free.retain(&valid);
            hits.ptm_only.retain(|hit| valid(hit) && !hit.modifications.is_empty());
            dropped += before - hits.ptm_free.len() - hits.ptm_only.len();
            spectra.insert(hits.scan, hits);
        }
        if dropped > 0 {
            log::warn!("dropped {} invalid candidate hits", dropped);
        }

        Ok(Self {
            tool,
            peptides,
            spectra,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, tool: Arc<MassTool>) -> Result<Self, Error> {
        Self::new(crate::read_json(path)?, tool)
    }

    pub fn peptides(&self) -> &[Arc<Peptide0>] {
        &self.peptides
    }

    fn candidate(&self, hit: &Hit) -> Peptide {
        Peptide::new(
            self.peptides[hit.peptide].clone(),
            self.tool.clone(),
            hit.cross_corr,
            hit.rank,
        )
    }
}

impl CandidateSource for CandidateTable {
    fn retrieve(
        &self,
        entry: &SpectrumEntry,
        _: &ProcessedSpectrum,
        precursor_tol: Tolerance,
    ) -> Result<Retrieval, Error> {
        let hits = match self.spectra.get(&entry.scan) {
            Some(hits) if hits.tags > 0 => hits,
            _ => return Ok(Retrieval::NoTags),
        };

        let precursor_mass = entry.precursor_mass();
        let ptm_free = hits
            .ptm_free
            .iter()
            .map(|hit| self.candidate(hit))
            .filter(|p| precursor_tol.contains(precursor_mass, p.theoretical_mass()))
            .collect();

        let ptm_only = hits
            .ptm_only
            .iter()
            .map(|hit| {
                let mut p = self.candidate(hit);
                p.set_modifications(hit.modifications.iter().copied().collect::<ModificationMap>());
                p
            })
            .collect();

        Ok(Retrieval::Candidates { ptm_free, ptm_only })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn table() -> CandidateTable {
        let json = r#"{
            "peptides": [
                { "sequence": "PEPTIDE" },
                { "sequence": "LESLIEK", "decoy": true, "left_flank": "K" }
            ],
            "spectra": [
                {
                    "scan": 1,
                    "ptm_free": [
                        { "peptide": 0, "cross_corr": 0.5, "rank": 1 },
                        { "peptide": 1, "cross_corr": 0.2, "rank": 2 }
                    ],
                    "ptm_only": [
                        { "peptide": 1, "modifications": [[2, 79.966]] },
                        { "peptide": 1 },
                        { "peptide": 5, "modifications": [[0, 1.0]] },
                        { "peptide": 0, "modifications": [[7, 1.0]] }
                    ]
                },
                { "scan": 2, "tags": 0 }
            ]
        }"#;
        let file: CandidateFile = serde_json::from_str(json).unwrap();
        CandidateTable::new(file, Arc::new(MassTool::default())).unwrap()
    }

    fn entry(scan: usize, neutral: f32) -> SpectrumEntry {
        SpectrumEntry {
            scan,
            precursor_mz: crate::ion_series::mz(neutral, 2),
            precursor_charge: 2,
            ..Default::default()
        }
    }

    #[test]
    fn retrieve_candidates() {
        let table = table();
        assert_eq!(table.peptides().len(), 2);
        assert_eq!(table.peptides()[1].left_flank, 'K');
        assert_eq!(table.peptides()[0].right_flank, '-');

        let mass = MassTool::default().peptide_mass("PEPTIDE", None);
        let tol = Tolerance::Ppm(-10.0, 10.0);
        let spectrum = ProcessedSpectrum::default();
        match table.retrieve(&entry(1, mass), &spectrum, tol).unwrap() {
            Retrieval::Candidates { ptm_free, ptm_only } => {
                assert_eq!(ptm_free.len(), 1);
                assert_eq!(ptm_free[0].sequence(), "PEPTIDE");
                assert_eq!(ptm_free[0].cross_corr, 0.5);
                assert_eq!(ptm_only.len(), 1);
                assert_eq!(ptm_only[0].annotated(), "LES[+79.966]LIEK");
                assert!(ptm_only[0].decoy());
            }
            Retrieval::NoTags => panic!("expected candidates"),
        }
    }

    #[test]
    fn no_tags() {
        let table = table();
        let spectrum = ProcessedSpectrum::default();
        let tol = Tolerance::Da(-0.5, 0.5);
        assert!(matches!(
            table.retrieve(&entry(2, 800.0), &spectrum, tol).unwrap(),
            Retrieval::NoTags
        ));
        assert!(matches!(
            table.retrieve(&entry(3, 800.0), &spectrum, tol).unwrap(),
            Retrieval::NoTags
        ));
    }

    #[test]
    fn invalid_sequence() {
        let file = CandidateFile {
            peptides: vec![Peptide0::new("PEPTIDEX", false)],
            spectra: vec![],
        };
        assert!(matches!(
            CandidateTable::new(file, Arc::new(MassTool::default())),
            Err(Error::InvalidSequence(s)) if s == "PEPTIDEX"
        ));
    }
}
