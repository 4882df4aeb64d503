use fnv::FnvHashSet;

use crate::mass::Tolerance;
use crate::peptide::Peptide;
use crate::spectrum::{binary_search_slice, select_closest_peak, ProcessedSpectrum};

/// Scores fully specified peptides against a preprocessed spectrum
pub trait Scorer: Sync {
    /// Set `score`, `matched_peaks` and `explained_aa_frac` on `peptide`
    fn score(&self, peptide: &mut Peptide, precursor_charge: u8, spectrum: &ProcessedSpectrum);

    /// Fill in the remaining statistics for a winning match
    fn subscores(&self, peptide: &mut Peptide, precursor_charge: u8, spectrum: &ProcessedSpectrum);
}

/// Shared-peak correlation between the theoretical b/y ladder and the
/// binned, square-root scaled spectrum
pub struct SharedPeakScorer {
    /// Fragment tolerance, in Da
    pub fragment_tol: f32,
}

impl SharedPeakScorer {
    pub fn new(fragment_tol: f32) -> Self {
        Self { fragment_tol }
    }

    fn tolerance(&self) -> Tolerance {
        Tolerance::Da(-self.fragment_tol, self.fragment_tol)
    }
}

/// Matched cleavage sites mark both neighbouring residues as explained
fn explained_fraction(sites: &FnvHashSet<usize>, len: usize) -> f64 {
    if len == 0 {
        return 0.0;
    }
    let mut explained = vec![false; len];
    for &site in sites {
        explained[site] = true;
        if site + 1 < len {
            explained[site + 1] = true;
        }
    }
    explained.iter().filter(|&&x| x).count() as f64 / len as f64
}

impl Scorer for SharedPeakScorer {
    fn score(&self, peptide: &mut Peptide, precursor_charge: u8, spectrum: &ProcessedSpectrum) {
        let tol = self.tolerance();
        let mut bins = FnvHashSet::default();
        let mut sites = FnvHashSet::default();
        let mut matched = 0;

        for (_, site, mz) in peptide.ion_matrix().fragments(precursor_charge) {
            bins.insert(spectrum.bin(mz));
            if select_closest_peak(&spectrum.peaks, mz, tol).is_some() {
                matched += 1;
                sites.insert(site);
            }
        }

        // The theoretical vector has unit weight per bin; scaling it to unit
        // length turns the dot product into a cosine
        let dot = bins
            .iter()
            .filter_map(|b| spectrum.vector.get(b))
            .map(|&v| v as f64)
            .sum::<f64>();
        let score = match bins.is_empty() {
            true => 0.0,
            false => dot / (bins.len() as f64).sqrt(),
        };

        let explained = explained_fraction(&sites, peptide.len());
        peptide.score = score;
        peptide.matched_peaks = matched;
        peptide.explained_aa_frac = explained;
    }

    fn subscores(&self, peptide: &mut Peptide, precursor_charge: u8, spectrum: &ProcessedSpectrum) {
        let mut theoretical = peptide
            .ion_matrix()
            .fragments(precursor_charge)
            .map(|(_, _, mz)| mz)
            .collect::<Vec<_>>();
        theoretical.sort_by(|a, b| a.total_cmp(b));

        let ion_frac = match theoretical.is_empty() {
            true => 0.0,
            false => peptide.matched_peaks as f64 / theoretical.len() as f64,
        };

        // Of the most intense peaks, how many are explained by some fragment?
        let mut intense = spectrum.peaks.iter().collect::<Vec<_>>();
        intense.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        intense.truncate(2 * peptide.len());

        let explained = intense
            .iter()
            .filter(|peak| {
                let (lo, hi) = (peak.mz - self.fragment_tol, peak.mz + self.fragment_tol);
                let (i, j) = binary_search_slice(&theoretical, |a, b| a.total_cmp(b), lo, hi);
                theoretical[i..j].iter().any(|&mz| mz >= lo && mz <= hi)
            })
            .count();
        let intensity_frac = match intense.is_empty() {
            true => 0.0,
            false => explained as f64 / intense.len() as f64,
        };

        peptide.ion_frac = ion_frac;
        peptide.matched_highest_intensity_frac = intensity_frac;
    }
}
