use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::candidates::{CandidateSource, Retrieval};
use crate::expand::{missed_cleavage_filter, Expander, Variants, MAX_VARIABLE_MODS};
use crate::mass::Tolerance;
use crate::modification::ModificationCatalog;
use crate::peptide::Peptide;
use crate::scoring::Scorer;
use crate::spectrum::{Preprocessor, SharedReader, SpectrumEntry, SpectrumReader};
use crate::store::{merge, ResultStore, StoredPsm};
use crate::tracker::{Tracker, DEFAULT_TOP_K};
use crate::Error;

/// Residual masses closer to zero than this are always considered explained
pub const MIN_EXPANSION_TOLERANCE: f32 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSettings {
    pub precursor_tol: Tolerance,
    /// Fragment tolerance, in Da
    pub fragment_tol: f32,
    pub max_variable_mods: usize,
    pub top_k: usize,
    /// Spectra with fewer peaks after preprocessing are not searched
    pub min_peaks: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            precursor_tol: Tolerance::Ppm(-10.0, 10.0),
            fragment_tol: 0.02,
            max_variable_mods: MAX_VARIABLE_MODS,
            top_k: DEFAULT_TOP_K,
            min_peaks: 10,
        }
    }
}

impl TaskSettings {
    pub fn expansion_tolerance(&self) -> f32 {
        self.fragment_tol.max(MIN_EXPANSION_TOLERANCE)
    }
}

/// Outcome counts for a batch of spectrum tasks
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Tasks that produced a match
    pub identified: usize,
    /// Tasks without tags or favourable candidates
    pub unidentified: usize,
    pub failed: usize,
}

impl Summary {
    fn reduce(self, rhs: Self) -> Self {
        Self {
            identified: self.identified + rhs.identified,
            unidentified: self.unidentified + rhs.unidentified,
            failed: self.failed + rhs.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.identified + self.unidentified + self.failed
    }
}

/// Best match for one spectrum, with its confidence statistics
#[derive(Clone, Debug)]
pub struct Psm {
    pub entry: SpectrumEntry,
    pub peptide: Option<Peptide>,
    /// Score gap between the best and second best localization
    pub ptm_delta_score: f64,
    pub second_best_pattern: String,
    pub delta_lc: f64,
    pub delta_c: f64,
}

impl Psm {
    fn empty(entry: SpectrumEntry) -> Self {
        Self {
            entry,
            peptide: None,
            ptm_delta_score: 0.0,
            second_best_pattern: "-".into(),
            delta_lc: 0.0,
            delta_c: 0.0,
        }
    }
}

/// Everything a spectrum task needs. Shared by reference between worker
/// threads; each call to [`TaskRunner::run`] handles exactly one spectrum
pub struct TaskRunner<'a, R> {
    pub reader: &'a SharedReader<R>,
    pub preprocessor: &'a dyn Preprocessor,
    pub source: &'a dyn CandidateSource,
    pub scorer: &'a dyn Scorer,
    pub store: &'a dyn ResultStore,
    pub catalog: &'a ModificationCatalog,
    pub settings: TaskSettings,
}

impl<'a, R: SpectrumReader> TaskRunner<'a, R> {
    /// Find the best match for `entry` without touching the store.
    ///
    /// Returns `Ok(None)` when the spectrum has too few peaks, when no tags
    /// could be derived, or when no candidate scored favourably
    pub fn search(&self, entry: &SpectrumEntry) -> Result<Option<Psm>, Error> {
        let peaks = self.reader.fetch(entry)?;
        let spectrum = self.preprocessor.process(entry, peaks);
        if spectrum.peaks.len() < self.settings.min_peaks {
            log::trace!(
                "spectrum {}: {} peaks, skipping",
                entry.scan,
                spectrum.peaks.len()
            );
            return Ok(None);
        }

        let (ptm_free, ptm_only) =
            match self
                .source
                .retrieve(entry, &spectrum, self.settings.precursor_tol)?
            {
                Retrieval::NoTags => {
                    log::trace!("spectrum {}: no tags", entry.scan);
                    return Ok(None);
                }
                Retrieval::Candidates { ptm_free, ptm_only } => {
                    missed_cleavage_filter(ptm_free, ptm_only)
                }
            };

        let charge = entry.precursor_charge;
        let precursor_mass = entry.precursor_mass();
        let mut tracker = Tracker::new(self.settings.top_k);

        for mut peptide in ptm_free {
            self.scorer.score(&mut peptide, charge, &spectrum);
            tracker.offer(peptide);
        }

        let expander = Expander::new(self.catalog, self.settings.expansion_tolerance())
            .max_variable_mods(self.settings.max_variable_mods);
        let mut variants = Variants::default();
        for candidate in &ptm_only {
            expander.expand_into(candidate, precursor_mass, &mut variants);
        }
        log::trace!(
            "spectrum {}: {} candidates expanded into {} variants",
            entry.scan,
            ptm_only.len(),
            variants.len()
        );
        for mut peptide in variants.into_inner() {
            self.scorer.score(&mut peptide, charge, &spectrum);
            tracker.offer_variant(peptide);
        }

        let (ptm_delta_score, second_best_pattern) =
            match tracker.localization_delta(self.catalog.fixed()) {
                Some(delta) => delta,
                None => return Ok(None),
            };
        let (delta_lc, delta_c) = tracker.confidence_deltas();

        let mut winner = tracker.into_winner();
        if let Some(peptide) = winner.as_mut() {
            self.scorer.subscores(peptide, charge, &spectrum);
        }

        Ok(Some(Psm {
            peptide: winner,
            ptm_delta_score,
            second_best_pattern,
            delta_lc,
            delta_c,
            ..Psm::empty(entry.clone())
        }))
    }

    /// Search `entry` and merge the best match into the store.
    ///
    /// Returns `Ok(false)` when there was nothing to merge. Store errors,
    /// such as a missing row, are returned only after scoring completes
    pub fn run(&self, entry: &SpectrumEntry) -> Result<bool, Error> {
        let psm = match self.search(entry)? {
            Some(psm) => psm,
            None => return Ok(false),
        };
        match StoredPsm::from_psm(&psm) {
            Some(row) => {
                merge(self.store, row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one task per entry on the current rayon thread pool. A failed
    /// task is logged and counted; it does not affect the others
    pub fn run_all(&self, entries: &[SpectrumEntry]) -> Summary {
        let counter = AtomicUsize::new(0);
        let start = Instant::now();

        let summary = entries
            .par_iter()
            .map(|entry| {
                let prev = counter.fetch_add(1, Ordering::Relaxed);
                if prev > 0 && prev % 10_000 == 0 {
                    let duration = Instant::now().duration_since(start).as_millis() as usize;

                    let rate = prev * 1000 / (duration + 1);
                    log::trace!("- searched {} spectra ({} spectra/s)", prev, rate);
                }
                match self.run(entry) {
                    Ok(true) => Summary {
                        identified: 1,
                        ..Default::default()
                    },
                    Ok(false) => Summary {
                        unidentified: 1,
                        ..Default::default()
                    },
                    Err(e) => {
                        log::error!("spectrum {} ({}): {}", entry.scan, entry.title, e);
                        Summary {
                            failed: 1,
                            ..Default::default()
                        }
                    }
                }
            })
            .reduce(Summary::default, Summary::reduce);

        let duration = Instant::now().duration_since(start).as_millis() as usize;
        let rate = summary.total() * 1000 / (duration + 1);
        log::info!(
            "- search:  {:8} ms ({} spectra/s, {} identified, {} failed)",
            duration,
            rate,
            summary.identified,
            summary.failed
        );
        summary
    }
}
