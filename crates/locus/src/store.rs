use dashmap::DashMap;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::task::Psm;
use crate::Error;

/// Score and decoy status of the match currently stored for a spectrum
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Incumbent {
    pub score: f64,
    pub decoy: bool,
}

/// One result row: everything about a spectrum's best match that outlives
/// the task that found it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredPsm {
    pub spectrum: usize,
    pub title: String,
    pub precursor_mz: f32,
    pub precursor_charge: u8,
    pub precursor_mass: f32,
    /// Annotated with variable modifications only
    pub peptide: String,
    pub sequence: String,
    pub left_flank: char,
    pub right_flank: char,
    pub proteins: Vec<String>,
    pub decoy: bool,
    pub theoretical_mass: f32,
    pub modifications: usize,
    pub global_rank: u32,
    pub cross_corr: f64,
    pub score: f64,
    pub matched_peaks: u32,
    pub ion_frac: f64,
    pub matched_highest_intensity_frac: f64,
    pub explained_aa_frac: f64,
    pub ptm_delta_score: f64,
    pub second_best_pattern: String,
    pub delta_lc: f64,
    pub delta_c: f64,
    pub probability: String,
}

impl StoredPsm {
    /// `None` if the match carries no peptide
    pub fn from_psm(psm: &Psm) -> Option<Self> {
        let peptide = psm.peptide.as_ref()?;
        let entry = &psm.entry;
        Some(Self {
            spectrum: entry.scan,
            title: entry.title.clone(),
            precursor_mz: entry.precursor_mz,
            precursor_charge: entry.precursor_charge,
            precursor_mass: entry.precursor_mass(),
            peptide: peptide.annotated().to_string(),
            sequence: peptide.sequence().to_string(),
            left_flank: peptide.context().left_flank,
            right_flank: peptide.context().right_flank,
            proteins: peptide.context().proteins.clone(),
            decoy: peptide.decoy(),
            theoretical_mass: peptide.theoretical_mass(),
            modifications: peptide.modification_count(),
            global_rank: peptide.global_rank,
            cross_corr: peptide.cross_corr,
            score: peptide.score,
            matched_peaks: peptide.matched_peaks,
            ion_frac: peptide.ion_frac,
            matched_highest_intensity_frac: peptide.matched_highest_intensity_frac,
            explained_aa_frac: peptide.explained_aa_frac,
            ptm_delta_score: psm.ptm_delta_score,
            second_best_pattern: psm.second_best_pattern.clone(),
            delta_lc: psm.delta_lc,
            delta_c: psm.delta_c,
            probability: peptide.probability.clone(),
        })
    }

    pub fn incumbent(&self) -> Incumbent {
        Incumbent {
            score: self.score,
            decoy: self.decoy,
        }
    }
}

/// Durable best-match storage, one row per spectrum.
///
/// Rows must be created before any task runs; a task finding no row for
/// its spectrum fails with [`Error::Integrity`]. Tasks only ever touch
/// their own spectrum's row.
pub trait ResultStore: Sync {
    /// The stored match for `spectrum`, or `None` for an empty row
    fn current(&self, spectrum: usize) -> Result<Option<Incumbent>, Error>;

    /// Overwrite the row for `psm.spectrum`
    fn replace(&self, psm: StoredPsm) -> Result<(), Error>;
}

/// Should a new match `(score, decoy)` overwrite the incumbent?
///
/// Strictly better scores always win; on a tie, a target displaces a
/// decoy. Equal-score ties between targets keep the first writer.
pub fn should_replace(incumbent: Option<Incumbent>, score: f64, decoy: bool) -> bool {
    match incumbent {
        None => true,
        Some(old) => score > old.score || (score == old.score && old.decoy && !decoy),
    }
}

/// Merge `psm` into `store`. Returns `true` if the stored row changed
pub fn merge(store: &dyn ResultStore, psm: StoredPsm) -> Result<bool, Error> {
    let incumbent = store.current(psm.spectrum)?;
    if should_replace(incumbent, psm.score, psm.decoy) {
        store.replace(psm)?;
        Ok(true)
    } else {
        log::trace!(
            "spectrum {}: keeping stored match over {}",
            psm.spectrum,
            psm.peptide
        );
        Ok(false)
    }
}

/// In-memory [`ResultStore`]
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<usize, Option<StoredPsm>>,
}

impl MemoryStore {
    /// Create an empty placeholder row for `spectrum`, unless one exists
    pub fn register(&self, spectrum: usize) {
        self.rows.entry(spectrum).or_insert(None);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, spectrum: usize) -> Option<StoredPsm> {
        self.rows.get(&spectrum).and_then(|row| row.value().clone())
    }

    /// Snapshot of all filled rows, ordered by spectrum
    pub fn rows(&self) -> Vec<StoredPsm> {
        let mut rows = self
            .rows
            .iter()
            .filter_map(|row| row.value().clone())
            .collect::<Vec<_>>();
        rows.sort_by_key(|row| row.spectrum);
        rows
    }

    /// Number of placeholder rows that were never filled
    pub fn unfilled(&self) -> usize {
        self.rows.iter().filter(|row| row.value().is_none()).count()
    }

    /// Filled rows keyed by spectrum
    pub fn into_map(self) -> FnvHashMap<usize, StoredPsm> {
        self.rows
            .into_iter()
            .filter_map(|(spectrum, row)| row.map(|row| (spectrum, row)))
            .collect()
    }
}

impl ResultStore for MemoryStore {
    fn current(&self, spectrum: usize) -> Result<Option<Incumbent>, Error> {
        match self.rows.get(&spectrum) {
            Some(row) => Ok(row.value().as_ref().map(StoredPsm::incumbent)),
            None => Err(Error::Integrity { spectrum }),
        }
    }

    fn replace(&self, psm: StoredPsm) -> Result<(), Error> {
        let spectrum = psm.spectrum;
        match self.rows.get_mut(&spectrum) {
            Some(mut row) => {
                *row = Some(psm);
                Ok(())
            }
            None => Err(Error::Integrity { spectrum }),
        }
    }
}
