use std::cmp::Ordering;

use fnv::FnvHashMap;

use crate::heap::BoundedHeap;
use crate::peptide::Peptide;

pub const DEFAULT_TOP_K: usize = 5;

/// A scored peptide, ordered by [`Peptide::preference`]
#[derive(Clone, Debug)]
pub struct Ranked(pub Peptide);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.preference(&other.0)
    }
}

/// Best matches seen so far for one spectrum.
///
/// Keeps the global top-K across every favourably scored candidate, and for
/// each free sequence among the localized variants, the top-K of its
/// modification patterns.
pub struct Tracker {
    k: usize,
    global: BoundedHeap<Ranked>,
    variants: FnvHashMap<String, BoundedHeap<Ranked>>,
}

impl Tracker {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            global: BoundedHeap::new(k),
            variants: FnvHashMap::default(),
        }
    }

    /// Offer a scored candidate to the global top-K only. Returns `true` if
    /// it was retained
    pub fn offer(&mut self, peptide: Peptide) -> bool {
        if peptide.score <= 0.0 {
            return false;
        }
        self.global.push(Ranked(peptide))
    }

    /// Offer a scored localization variant. It competes both globally and
    /// against the other patterns of its free sequence
    pub fn offer_variant(&mut self, peptide: Peptide) -> bool {
        if peptide.score <= 0.0 {
            return false;
        }
        let k = self.k;
        let local = self
            .variants
            .entry(peptide.sequence().to_string())
            .or_insert_with(|| BoundedHeap::new(k))
            .push(Ranked(peptide.clone()));
        let global = self.global.push(Ranked(peptide));
        local || global
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    pub fn winner(&self) -> Option<&Peptide> {
        self.global.best().map(|r| &r.0)
    }

    /// Global top-K, best first
    pub fn top(&self) -> Vec<&Peptide> {
        self.global.sorted().into_iter().map(|r| &r.0).collect()
    }

    /// Top-K patterns of `sequence`, best first
    pub fn variants(&self, sequence: &str) -> Vec<&Peptide> {
        self.variants
            .get(sequence)
            .map(|heap| heap.sorted().into_iter().map(|r| &r.0).collect())
            .unwrap_or_default()
    }

    /// Consume the tracker, keeping only the winner. This is always the
    /// peptide [`Tracker::winner`] reports, even among equally ranked ones
    pub fn into_winner(self) -> Option<Peptide> {
        self.winner().cloned()
    }

    /// PTM delta score and second best pattern for the winner's sequence.
    ///
    /// An unmodified winner has no competing localization: its raw score is
    /// reported along with a `-` pattern
    pub fn localization_delta(&self, fixed: &FnvHashMap<u8, f32>) -> Option<(f64, String)> {
        let winner = self.winner()?;
        if !winner.is_modified() {
            return Some((winner.score, "-".into()));
        }
        let variants = self.variants(winner.sequence());
        match variants.as_slice() {
            [best, second, ..] => Some((
                best.score - second.score,
                second.annotated_with_fixed(fixed),
            )),
            // A single pattern, or a modified peptide that entered through
            // `offer` and so has no per-sequence patterns at all
            _ => Some((winner.score, "-".into())),
        }
    }

    /// Relative confidence of the winner: `(delta_lc, delta_c)`, measured
    /// against the lowest and the second best global entries
    pub fn confidence_deltas(&self) -> (f64, f64) {
        let top = self.top();
        let winner = match top.first() {
            Some(w) if w.score > 0.0 => w.score,
            _ => return (0.0, 0.0),
        };
        if top.len() < 2 {
            return (0.0, 0.0);
        }
        let lowest = top[top.len() - 1].score;
        let second = top[1].score;
        ((winner - lowest) / winner, (winner - second) / winner)
    }
}
