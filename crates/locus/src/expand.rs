//! Localization of modification masses onto candidate sequences.
//!
//! A PTM-only candidate arrives with a bag of modification masses whose
//! sites are unknown. [`Expander`] enumerates every admissible placement of
//! known, unknown and bag masses onto the sequence, producing fully
//! specified [`Peptide`] variants ready to be scored.

use fnv::FnvHashSet;
use itertools::Itertools;

use crate::modification::ModificationCatalog;
use crate::peptide::{ModificationMap, Peptide, PeptideKey};

/// Upper bound on simultaneous known modifications per variant. Raising it
/// grows expansion time combinatorially
pub const MAX_VARIABLE_MODS: usize = 5;

/// Expanded variants of the candidates of one spectrum. A variant whose
/// rendered sequence has already been produced is dropped
#[derive(Default)]
pub struct Variants {
    seen: FnvHashSet<String>,
    items: Vec<Peptide>,
}

impl Variants {
    pub fn push(&mut self, peptide: Peptide) -> bool {
        if self.seen.contains(peptide.annotated()) {
            return false;
        }
        self.seen.insert(peptide.annotated().to_string());
        self.items.push(peptide);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_inner(self) -> Vec<Peptide> {
        self.items
    }
}

pub struct Expander<'a> {
    catalog: &'a ModificationCatalog,
    tolerance: f32,
    max_variable_mods: usize,
}

impl<'a> Expander<'a> {
    /// `tolerance` (Da) decides when a residual mass is considered explained
    pub fn new(catalog: &'a ModificationCatalog, tolerance: f32) -> Self {
        Self {
            catalog,
            tolerance,
            max_variable_mods: MAX_VARIABLE_MODS,
        }
    }

    pub fn max_variable_mods(mut self, max_variable_mods: usize) -> Self {
        self.max_variable_mods = max_variable_mods;
        self
    }

    /// Every admissible localization of `candidate` against a spectrum with
    /// neutral precursor mass `precursor_mass`, in a deterministic order
    pub fn expand(&self, candidate: &Peptide, precursor_mass: f32) -> Vec<Peptide> {
        let mut variants = Variants::default();
        self.expand_into(candidate, precursor_mass, &mut variants);
        variants.into_inner()
    }

    pub fn expand_into(&self, candidate: &Peptide, precursor_mass: f32, out: &mut Variants) {
        let residual = precursor_mass - candidate.unmodified_mass();
        self.unknown_only(candidate, residual, out);
        self.known_combinations(candidate, residual, out);
        self.place_bag(candidate, out);
    }

    fn is_unexplained(&self, mass: f32) -> bool {
        !self.catalog.is_known_mass(mass, self.tolerance)
    }

    /// Residues that may carry an unknown modification
    fn open_sites<'p>(
        &self,
        candidate: &'p Peptide,
        taken: Option<&'p ModificationMap>,
    ) -> impl Iterator<Item = usize> + 'p {
        let tool = candidate.tool();
        candidate
            .sequence()
            .bytes()
            .enumerate()
            .filter(move |(idx, residue)| {
                !tool.is_fixed_modified(*residue) && !taken.map_or(false, |m| m.contains(*idx))
            })
            .map(|(idx, _)| idx)
    }

    /// The whole residual as a single unknown modification
    fn unknown_only(&self, candidate: &Peptide, residual: f32, out: &mut Variants) {
        if residual <= self.tolerance || !self.is_unexplained(residual) {
            return;
        }
        for site in self.open_sites(candidate, None) {
            out.push(candidate.variant([(site, residual)].into_iter().collect()));
        }
    }

    /// Known modifications, optionally completed by one unknown modification
    /// carrying whatever mass they leave unexplained
    fn known_combinations(&self, candidate: &Peptide, residual: f32, out: &mut Variants) {
        let eligible = candidate
            .sequence()
            .bytes()
            .enumerate()
            .map(|(idx, residue)| (idx, self.catalog.masses_for(residue).collect::<Vec<_>>()))
            .filter(|(_, masses)| !masses.is_empty())
            .collect::<Vec<_>>();

        let max = eligible.len().min(self.max_variable_mods);
        for size in 1..=max {
            for sites in eligible.iter().combinations(size) {
                let choices = sites
                    .iter()
                    .map(|(_, masses)| masses.iter().copied())
                    .multi_cartesian_product();
                for masses in choices {
                    let mods = sites
                        .iter()
                        .map(|(idx, _)| *idx)
                        .zip(masses.iter().copied())
                        .collect::<ModificationMap>();
                    let rest = residual - mods.total();

                    if rest.abs() <= self.tolerance {
                        out.push(candidate.variant(mods));
                    } else if self.is_unexplained(rest) {
                        for site in self.open_sites(candidate, Some(&mods)) {
                            let mut mods = mods.clone();
                            mods.insert(site, rest);
                            out.push(candidate.variant(mods));
                        }
                    }
                }
            }
        }
    }

    /// The candidate's own masses, permuted over every set of sites
    fn place_bag(&self, candidate: &Peptide, out: &mut Variants) {
        let bag = match candidate.modifications() {
            Some(mods) => mods.masses().collect::<Vec<_>>(),
            None => return,
        };
        let n = bag.len();
        if n == 0 || n > candidate.len() {
            return;
        }

        let mut seen = FnvHashSet::default();
        let orderings = (0..n)
            .permutations(n)
            .map(|order| order.into_iter().map(|i| bag[i]).collect::<Vec<_>>())
            .filter(|masses| seen.insert(masses.iter().map(|m| m.to_bits()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();

        for sites in (0..candidate.len()).combinations(n) {
            for masses in &orderings {
                let mods = sites
                    .iter()
                    .copied()
                    .zip(masses.iter().copied())
                    .collect::<ModificationMap>();
                out.push(candidate.variant(mods));
            }
        }
    }
}

/// Drop candidates whose outermost modification is a negative single-residue
/// mass while another candidate's core sequence contains, or is contained
/// in, theirs: such a mass is usually the trace of a missed cleavage.
///
/// Survivors are deduplicated by identity and returned as
/// `(ptm_free, ptm_only)`.
pub fn missed_cleavage_filter(
    ptm_free: Vec<Peptide>,
    ptm_only: Vec<Peptide>,
) -> (Vec<Peptide>, Vec<Peptide>) {
    let split = ptm_free.len();
    let all = ptm_free.into_iter().chain(ptm_only).collect::<Vec<_>>();
    let cores = all.iter().map(Peptide::core).collect::<Vec<_>>();

    let mut seen: FnvHashSet<PeptideKey> = FnvHashSet::default();
    let mut free = Vec::new();
    let mut only = Vec::new();

    for (idx, peptide) in all.into_iter().enumerate() {
        let truncated = peptide
            .modifications()
            .map_or(false, |m| m.has_negative_terminal());
        let nested = truncated
            && cores.iter().enumerate().any(|(other, core)| {
                other != idx
                    && core != &cores[idx]
                    && (core.contains(cores[idx].as_str()) || cores[idx].contains(core.as_str()))
            });
        if nested {
            log::trace!("discarding {}: likely missed cleavage", peptide);
            continue;
        }
        if !seen.insert(peptide.key().clone()) {
            continue;
        }
        match idx < split {
            true => free.push(peptide),
            false => only.push(peptide),
        }
    }
    (free, only)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use fnv::FnvHashMap;

    use super::*;
    use crate::mass::MassTool;
    use crate::modification::VariableMod;
    use crate::peptide::Peptide0;

    fn tool(fixed: &[(u8, f32)]) -> Arc<MassTool> {
        Arc::new(MassTool::new(fixed.iter().copied().collect(), 2))
    }

    fn candidate(sequence: &str, tool: &Arc<MassTool>, mods: &[(usize, f32)]) -> Peptide {
        let mut p = Peptide::new(Arc::new(Peptide0::new(sequence, false)), tool.clone(), 0.5, 1);
        p.set_modifications(mods.iter().copied().collect());
        p
    }

    fn annotations(variants: &[Peptide]) -> Vec<&str> {
        variants.iter().map(Peptide::annotated).collect()
    }

    #[test]
    fn unknown_residual_at_every_residue() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::new(
            vec![VariableMod {
                residue: b'M',
                mass: 15.9949,
            }],
            FnvHashMap::default(),
        );
        let peptide = candidate("PEPTIDE", &tool, &[]);
        let precursor = peptide.unmodified_mass() + 79.966;

        let variants = Expander::new(&catalog, 0.02).expand(&peptide, precursor);
        assert_eq!(variants.len(), 7);
        for (site, variant) in variants.iter().enumerate() {
            let mods = variant.modifications().unwrap();
            assert_eq!(mods.len(), 1);
            assert!((mods.get(site).unwrap() - 79.966).abs() < 1e-3);
            assert!((variant.theoretical_mass() - precursor).abs() < 1e-3);
        }
    }

    #[test]
    fn fixed_modified_residues_are_skipped() {
        let tool = tool(&[(b'C', 57.02146), (b'K', 0.05)]);
        let catalog = ModificationCatalog::default();
        let peptide = candidate("ACK", &tool, &[]);
        let precursor = peptide.unmodified_mass() + 42.0106;

        let variants = Expander::new(&catalog, 0.1).expand(&peptide, precursor);
        let sites = variants
            .iter()
            .map(|v| v.modifications().unwrap().first().unwrap().0.start)
            .collect::<Vec<_>>();
        assert_eq!(sites, vec![0, 2]);
    }

    #[test]
    fn known_residual_is_not_placed_as_unknown() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::new(
            vec![VariableMod {
                residue: b'S',
                mass: 79.96633,
            }],
            FnvHashMap::default(),
        );
        let peptide = candidate("PESTK", &tool, &[]);
        let precursor = peptide.unmodified_mass() + 79.96633;

        let variants = Expander::new(&catalog, 0.02).expand(&peptide, precursor);
        assert_eq!(annotations(&variants), vec!["PES[+79.96633]TK"]);
    }

    #[test]
    fn known_modification_plus_unknown() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::new(
            vec![VariableMod {
                residue: b'M',
                mass: 15.9949,
            }],
            FnvHashMap::default(),
        );
        let peptide = candidate("AMK", &tool, &[]);
        let precursor = peptide.unmodified_mass() + 15.9949 + 42.0106;

        let variants = Expander::new(&catalog, 0.02).expand(&peptide, precursor);
        // Three unknown-only placements, then oxidation plus the leftover
        // acetylation on each of the two remaining residues
        assert_eq!(variants.len(), 5);
        let combined = variants
            .iter()
            .filter(|v| v.modification_count() == 2)
            .map(|v| v.modifications().unwrap().get(1).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(combined, vec![15.9949, 15.9949]);
    }

    #[test]
    fn variable_mod_cap() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::new(
            vec![VariableMod {
                residue: b'S',
                mass: 79.96633,
            }],
            FnvHashMap::default(),
        );
        let peptide = candidate("SSSS", &tool, &[]);
        let precursor = peptide.unmodified_mass() + 3.0 * 79.96633;

        let capped = Expander::new(&catalog, 0.02)
            .max_variable_mods(2)
            .expand(&peptide, precursor);
        assert!(capped.iter().all(|v| v.modification_count() <= 3));
        assert!(!capped.iter().any(|v| {
            v.modification_count() == 3
                && v.modifications().unwrap().masses().all(|m| m == 79.96633)
        }));

        let full = Expander::new(&catalog, 0.02).expand(&peptide, precursor);
        let exact = full
            .iter()
            .filter(|v| v.modifications().unwrap().masses().all(|m| m == 79.96633))
            .filter(|v| v.modification_count() == 3)
            .count();
        assert_eq!(exact, 4);
    }

    #[test]
    fn bag_permutations_are_distinct() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::default();
        let peptide = candidate("PEPTIDE", &tool, &[(0, 1.0), (1, 1.0), (2, 2.0)]);
        // No residual: only the bag placement applies
        let precursor = peptide.unmodified_mass();

        let variants = Expander::new(&catalog, 0.02).expand(&peptide, precursor);
        // C(7, 3) site sets times 3 distinct orderings of {1, 1, 2}
        assert_eq!(variants.len(), 35 * 3);
        let distinct = variants
            .iter()
            .map(Peptide::annotated)
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(distinct.len(), variants.len());
        assert!(variants.iter().all(|v| v.modification_count() == 3));
    }

    #[test]
    fn expansion_is_pure() {
        let tool = tool(&[(b'C', 57.02146)]);
        let catalog = ModificationCatalog::new(
            vec![
                VariableMod {
                    residue: b'M',
                    mass: 15.9949,
                },
                VariableMod {
                    residue: b'S',
                    mass: 79.96633,
                },
            ],
            FnvHashMap::default(),
        );
        let peptide = candidate("MSCPEK", &tool, &[(1, 79.96633), (4, -18.010565)]);
        let precursor = peptide.unmodified_mass() + 100.0;

        let expander = Expander::new(&catalog, 0.1);
        let a = expander.expand(&peptide, precursor);
        let b = expander.expand(&peptide, precursor);
        assert!(!a.is_empty());
        assert_eq!(annotations(&a), annotations(&b));
        assert!(a
            .iter()
            .flat_map(|v| v.modifications().unwrap().iter().map(|(c, _)| c.width()))
            .all(|w| w == 1));
    }

    #[test]
    fn shared_deduplication() {
        let tool = tool(&[]);
        let catalog = ModificationCatalog::default();
        let a = candidate("PEPTIDE", &tool, &[(0, 79.966)]);
        let b = candidate("PEPTIDE", &tool, &[(3, 79.966)]);
        let precursor = a.theoretical_mass();

        let expander = Expander::new(&catalog, 0.02);
        let mut variants = Variants::default();
        expander.expand_into(&a, precursor, &mut variants);
        let first = variants.len();
        expander.expand_into(&b, precursor, &mut variants);
        assert!(first >= 7);
        assert_eq!(variants.len(), first);
    }

    #[test]
    fn missed_cleavage() {
        let tool = tool(&[]);
        let short = candidate("ACDE", &tool, &[(3, -18.010565)]);
        let long = candidate("GACDEK", &tool, &[]);
        let unrelated = candidate("PEPTLDE", &tool, &[(6, -18.010565)]);

        let (free, only) = missed_cleavage_filter(vec![long], vec![short, unrelated]);
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].sequence(), "GACDEK");
        assert_eq!(annotations(&only), vec!["PEPTLDE[-18.010565]"]);
    }

    #[test]
    fn missed_cleavage_requires_negative_terminal() {
        let tool = tool(&[]);
        let positive = candidate("ACDE", &tool, &[(3, 15.9949)]);
        let interior = candidate("ACDE", &tool, &[(0, 1.0), (1, -18.010565), (3, 1.0)]);
        let long = candidate("GACDEK", &tool, &[]);
        let duplicate = candidate("GACDEK", &tool, &[]);

        let (free, only) =
            missed_cleavage_filter(vec![long, duplicate], vec![positive, interior]);
        assert_eq!(free.len(), 1);
        assert_eq!(only.len(), 2);
    }

    #[test]
    fn leucine_isoleucine_cores() {
        let tool = tool(&[]);
        let short = candidate("PEPTIDE", &tool, &[(0, -17.026549)]);
        let long = candidate("KPEPTLDER", &tool, &[]);
        let (free, only) = missed_cleavage_filter(vec![long], vec![short]);
        assert_eq!(free.len(), 1);
        assert!(only.is_empty());
    }
}
