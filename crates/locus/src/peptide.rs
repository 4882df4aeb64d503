use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use fnv::FnvHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ion_series::IonMatrix;
use crate::mass::MassTool;
use crate::Error;

/// A modification site: the residue interval `[start, end)`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Coordinate {
    pub start: usize,
    pub end: usize,
}

impl Coordinate {
    /// Single-residue coordinate `[x, x + 1)`
    pub fn residue(x: usize) -> Self {
        Self {
            start: x,
            end: x + 1,
        }
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Ordered mapping of modification sites to delta masses.
///
/// Each residue carries at most one modification; inserting at an already
/// modified residue replaces the previous mass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModificationMap(BTreeMap<Coordinate, f32>);

impl ModificationMap {
    /// Place `mass` on residue `position`, returning the mass it replaced
    pub fn insert(&mut self, position: usize, mass: f32) -> Option<f32> {
        self.0.insert(Coordinate::residue(position), mass)
    }

    pub fn get(&self, position: usize) -> Option<f32> {
        self.0.get(&Coordinate::residue(position)).copied()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.0.contains_key(&Coordinate::residue(position))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Coordinate, f32)> {
        self.0.iter().map(|(c, m)| (c, *m))
    }

    /// Modification masses in site order. As a bag, this is the unlocalized
    /// mass multiset of a PTM-only candidate
    pub fn masses(&self) -> impl Iterator<Item = f32> + '_ {
        self.0.values().copied()
    }

    pub fn total(&self) -> f32 {
        self.masses().sum()
    }

    pub fn first(&self) -> Option<(&Coordinate, f32)> {
        self.0.iter().next().map(|(c, m)| (c, *m))
    }

    pub fn last(&self) -> Option<(&Coordinate, f32)> {
        self.0.iter().next_back().map(|(c, m)| (c, *m))
    }

    /// Does the outermost (first or last) site carry a negative single-residue mass?
    pub fn has_negative_terminal(&self) -> bool {
        [self.first(), self.last()]
            .into_iter()
            .flatten()
            .any(|(coord, mass)| mass < 0.0 && coord.width() == 1)
    }
}

impl FromIterator<(usize, f32)> for ModificationMap {
    fn from_iter<T: IntoIterator<Item = (usize, f32)>>(iter: T) -> Self {
        let mut map = ModificationMap::default();
        for (position, mass) in iter {
            map.insert(position, mass);
        }
        map
    }
}

/// Static per-sequence context, produced once when the index is built and
/// shared between every spectrum that retrieves the sequence
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peptide0 {
    pub sequence: String,
    #[serde(default = "no_flank")]
    pub left_flank: char,
    #[serde(default = "no_flank")]
    pub right_flank: char,
    #[serde(default)]
    pub decoy: bool,
    #[serde(default)]
    pub proteins: Vec<String>,
}

fn no_flank() -> char {
    '-'
}

impl Peptide0 {
    pub fn new<S: Into<String>>(sequence: S, decoy: bool) -> Self {
        Self {
            sequence: sequence.into(),
            left_flank: no_flank(),
            right_flank: no_flank(),
            decoy,
            proteins: Vec::new(),
        }
    }
}

/// Canonical identity of a peptide: free sequence plus sorted sites and the
/// exact bit patterns of their masses
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeptideKey {
    sequence: String,
    modifications: Vec<(usize, u32)>,
}

impl PeptideKey {
    fn new(sequence: &str, mods: Option<&ModificationMap>) -> Self {
        Self {
            sequence: sequence.to_string(),
            modifications: mods
                .map(|m| m.iter().map(|(c, mass)| (c.start, mass.to_bits())).collect())
                .unwrap_or_default(),
        }
    }
}

/// Everything that depends on the modification map. Computed on first
/// access after each change
#[derive(Clone, Debug)]
struct Derived {
    generation: u64,
    monoisotopic: f32,
    ions: IonMatrix,
    annotated: String,
}

/// A candidate peptide for one spectrum
#[derive(Clone, Debug)]
pub struct Peptide {
    context: Arc<Peptide0>,
    tool: Arc<MassTool>,
    /// Normalized cross-correlation from the coarse retrieval stage
    pub cross_corr: f64,
    /// Rank from the coarse retrieval stage
    pub global_rank: u32,

    modifications: Option<ModificationMap>,
    generation: u64,
    key: PeptideKey,
    derived: OnceCell<Derived>,

    pub score: f64,
    pub matched_peaks: u32,
    pub ion_frac: f64,
    pub matched_highest_intensity_frac: f64,
    pub explained_aa_frac: f64,
    /// Localization probability annotation, `-` when not computed
    pub probability: String,
}

impl Peptide {
    pub fn new(context: Arc<Peptide0>, tool: Arc<MassTool>, cross_corr: f64, global_rank: u32) -> Self {
        let key = PeptideKey::new(&context.sequence, None);
        Self {
            context,
            tool,
            cross_corr,
            global_rank,
            modifications: None,
            generation: 0,
            key,
            derived: OnceCell::new(),
            score: 0.0,
            matched_peaks: 0,
            ion_frac: 0.0,
            matched_highest_intensity_frac: 0.0,
            explained_aa_frac: 0.0,
            probability: "-".into(),
        }
    }

    /// Same identity as `self`, carrying `mods` and no scores
    pub fn variant(&self, mods: ModificationMap) -> Self {
        let mut peptide = Self::new(
            self.context.clone(),
            self.tool.clone(),
            self.cross_corr,
            self.global_rank,
        );
        peptide.set_modifications(mods);
        peptide
    }

    /// Replace the modification map. An empty map clears all modifications.
    /// Invalidates derived state and scoring outputs
    pub fn set_modifications(&mut self, mods: ModificationMap) {
        debug_assert!(mods.iter().all(|(c, _)| c.end <= self.len()));
        self.modifications = match mods.is_empty() {
            true => None,
            false => Some(mods),
        };
        self.generation += 1;
        self.key = PeptideKey::new(&self.context.sequence, self.modifications.as_ref());
        self.derived = OnceCell::new();

        self.score = 0.0;
        self.matched_peaks = 0;
        self.ion_frac = 0.0;
        self.matched_highest_intensity_frac = 0.0;
        self.explained_aa_frac = 0.0;
        self.probability = "-".into();
    }

    fn derived(&self) -> &Derived {
        let derived = self.derived.get_or_init(|| {
            let mods = self.modifications.as_ref();
            Derived {
                generation: self.generation,
                monoisotopic: self.tool.peptide_mass(&self.context.sequence, mods),
                ions: self.tool.ion_matrix(&self.context.sequence, mods),
                annotated: render(&self.context.sequence, mods),
            }
        });
        debug_assert_eq!(derived.generation, self.generation);
        derived
    }

    pub fn context(&self) -> &Arc<Peptide0> {
        &self.context
    }

    pub fn tool(&self) -> &MassTool {
        &self.tool
    }

    /// Sequence without any modification annotation
    pub fn sequence(&self) -> &str {
        &self.context.sequence
    }

    pub fn decoy(&self) -> bool {
        self.context.decoy
    }

    pub fn len(&self) -> usize {
        self.context.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context.sequence.is_empty()
    }

    /// Normalized sequence (I/L collapsed) with flanking residues stripped
    pub fn core(&self) -> String {
        self.context.sequence.replace('I', "L")
    }

    pub fn key(&self) -> &PeptideKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn modifications(&self) -> Option<&ModificationMap> {
        self.modifications.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modifications.is_some()
    }

    pub fn modification_count(&self) -> usize {
        self.modifications.as_ref().map_or(0, ModificationMap::len)
    }

    /// Theoretical neutral mass, including fixed and variable modifications
    pub fn theoretical_mass(&self) -> f32 {
        self.derived().monoisotopic
    }

    /// Neutral mass of the sequence with fixed modifications only
    pub fn unmodified_mass(&self) -> f32 {
        self.tool.peptide_mass(&self.context.sequence, None)
    }

    pub fn ion_matrix(&self) -> &IonMatrix {
        &self.derived().ions
    }

    /// Sequence annotated with variable modifications, e.g. `PEPT[+79.966]IDE`
    pub fn annotated(&self) -> &str {
        &self.derived().annotated
    }

    /// Sequence annotated with variable and fixed modifications combined.
    /// Not suitable for mass calculation
    pub fn annotated_with_fixed(&self, fixed: &FnvHashMap<u8, f32>) -> String {
        let mut s = String::with_capacity(self.len() * 4);
        for (idx, residue) in self.context.sequence.bytes().enumerate() {
            let mut mass = self
                .modifications
                .as_ref()
                .and_then(|m| m.get(idx))
                .unwrap_or_default();
            if let Some(f) = fixed.get(&residue).filter(|f| f.abs() > 0.01) {
                mass += f;
            }
            push_residue(&mut s, residue, (mass != 0.0).then_some(mass));
        }
        s
    }

    /// Preference between two scored peptides: `Greater` means `self` is the
    /// better explanation of the spectrum.
    ///
    /// Keys, in order: score, matched peaks, explained residue fraction,
    /// fewer modifications, upstream cross-correlation, target over decoy
    pub fn preference(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.matched_peaks.cmp(&other.matched_peaks))
            .then_with(|| self.explained_aa_frac.total_cmp(&other.explained_aa_frac))
            .then_with(|| other.modification_count().cmp(&self.modification_count()))
            .then_with(|| self.cross_corr.total_cmp(&other.cross_corr))
            .then_with(|| other.decoy().cmp(&self.decoy()))
    }
}

impl PartialEq for Peptide {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Peptide {}

impl Hash for Peptide {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl std::fmt::Display for Peptide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.annotated())
    }
}

fn push_residue(s: &mut String, residue: u8, mass: Option<f32>) {
    s.push(residue as char);
    if let Some(m) = mass {
        // Writing into a String cannot fail
        let _ = match m.is_sign_positive() {
            true => write!(s, "[+{}]", m),
            false => write!(s, "[{}]", m),
        };
    }
}

fn render(sequence: &str, mods: Option<&ModificationMap>) -> String {
    let mut s = String::with_capacity(sequence.len() * 2);
    for (idx, residue) in sequence.bytes().enumerate() {
        push_residue(&mut s, residue, mods.and_then(|m| m.get(idx)));
    }
    s
}

fn annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Z])(?:\[([+-]?[0-9]+(?:\.[0-9]+)?)\])?").expect("valid regex")
    })
}

/// Parse an annotated sequence back into its free sequence and
/// `(residue, position, mass)` triples
pub fn parse_modified(text: &str) -> Result<(String, Vec<(char, usize, f32)>), Error> {
    let mut sequence = String::with_capacity(text.len());
    let mut sites = Vec::new();
    let mut consumed = 0;

    for cap in annotation_regex().captures_iter(text) {
        let whole = cap.get(0).expect("capture 0 always exists");
        if whole.start() != consumed {
            return Err(Error::InvalidSequence(text.into()));
        }
        consumed = whole.end();

        let residue = cap[1].chars().next().expect("one residue per match");
        if let Some(mass) = cap.get(2) {
            let mass = mass
                .as_str()
                .parse::<f32>()
                .map_err(|_| Error::InvalidSequence(text.into()))?;
            sites.push((residue, sequence.len(), mass));
        }
        sequence.push(residue);
    }

    if consumed != text.len() {
        return Err(Error::InvalidSequence(text.into()));
    }
    Ok((sequence, sites))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    fn peptide(s: &str) -> Peptide {
        Peptide::new(
            Arc::new(Peptide0::new(s, false)),
            Arc::new(MassTool::new(Default::default(), 2)),
            0.0,
            1,
        )
    }

    #[test]
    fn render_annotations() {
        let mut p = peptide("PEPTIDE");
        assert_eq!(p.annotated(), "PEPTIDE");
        assert!(!p.is_modified());

        p.set_modifications([(3, 79.966), (6, -18.010565)].into_iter().collect());
        assert_eq!(p.annotated(), "PEPT[+79.966]IDE[-18.010565]");
        assert_eq!(p.modification_count(), 2);

        p.set_modifications(ModificationMap::default());
        assert!(!p.is_modified());
        assert_eq!(p.annotated(), "PEPTIDE");
    }

    #[test]
    fn derived_state_follows_modifications() {
        let mut p = peptide("PEPTIDE");
        let base = p.theoretical_mass();
        let b_ions = p.ion_matrix().b.clone();
        let generation = p.generation();

        p.set_modifications([(0, 42.010565)].into_iter().collect());
        assert_eq!(p.generation(), generation + 1);
        assert!((p.theoretical_mass() - base - 42.010565).abs() < 1e-3);
        assert!(p
            .ion_matrix()
            .b
            .iter()
            .zip(b_ions.iter())
            .all(|(new, old)| (new - old - 42.010565).abs() < 1e-3));
        assert!((p.unmodified_mass() - base).abs() < 1e-3);
    }

    #[test]
    fn identity_ignores_scores() {
        let mut a = peptide("PEPTIDE").variant([(1, 79.966)].into_iter().collect());
        let b = peptide("PEPTIDE").variant([(1, 79.966)].into_iter().collect());
        let c = peptide("PEPTIDE").variant([(3, 79.966)].into_iter().collect());
        a.score = 10.0;

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, peptide("PEPTIDE"));

        let set = [a, b, c].into_iter().collect::<HashSet<_>>();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn round_trip() {
        let mods: ModificationMap = [(0, 42.010565), (3, 79.96633), (6, -0.984)]
            .into_iter()
            .collect();
        let p = peptide("PEPTIDE").variant(mods.clone());
        let (sequence, sites) = parse_modified(p.annotated()).unwrap();
        assert_eq!(sequence, "PEPTIDE");
        assert_eq!(
            sites.iter().map(|s| s.0).collect::<String>(),
            "PTE".to_string()
        );
        let parsed: ModificationMap = sites.into_iter().map(|(_, pos, m)| (pos, m)).collect();
        assert_eq!(parsed, mods);
    }

    #[test]
    fn reject_malformed() {
        assert!(parse_modified("PEP[+1.0").is_err());
        assert!(parse_modified("pep").is_err());
        assert!(parse_modified("PE[x]P").is_err());
        assert_eq!(parse_modified("").unwrap(), (String::new(), vec![]));
    }

    #[test]
    fn fixed_annotation() {
        let p = peptide("ACMK").variant([(2, 15.9949)].into_iter().collect());
        let fixed = [(b'C', 57.02146), (b'K', 0.001)].into_iter().collect();
        assert_eq!(p.annotated_with_fixed(&fixed), "AC[+57.02146]M[+15.9949]K");
    }

    #[test]
    fn terminal_negative_modifications() {
        let map: ModificationMap = [(0, 15.995), (3, -17.026)].into_iter().collect();
        assert!(map.has_negative_terminal());
        let map: ModificationMap = [(0, 15.995), (2, -17.026), (3, 1.0)].into_iter().collect();
        assert!(!map.has_negative_terminal());
        assert!(!ModificationMap::default().has_negative_terminal());
    }

    #[test]
    fn preference_keys() {
        let mut a = peptide("PEPTIDE");
        let mut b = peptide("PEPTIDE").variant([(1, 1.0)].into_iter().collect());
        a.score = 1.0;
        b.score = 1.0;
        // Fewer modifications wins a tie
        assert_eq!(a.preference(&b), Ordering::Greater);

        b.matched_peaks = 3;
        assert_eq!(a.preference(&b), Ordering::Less);

        a.matched_peaks = 3;
        a.explained_aa_frac = 0.5;
        assert_eq!(a.preference(&b), Ordering::Greater);

        let mut target = peptide("PEPTIDE");
        let mut decoy = Peptide::new(
            Arc::new(Peptide0::new("EDITPEP", true)),
            Arc::new(MassTool::default()),
            0.0,
            1,
        );
        target.score = 2.0;
        decoy.score = 2.0;
        assert_eq!(target.preference(&decoy), Ordering::Greater);
        assert_eq!(target.preference(&target.clone()), Ordering::Equal);
    }
}
