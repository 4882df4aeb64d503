use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::ion_series::{IonMatrix, IonSeries, Kind};
use crate::peptide::ModificationMap;

pub const H2O: f32 = 18.010565;
pub const PROTON: f32 = 1.0072764;

/// Fixed modifications at or below this magnitude leave a residue eligible
/// for an unknown modification
pub const FIXED_MOD_THRESHOLD: f32 = 0.1;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f32, f32),
    Da(f32, f32),
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in Da) for for a monoisotopic
    /// mass and a given tolerance
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    pub fn contains(&self, center: f32, rhs: f32) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }
}

pub trait Mass {
    fn monoisotopic(&self) -> f32;
}

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

impl Mass for u8 {
    fn monoisotopic(&self) -> f32 {
        match self {
            b'A' => 71.03711,
            b'R' => 156.1011,
            b'N' => 114.04293,
            b'D' => 115.02694,
            b'C' => 103.00919,
            b'E' => 129.04259,
            b'Q' => 128.05858,
            b'G' => 57.02146,
            b'H' => 137.05891,
            b'I' => 113.08406,
            b'L' => 113.08406,
            b'K' => 128.09496,
            b'M' => 131.0405,
            b'F' => 147.0684,
            b'P' => 97.05276,
            b'S' => 87.03203,
            b'T' => 101.04768,
            b'W' => 186.07931,
            b'Y' => 163.06333,
            b'V' => 99.06841,
            b'U' => 150.95363,
            b'O' => 237.14773,
            _ => unreachable!("BUG: invalid amino acid {}", *self as char),
        }
    }
}

/// Residue masses with fixed modifications folded in. Shared by every
/// [`crate::peptide::Peptide`] built during a run.
#[derive(Clone, Debug, Default)]
pub struct MassTool {
    fixed: FnvHashMap<u8, f32>,
    pub max_fragment_charge: u8,
}

impl MassTool {
    pub fn new(fixed: FnvHashMap<u8, f32>, max_fragment_charge: u8) -> Self {
        Self {
            fixed,
            max_fragment_charge: max_fragment_charge.max(1),
        }
    }

    pub fn fixed(&self) -> &FnvHashMap<u8, f32> {
        &self.fixed
    }

    pub fn fixed_mass(&self, residue: u8) -> f32 {
        self.fixed.get(&residue).copied().unwrap_or_default()
    }

    /// Does this residue carry a (non-negligible) fixed modification?
    pub fn is_fixed_modified(&self, residue: u8) -> bool {
        self.fixed_mass(residue).abs() > FIXED_MOD_THRESHOLD
    }

    pub fn residue_mass(&self, residue: u8) -> f32 {
        residue.monoisotopic() + self.fixed_mass(residue)
    }

    /// Per-residue masses, including fixed and variable modifications
    pub fn residue_masses(&self, sequence: &str, mods: Option<&ModificationMap>) -> Vec<f32> {
        let mut masses = sequence
            .bytes()
            .map(|r| self.residue_mass(r))
            .collect::<Vec<_>>();
        if let Some(mods) = mods {
            for (coord, mass) in mods.iter() {
                if let Some(m) = masses.get_mut(coord.start) {
                    *m += mass;
                }
            }
        }
        masses
    }

    /// Neutral monoisotopic mass of a (possibly modified) peptide
    pub fn peptide_mass(&self, sequence: &str, mods: Option<&ModificationMap>) -> f32 {
        self.residue_masses(sequence, mods).iter().sum::<f32>() + H2O
    }

    pub fn ion_matrix(&self, sequence: &str, mods: Option<&ModificationMap>) -> IonMatrix {
        let residues = self.residue_masses(sequence, mods);
        IonMatrix {
            b: IonSeries::new(&residues, Kind::B)
                .map(|ion| ion.monoisotopic_mass)
                .collect(),
            y: IonSeries::new(&residues, Kind::Y)
                .map(|ion| ion.monoisotopic_mass)
                .collect(),
            max_charge: self.max_fragment_charge,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smoke() {
        for ch in VALID_AA {
            assert!(ch.monoisotopic() > 0.0);
        }
    }

    #[test]
    fn tolerances() {
        assert_eq!(
            Tolerance::Ppm(-10.0, 20.0).bounds(1000.0),
            (999.99, 1000.02)
        );
        assert_eq!(
            Tolerance::Ppm(-50.0, 50.0).bounds(1000.0),
            (999.95, 1000.05)
        );
        assert!(Tolerance::Da(-0.5, 0.5).contains(1000.0, 1000.4));
        assert!(!Tolerance::Da(-0.5, 0.5).contains(1000.0, 1000.6));
    }

    #[test]
    fn fixed_mods() {
        let mut fixed = FnvHashMap::default();
        fixed.insert(b'C', 57.02146);
        fixed.insert(b'K', 0.05);
        let tool = MassTool::new(fixed, 2);

        assert!(tool.is_fixed_modified(b'C'));
        assert!(!tool.is_fixed_modified(b'K'));
        assert!(!tool.is_fixed_modified(b'A'));
        assert!((tool.residue_mass(b'C') - 160.03065).abs() < 1e-3);

        let mass = tool.peptide_mass("PEPTIDE", None);
        assert!((mass - 799.35996).abs() < 0.01, "{}", mass);
    }

    #[test]
    fn variable_mods_add_mass() {
        let tool = MassTool::default();
        let mut mods = ModificationMap::default();
        mods.insert(3, 79.96633);
        let base = tool.peptide_mass("PEPTIDE", None);
        let modified = tool.peptide_mass("PEPTIDE", Some(&mods));
        assert!((modified - base - 79.96633).abs() < 1e-3);
    }
}
