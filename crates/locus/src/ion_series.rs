use serde::{Deserialize, Serialize};

use crate::mass::{H2O, PROTON};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    B,
    Y,
}

/// Theoretical B/Y ion
#[derive(Copy, Clone, Debug)]
pub struct Ion {
    /// B or Y ion
    pub kind: Kind,
    /// Neutral fragment mass (no charge)
    pub monoisotopic_mass: f32,
}

/// Generate B/Y ions from a list of (already modified) residue masses.
///
/// Both series yield one ion per cleavage site, so the `n`th item of either
/// series corresponds to the bond between residue `n` and residue `n + 1`
pub struct IonSeries<'p> {
    pub kind: Kind,
    cumulative_mass: f32,
    residues: &'p [f32],
    idx: usize,
}

impl<'p> IonSeries<'p> {
    pub fn new(residues: &'p [f32], kind: Kind) -> Self {
        let cumulative_mass = match kind {
            Kind::B => 0.0,
            Kind::Y => residues.iter().sum::<f32>() + H2O,
        };
        Self {
            kind,
            cumulative_mass,
            residues,
            idx: 0,
        }
    }
}

impl<'p> Iterator for IonSeries<'p> {
    type Item = Ion;

    // Memoize cumulative mass of the fragment for fast ion generation
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx + 1 >= self.residues.len() {
            return None;
        }
        let r = self.residues.get(self.idx)?;

        self.cumulative_mass += match self.kind {
            Kind::B => *r,
            Kind::Y => -*r,
        };
        self.idx += 1;

        Some(Ion {
            kind: self.kind,
            monoisotopic_mass: self.cumulative_mass,
        })
    }
}

/// Neutral b/y ladders of a fully specified peptide, indexed by cleavage site
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IonMatrix {
    pub b: Vec<f32>,
    pub y: Vec<f32>,
    pub max_charge: u8,
}

impl IonMatrix {
    /// Number of cleavage sites
    pub fn sites(&self) -> usize {
        self.b.len()
    }

    /// Iterate over `(kind, site, m/z)` for all fragment charges below
    /// `precursor_charge` (at least 1), capped at `max_charge`
    pub fn fragments(&self, precursor_charge: u8) -> impl Iterator<Item = (Kind, usize, f32)> + '_ {
        let max_charge = precursor_charge
            .saturating_sub(1)
            .clamp(1, self.max_charge.max(1));
        (1..=max_charge).flat_map(move |charge| {
            let b = self
                .b
                .iter()
                .enumerate()
                .map(move |(site, mass)| (Kind::B, site, mz(*mass, charge)));
            let y = self
                .y
                .iter()
                .enumerate()
                .map(move |(site, mass)| (Kind::Y, site, mz(*mass, charge)));
            b.chain(y)
        })
    }
}

#[inline]
pub fn mz(neutral: f32, charge: u8) -> f32 {
    (neutral + charge as f32 * PROTON) / charge as f32
}
