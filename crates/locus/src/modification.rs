use std::collections::HashMap;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::mass::VALID_AA;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ValueOrVec {
    Value(f32),
    Vec(Vec<f32>),
}

impl ValueOrVec {
    fn into_vec(self) -> Vec<f32> {
        match self {
            ValueOrVec::Value(v) => vec![v],
            ValueOrVec::Vec(v) => v,
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidModification {
    #[error("empty residue specification")]
    Empty,
    #[error("unrecognized residue ({0})")]
    InvalidResidue(char),
}

/// Parse a residue specification such as `"M"` or `"STY"`
pub fn parse_residues(s: &str) -> Result<Vec<u8>, InvalidModification> {
    if s.is_empty() {
        return Err(InvalidModification::Empty);
    }
    s.chars()
        .map(|c| {
            if c.is_ascii() && VALID_AA.contains(&(c as u8)) {
                Ok(c as u8)
            } else {
                Err(InvalidModification::InvalidResidue(c))
            }
        })
        .collect()
}

/// A known variable modification: `mass` may be placed on `residue`
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct VariableMod {
    pub residue: u8,
    pub mass: f32,
}

/// Known variable and fixed modifications, as configured for the index
#[derive(Clone, Debug, Default)]
pub struct ModificationCatalog {
    variable: Vec<VariableMod>,
    fixed: FnvHashMap<u8, f32>,
}

impl ModificationCatalog {
    pub fn new(mut variable: Vec<VariableMod>, fixed: FnvHashMap<u8, f32>) -> Self {
        // Stable order keeps candidate expansion deterministic
        variable.sort_by(|a, b| {
            a.residue
                .cmp(&b.residue)
                .then_with(|| a.mass.total_cmp(&b.mass))
        });
        variable.dedup_by(|a, b| a.residue == b.residue && a.mass.to_bits() == b.mass.to_bits());
        Self { variable, fixed }
    }

    /// Build a catalog from user-supplied maps, logging and skipping invalid entries
    pub fn from_config(
        static_mods: Option<HashMap<String, f32>>,
        variable_mods: Option<HashMap<String, ValueOrVec>>,
    ) -> Self {
        let mut fixed = FnvHashMap::default();
        for (s, mass) in static_mods.unwrap_or_default() {
            match parse_residues(&s) {
                Ok(residues) => {
                    for r in residues {
                        fixed.insert(r, mass);
                    }
                }
                Err(e) => log::error!("Skipping invalid static modification `{}`: {}", s, e),
            }
        }

        let mut variable = Vec::new();
        for (s, masses) in variable_mods.unwrap_or_default() {
            match parse_residues(&s) {
                Ok(residues) => {
                    let masses = masses.into_vec();
                    for residue in residues {
                        variable.extend(masses.iter().map(|&mass| VariableMod { residue, mass }));
                    }
                }
                Err(e) => log::error!("Skipping invalid variable modification `{}`: {}", s, e),
            }
        }

        Self::new(variable, fixed)
    }

    pub fn variable(&self) -> &[VariableMod] {
        &self.variable
    }

    pub fn fixed(&self) -> &FnvHashMap<u8, f32> {
        &self.fixed
    }

    /// Variable modification masses applicable to `residue`
    pub fn masses_for(&self, residue: u8) -> impl Iterator<Item = f32> + '_ {
        self.variable
            .iter()
            .filter(move |m| m.residue == residue)
            .map(|m| m.mass)
    }

    /// Is `mass` explained by a single known variable modification?
    pub fn is_known_mass(&self, mass: f32, tolerance: f32) -> bool {
        self.variable
            .iter()
            .any(|m| (m.mass - mass).abs() <= tolerance)
    }
}
