use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use locus_core::{
    expand::MAX_VARIABLE_MODS,
    mass::Tolerance,
    modification::{ModificationCatalog, ValueOrVec},
    task::TaskSettings,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
/// Actual search parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub precursor_tol: Tolerance,
    pub fragment_tol: f32,
    pub max_fragment_charge: u8,
    pub static_mods: BTreeMap<String, f32>,
    pub variable_mods: BTreeMap<String, ValueOrVec>,
    pub max_variable_mods: usize,
    pub report_top_k: usize,
    pub min_peaks: usize,
    pub max_peaks: usize,
    pub min_fragment_mz: f32,
    pub max_fragment_mz: f32,
    pub mgf_path: String,
    pub candidates_path: String,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize)]
/// Input search parameters deserialized from JSON file
pub struct Input {
    precursor_tol: Option<Tolerance>,
    fragment_tol: Option<f32>,
    max_fragment_charge: Option<u8>,
    static_mods: Option<HashMap<String, f32>>,
    variable_mods: Option<HashMap<String, ValueOrVec>>,
    max_variable_mods: Option<usize>,
    report_top_k: Option<usize>,
    min_peaks: Option<usize>,
    max_peaks: Option<usize>,
    min_fragment_mz: Option<f32>,
    max_fragment_mz: Option<f32>,
    mgf_path: Option<String>,
    candidates_path: Option<String>,
    output_directory: Option<String>,
}

impl Search {
    pub fn catalog(&self) -> ModificationCatalog {
        ModificationCatalog::from_config(
            Some(self.static_mods.clone().into_iter().collect()),
            Some(self.variable_mods.clone().into_iter().collect()),
        )
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            precursor_tol: self.precursor_tol,
            fragment_tol: self.fragment_tol,
            max_variable_mods: self.max_variable_mods,
            top_k: self.report_top_k,
            min_peaks: self.min_peaks,
        }
    }
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("`parameters` must be set")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(candidates) = matches.get_one::<String>("candidates") {
            log::trace!("overriding `candidates_path` parameter.");
            input.candidates_path = Some(candidates.into());
        }
        if let Some(mgf) = matches.get_one::<String>("mgf") {
            log::trace!("overriding `mgf_path` parameter.");
            input.mgf_path = Some(mgf.into());
        }

        // avoid failing halfway through the run (but doesn't check if files exist)
        ensure!(
            input.mgf_path.is_some(),
            "`mgf_path` must be set. For more information try '--help'"
        );
        ensure!(
            input.candidates_path.is_some(),
            "`candidates_path` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        locus_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    fn check_tolerances(tolerance: &Tolerance) {
        let (lo, hi) = match tolerance {
            Tolerance::Ppm(lo, hi) | Tolerance::Da(lo, hi) => (lo, hi),
        };
        if hi.abs() > lo.abs() {
            log::warn!(
                "Tolerances are applied to experimental masses, not theoretical: [{} - {}]",
                lo,
                hi
            );
        }
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let precursor_tol = self.precursor_tol.unwrap_or(Tolerance::Ppm(-10.0, 10.0));
        Self::check_tolerances(&precursor_tol);

        let fragment_tol = self.fragment_tol.unwrap_or(0.02).abs();
        ensure!(fragment_tol > 0.0, "`fragment_tol` must be greater than 0");

        let max_variable_mods = self.max_variable_mods.unwrap_or(MAX_VARIABLE_MODS);
        if max_variable_mods > MAX_VARIABLE_MODS {
            log::warn!(
                "`max_variable_mods` is {}: candidate expansion grows combinatorially above {}",
                max_variable_mods,
                MAX_VARIABLE_MODS
            );
        }

        let report_top_k = self.report_top_k.unwrap_or(5);
        ensure!(report_top_k > 0, "`report_top_k` must be at least 1");

        let min_peaks = self.min_peaks.unwrap_or(10);
        let max_peaks = self.max_peaks.unwrap_or(150);
        if min_peaks > max_peaks {
            log::warn!(
                "`min_peaks` ({}) is greater than `max_peaks` ({}): no spectrum will be searched",
                min_peaks,
                max_peaks
            );
        }

        let min_fragment_mz = self.min_fragment_mz.unwrap_or(100.0);
        let max_fragment_mz = self.max_fragment_mz.unwrap_or(2000.0);
        ensure!(
            min_fragment_mz < max_fragment_mz,
            "`min_fragment_mz` must be less than `max_fragment_mz`"
        );

        let mgf_path = self.mgf_path.context("`mgf_path` must be provided")?;
        let candidates_path = self
            .candidates_path
            .context("`candidates_path` must be provided")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            precursor_tol,
            fragment_tol,
            max_fragment_charge: self.max_fragment_charge.unwrap_or(2).max(1),
            static_mods: self.static_mods.unwrap_or_default().into_iter().collect(),
            variable_mods: self.variable_mods.unwrap_or_default().into_iter().collect(),
            max_variable_mods,
            report_top_k,
            min_peaks,
            max_peaks,
            min_fragment_mz,
            max_fragment_mz,
            mgf_path,
            candidates_path,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
