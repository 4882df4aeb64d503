use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use log::info;
use locus_core::candidates::CandidateTable;
use locus_core::mass::MassTool;
use locus_core::modification::ModificationCatalog;
use locus_core::scoring::SharedPeakScorer;
use locus_core::spectrum::{SharedReader, SpectrumProcessor};
use locus_core::store::MemoryStore;
use locus_core::task::{Summary, TaskRunner};

use crate::input::Search;
use crate::mgf::MgfReader;

pub struct Runner {
    pub parameters: Search,
    catalog: ModificationCatalog,
    candidates: CandidateTable,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();
        let catalog = parameters.catalog();
        let tool = Arc::new(MassTool::new(
            catalog.fixed().clone(),
            parameters.max_fragment_charge,
        ));

        let candidates = CandidateTable::load(&parameters.candidates_path, tool)
            .with_context(|| format!("Failed to load candidates from `{}`", parameters.candidates_path))?;
        info!(
            "loaded {} candidate peptides in {:#?}",
            candidates.peptides().len(),
            start.elapsed()
        );

        Ok(Self {
            parameters,
            catalog,
            candidates,
            start,
        })
    }

    // Create a path for `file_name` in the specified output directory, if it exists,
    // otherwise, write to current directory
    pub fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    pub fn run(mut self) -> anyhow::Result<Summary> {
        let start = Instant::now();
        let mgf = MgfReader::open(&self.parameters.mgf_path)
            .with_context(|| format!("Failed to index `{}`", self.parameters.mgf_path))?;
        let entries = mgf.entries().to_vec();
        info!(
            "- indexed {} spectra from {} in {} ms",
            entries.len(),
            self.parameters.mgf_path,
            start.elapsed().as_millis()
        );

        // Every spectrum gets a row before any task can write to it
        let store = MemoryStore::default();
        for entry in &entries {
            store.register(entry.scan);
        }

        let reader = SharedReader::new(mgf);
        let processor = SpectrumProcessor::new(
            self.parameters.max_peaks,
            self.parameters.min_fragment_mz,
            self.parameters.max_fragment_mz,
            self.parameters.fragment_tol,
        );
        let scorer = SharedPeakScorer::new(self.parameters.fragment_tol);

        let summary = TaskRunner {
            reader: &reader,
            preprocessor: &processor,
            source: &self.candidates,
            scorer: &scorer,
            store: &store,
            catalog: &self.catalog,
            settings: self.parameters.task_settings(),
        }
        .run_all(&entries);

        if summary.failed > 0 {
            log::warn!("{} spectra could not be searched", summary.failed);
        }
        info!(
            "- {} of {} spectra identified ({} without a match)",
            summary.identified,
            summary.total(),
            store.unfilled()
        );

        let psms = store.rows();
        let path = self.write_psms(&psms)?;
        self.parameters.output_paths.push(path.display().to_string());

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);
        self.write_parameters()?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(summary)
    }
}
