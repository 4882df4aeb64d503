pub mod candidates;
pub mod expand;
pub mod heap;
pub mod ion_series;
pub mod mass;
pub mod modification;
pub mod peptide;
pub mod scoring;
pub mod spectrum;
pub mod store;
pub mod task;
pub mod tracker;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The placeholder row for a spectrum was never created
    #[error("no result row exists for spectrum {spectrum}")]
    Integrity { spectrum: usize },
    #[error("failed to read spectrum {spectrum}: {reason}")]
    SpectrumRead { spectrum: usize, reason: String },
    #[error("invalid peptide sequence `{0}`")]
    InvalidSequence(String),
    #[error("invalid modification: {0}")]
    InvalidModification(#[from] modification::InvalidModification),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
