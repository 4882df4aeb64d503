//! Random access to MGF peak lists.
//!
//! Opening a file makes a single pass that records the byte offset of every
//! `BEGIN IONS` block along with its precursor header. Peaks are only parsed
//! when a task asks for them, by seeking straight to the block.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use fnv::FnvHashMap;
use locus_core::spectrum::{Peak, SpectrumEntry, SpectrumReader};
use regex::Regex;

#[derive(thiserror::Error, Debug)]
pub enum MgfError {
    #[error("malformed MGF at byte {offset}: {reason}")]
    Malformed { offset: u64, reason: &'static str },
    #[error("scan {0} is not present in the MGF index")]
    UnknownScan(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header fields collected for the block currently being indexed
#[derive(Default)]
struct Block {
    offset: u64,
    title: Option<String>,
    scan: Option<usize>,
    precursor_mz: Option<f32>,
    precursor_charge: Option<u8>,
}

pub struct MgfReader<R> {
    reader: BufReader<R>,
    offsets: FnvHashMap<usize, u64>,
    entries: Vec<SpectrumEntry>,
}

impl MgfReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MgfError> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> MgfReader<R> {
    /// Index every block of `inner`. Blocks without a precursor m/z or
    /// charge cannot be searched and are skipped with a warning. Blocks
    /// without a `SCANS=` line are numbered by their position, from 1.
    pub fn new(inner: R) -> Result<Self, MgfError> {
        let charge = Regex::new(r"(\d+)([+-]?)").expect("valid regex");
        let mut reader = BufReader::new(inner);
        reader.seek(SeekFrom::Start(0))?;

        let mut offsets = FnvHashMap::default();
        let mut entries = Vec::new();
        let mut skipped = 0;

        let mut line = String::new();
        let mut offset = 0u64;
        let mut ordinal = 0;
        let mut block: Option<Block> = None;

        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            let start = offset;
            offset += n as u64;
            let text = line.trim();

            if text == "BEGIN IONS" {
                if block.is_some() {
                    return Err(MgfError::Malformed {
                        offset: start,
                        reason: "nested BEGIN IONS",
                    });
                }
                ordinal += 1;
                block = Some(Block {
                    offset: start,
                    ..Default::default()
                });
                continue;
            }

            if text == "END IONS" {
                if let Some(done) = block.take() {
                    let scan = done.scan.unwrap_or(ordinal);
                    match (done.precursor_mz, done.precursor_charge) {
                        (Some(precursor_mz), Some(precursor_charge)) => {
                            if offsets.insert(scan, done.offset).is_some() {
                                log::warn!("duplicate MGF scan {}, keeping the last block", scan);
                                entries.retain(|e: &SpectrumEntry| e.scan != scan);
                            }
                            entries.push(SpectrumEntry {
                                scan,
                                title: done.title.unwrap_or_default(),
                                precursor_mz,
                                precursor_charge,
                            });
                        }
                        _ => skipped += 1,
                    }
                }
                continue;
            }

            let current = match block.as_mut() {
                Some(current) => current,
                None => continue,
            };

            if let Some(title) = text.strip_prefix("TITLE=") {
                current.title = Some(title.to_string());
            } else if let Some(scans) = text.strip_prefix("SCANS=") {
                current.scan = scans.split('-').next().and_then(|s| s.trim().parse().ok());
            } else if let Some(pepmass) = text.strip_prefix("PEPMASS=") {
                current.precursor_mz = pepmass
                    .split_ascii_whitespace()
                    .next()
                    .and_then(|mz| mz.parse().ok());
            } else if let Some(z) = text.strip_prefix("CHARGE=") {
                current.precursor_charge = charge
                    .captures(z)
                    .and_then(|c| c.get(1))
                    .and_then(|c| c.as_str().parse().ok());
            }
        }

        if block.is_some() {
            return Err(MgfError::Malformed {
                offset,
                reason: "missing END IONS",
            });
        }
        if skipped > 0 {
            log::warn!("skipped {} MGF blocks without precursor m/z or charge", skipped);
        }

        Ok(Self {
            reader,
            offsets,
            entries,
        })
    }

    /// Indexed spectra, in file order
    pub fn entries(&self) -> &[SpectrumEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the peak lines of the block for `scan`
    pub fn peaks(&mut self, scan: usize) -> Result<Vec<Peak>, MgfError> {
        let mut offset = *self.offsets.get(&scan).ok_or(MgfError::UnknownScan(scan))?;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut peaks = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Err(MgfError::Malformed {
                    offset,
                    reason: "missing END IONS",
                });
            }
            let text = line.trim();
            if text == "END IONS" {
                break;
            }
            if text.starts_with(|c: char| c.is_ascii_digit()) {
                let mut fields = text.split_ascii_whitespace();
                let mz = fields.next().and_then(|s| s.parse::<f32>().ok());
                let intensity = fields.next().and_then(|s| s.parse::<f32>().ok());
                match (mz, intensity) {
                    (Some(mz), Some(intensity)) => peaks.push(Peak { mz, intensity }),
                    _ => {
                        return Err(MgfError::Malformed {
                            offset,
                            reason: "expected `m/z intensity`",
                        })
                    }
                }
            }
            offset += n as u64;
        }
        Ok(peaks)
    }
}

impl<R: Read + Seek + Send> SpectrumReader for MgfReader<R> {
    fn read(&mut self, entry: &SpectrumEntry) -> Result<Vec<Peak>, locus_core::Error> {
        self.peaks(entry.scan)
            .map_err(|e| locus_core::Error::SpectrumRead {
                spectrum: entry.scan,
                reason: e.to_string(),
            })
    }
}
