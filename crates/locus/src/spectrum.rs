use std::cmp::Ordering;
use std::sync::Mutex;

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::mass::{Tolerance, PROTON};
use crate::Error;

/// A centroided fragment peak
#[derive(PartialEq, PartialOrd, Copy, Clone, Default, Debug, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f32,
    pub intensity: f32,
}

/// Precursor information for one MS2 scan, known before its peaks are read
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumEntry {
    /// Spectrum identifier, unique within a run
    pub scan: usize,
    #[serde(default)]
    pub title: String,
    pub precursor_mz: f32,
    pub precursor_charge: u8,
}

impl SpectrumEntry {
    /// Neutral precursor mass
    pub fn precursor_mass(&self) -> f32 {
        (self.precursor_mz - PROTON) * self.precursor_charge.max(1) as f32
    }
}

#[derive(Clone, Default, Debug)]
pub struct ProcessedSpectrum {
    pub scan: usize,
    /// Peaks sorted by m/z, no two closer than the fragment tolerance
    pub peaks: Vec<Peak>,
    /// Square-root intensities binned by m/z, scaled to unit length
    pub vector: FnvHashMap<i32, f32>,
    pub bin_width: f32,
    pub total_intensity: f32,
}

impl ProcessedSpectrum {
    pub fn bin(&self, mz: f32) -> i32 {
        bin(mz, self.bin_width)
    }
}

#[inline]
pub fn bin(mz: f32, width: f32) -> i32 {
    (mz / width).round() as i32
}

/// Turns a raw peak list into something a [`crate::scoring::Scorer`] can use
pub trait Preprocessor: Sync {
    fn process(&self, entry: &SpectrumEntry, peaks: Vec<Peak>) -> ProcessedSpectrum;
}

pub struct SpectrumProcessor {
    pub take_top_n: usize,
    pub min_fragment_mz: f32,
    pub max_fragment_mz: f32,
    /// Fragment tolerance in Da, also used as the bin width
    pub tolerance: f32,
}

impl SpectrumProcessor {
    /// Create a new [`SpectrumProcessor`]
    ///
    /// # Arguments
    /// * `take_top_n`: Keep only the top N most intense peaks from the spectrum
    /// * `min_fragment_mz`: Keep only fragments >= this m/z
    /// * `max_fragment_mz`: Keep only fragments <= this m/z
    /// * `tolerance`: Merge peaks closer than this, in Da
    pub fn new(take_top_n: usize, min_fragment_mz: f32, max_fragment_mz: f32, tolerance: f32) -> Self {
        Self {
            take_top_n,
            min_fragment_mz,
            max_fragment_mz,
            tolerance,
        }
    }
}

impl Preprocessor for SpectrumProcessor {
    fn process(&self, entry: &SpectrumEntry, peaks: Vec<Peak>) -> ProcessedSpectrum {
        let mut peaks = peaks
            .into_iter()
            .filter(|peak| {
                peak.intensity > 0.0
                    && peak.mz >= self.min_fragment_mz
                    && peak.mz <= self.max_fragment_mz
            })
            .collect::<Vec<_>>();
        peaks.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        peaks.truncate(self.take_top_n);
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));

        // Within the tolerance, only the most intense peak survives
        let mut dedup: Vec<Peak> = Vec::with_capacity(peaks.len());
        for peak in peaks {
            match dedup.last_mut() {
                Some(last) if peak.mz - last.mz <= self.tolerance => {
                    if peak.intensity > last.intensity {
                        *last = peak;
                    }
                }
                _ => dedup.push(peak),
            }
        }

        let mut vector: FnvHashMap<i32, f32> = FnvHashMap::default();
        for peak in &dedup {
            *vector.entry(bin(peak.mz, self.tolerance)).or_default() += peak.intensity.sqrt();
        }
        let norm = vector.values().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.values_mut().for_each(|v| *v /= norm);
        }

        let total_intensity = dedup.iter().map(|peak| peak.intensity).sum::<f32>();
        ProcessedSpectrum {
            scan: entry.scan,
            peaks: dedup,
            vector,
            bin_width: self.tolerance,
            total_intensity,
        }
    }
}

/// Return the indices `(lo, hi)` of the range of `slice` whose keys fall
/// within `[low, high]`. The range may include a few items outside the
/// bounds, and must be filtered by the caller
pub fn binary_search_slice<T, F, S>(slice: &[T], key: F, low: S, high: S) -> (usize, usize)
where
    F: Fn(&T, &S) -> Ordering,
{
    let left_idx = match slice.binary_search_by(|a| key(a, &low)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx.saturating_sub(1);
            while idx > 0 && key(&slice[idx], &low) != Ordering::Less {
                idx -= 1;
            }
            idx
        }
    };

    let right_idx = match slice[left_idx..].binary_search_by(|a| key(a, &high)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx + left_idx;
            while idx < slice.len() && key(&slice[idx], &high) != Ordering::Greater {
                idx = idx.saturating_add(1);
            }
            idx.min(slice.len())
        }
    };
    (left_idx, right_idx)
}

/// Binary search followed by linear search to select the closest peak to `mz` within `tolerance` window
pub fn select_closest_peak(peaks: &[Peak], mz: f32, tolerance: Tolerance) -> Option<&Peak> {
    let (lo, hi) = tolerance.bounds(mz);
    let (i, j) = binary_search_slice(peaks, |peak, query| peak.mz.total_cmp(query), lo, hi);

    let mut best_peak = None;
    let mut min_eps = f32::MAX;
    for peak in peaks[i..j]
        .iter()
        .filter(|peak| peak.mz >= lo && peak.mz <= hi)
    {
        let eps = (peak.mz - mz).abs();
        if eps <= min_eps {
            min_eps = eps;
            best_peak = Some(peak);
        }
    }
    best_peak
}

/// Source of raw peak lists. Implementations need not be thread safe, see
/// [`SharedReader`]
pub trait SpectrumReader: Send {
    fn read(&mut self, entry: &SpectrumEntry) -> Result<Vec<Peak>, Error>;
}

/// Serializes access to a [`SpectrumReader`] across worker threads
pub struct SharedReader<R> {
    inner: Mutex<R>,
}

impl<R: SpectrumReader> SharedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(reader),
        }
    }

    /// Read the peaks of `entry`. The lock is held only for the read itself
    pub fn fetch(&self, entry: &SpectrumEntry) -> Result<Vec<Peak>, Error> {
        let mut reader = self.inner.lock().map_err(|_| Error::SpectrumRead {
            spectrum: entry.scan,
            reason: "spectrum reader lock poisoned".into(),
        })?;
        reader.read(entry)
    }

    pub fn into_inner(self) -> Option<R> {
        self.inner.into_inner().ok()
    }
}

/// Peak lists held in memory, keyed by scan
#[derive(Default, Debug, Clone)]
pub struct MemoryReader {
    spectra: FnvHashMap<usize, Vec<Peak>>,
    reads: usize,
}

impl MemoryReader {
    pub fn insert(&mut self, scan: usize, peaks: Vec<Peak>) {
        self.spectra.insert(scan, peaks);
    }

    /// Number of successful reads so far
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl FromIterator<(usize, Vec<Peak>)> for MemoryReader {
    fn from_iter<T: IntoIterator<Item = (usize, Vec<Peak>)>>(iter: T) -> Self {
        Self {
            spectra: iter.into_iter().collect(),
            reads: 0,
        }
    }
}

impl SpectrumReader for MemoryReader {
    fn read(&mut self, entry: &SpectrumEntry) -> Result<Vec<Peak>, Error> {
        let peaks = self
            .spectra
            .get(&entry.scan)
            .cloned()
            .ok_or_else(|| Error::SpectrumRead {
                spectrum: entry.scan,
                reason: "no such scan".into(),
            })?;
        self.reads += 1;
        Ok(peaks)
    }
}
