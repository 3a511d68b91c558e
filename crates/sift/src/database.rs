use crate::mass::Tolerance;
use crate::Error;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PeptideIx(pub u32);

impl PeptideIx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Decoy sequences are marked by a lowercase final residue
pub fn is_decoy(sequence: &str) -> bool {
    sequence
        .chars()
        .last()
        .map(|c| c.is_lowercase())
        .unwrap_or(false)
}

#[derive(Deserialize, Serialize, Default, Clone, Debug)]
/// Theoretical peptides as produced by an (external) digestion & fragmentation
/// step, one entry per peptide
pub struct Builder {
    pub precursor_masses: Vec<f32>,
    pub fragment_masses: Vec<Vec<f32>>,
    /// Signed ion numbers: positive for b-ions, negative for y-ions
    pub fragment_types: Vec<Vec<i16>>,
    /// Predicted fragment intensities, if available
    pub fragment_intensities: Option<Vec<Vec<f32>>>,
    pub sequences: Vec<String>,
}

struct Entry {
    precursor_mass: f32,
    fragments: Vec<(f32, i16, f32)>,
    sequence: String,
}

impl Builder {
    fn check_alignment(&self) -> Result<(), Error> {
        let n = self.precursor_masses.len();
        if self.fragment_masses.len() != n
            || self.fragment_types.len() != n
            || self.sequences.len() != n
        {
            return Err(Error::Shape(format!(
                "database columns are not aligned: {} precursors, {} fragment rows, {} type rows, {} sequences",
                n,
                self.fragment_masses.len(),
                self.fragment_types.len(),
                self.sequences.len()
            )));
        }
        if let Some(intensities) = &self.fragment_intensities {
            if intensities.len() != n {
                return Err(Error::Shape(format!(
                    "database has {} precursors but {} intensity rows",
                    n,
                    intensities.len()
                )));
            }
        }
        for (idx, (masses, types)) in self
            .fragment_masses
            .iter()
            .zip(&self.fragment_types)
            .enumerate()
        {
            let intensities = self
                .fragment_intensities
                .as_ref()
                .map(|rows| rows[idx].len())
                .unwrap_or(masses.len());
            if masses.len() != types.len() || masses.len() != intensities {
                return Err(Error::Shape(format!(
                    "fragment row {} has {} masses, {} types and {} intensities",
                    idx,
                    masses.len(),
                    types.len(),
                    intensities
                )));
            }
        }
        Ok(())
    }

    /// Validate the input, sort entries by precursor mass (and each fragment
    /// row by fragment mass) and lay fragments out as a fixed-width matrix
    pub fn build(self) -> Result<Database, Error> {
        self.check_alignment()?;
        let has_intensities = self.fragment_intensities.is_some();
        let mut intensities = self
            .fragment_intensities
            .map(|rows| rows.into_iter().map(Some).collect::<Vec<_>>())
            .unwrap_or_else(|| vec![None; self.precursor_masses.len()]);

        let mut entries = self
            .precursor_masses
            .into_iter()
            .zip(self.fragment_masses)
            .zip(self.fragment_types)
            .zip(self.sequences)
            .zip(intensities.drain(..))
            .map(|((((precursor_mass, masses), types), sequence), ints)| {
                let ints = ints.unwrap_or_else(|| vec![0.0; masses.len()]);
                let mut fragments = masses
                    .into_iter()
                    .zip(types)
                    .zip(ints)
                    .map(|((m, t), i)| (m, t, i))
                    .collect::<Vec<_>>();
                fragments.sort_by(|a, b| a.0.total_cmp(&b.0));
                Entry {
                    precursor_mass,
                    fragments,
                    sequence,
                }
            })
            .collect::<Vec<_>>();

        // Stable, so that equal-mass entries keep their input order
        entries.par_sort_by(|a, b| a.precursor_mass.total_cmp(&b.precursor_mass));

        let width = entries
            .iter()
            .map(|entry| entry.fragments.len())
            .max()
            .unwrap_or(0);

        let mut db = Database {
            precursor_masses: Vec::with_capacity(entries.len()),
            fragment_masses: vec![0.0; entries.len() * width],
            fragment_types: vec![0; entries.len() * width],
            fragment_intensities: has_intensities.then(|| vec![0.0; entries.len() * width]),
            bounds: Vec::with_capacity(entries.len()),
            width,
            sequences: Vec::with_capacity(entries.len()),
        };

        for (row, entry) in entries.into_iter().enumerate() {
            let start = row * width;
            for (col, (mass, kind, intensity)) in entry.fragments.iter().enumerate() {
                db.fragment_masses[start + col] = *mass;
                db.fragment_types[start + col] = *kind;
                if let Some(ints) = db.fragment_intensities.as_mut() {
                    ints[start + col] = *intensity;
                }
            }
            db.bounds.push(entry.fragments.len());
            db.precursor_masses.push(entry.precursor_mass);
            db.sequences.push(entry.sequence);
        }

        log::trace!(
            "built database with {} entries, fragment matrix width {}",
            db.len(),
            width
        );
        Ok(db)
    }
}

/// Immutable theoretical database. Fragments are stored as a ragged array
/// inside a fixed-width row-major matrix; `bounds[i]` is the number of valid
/// columns in row `i`
#[derive(Clone, Debug, Default)]
pub struct Database {
    precursor_masses: Vec<f32>,
    fragment_masses: Vec<f32>,
    fragment_types: Vec<i16>,
    fragment_intensities: Option<Vec<f32>>,
    bounds: Vec<usize>,
    width: usize,
    sequences: Vec<String>,
}

impl Database {
    pub fn len(&self) -> usize {
        self.precursor_masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precursor_masses.is_empty()
    }

    /// Ascending precursor masses
    pub fn precursor_masses(&self) -> &[f32] {
        &self.precursor_masses
    }

    pub fn precursor_mass(&self, ix: PeptideIx) -> f32 {
        self.precursor_masses[ix.as_usize()]
    }

    fn row(&self, ix: PeptideIx) -> std::ops::Range<usize> {
        let start = ix.as_usize() * self.width;
        start..start + self.bounds[ix.as_usize()]
    }

    /// Mass-ascending fragments of a database entry
    pub fn fragments(&self, ix: PeptideIx) -> &[f32] {
        &self.fragment_masses[self.row(ix)]
    }

    pub fn fragment_types(&self, ix: PeptideIx) -> &[i16] {
        &self.fragment_types[self.row(ix)]
    }

    pub fn fragment_intensities(&self, ix: PeptideIx) -> Option<&[f32]> {
        let row = self.row(ix);
        self.fragment_intensities.as_ref().map(|ints| &ints[row])
    }

    pub fn sequence(&self, ix: PeptideIx) -> &str {
        &self.sequences[ix.as_usize()]
    }

    pub fn decoy(&self, ix: PeptideIx) -> bool {
        is_decoy(&self.sequences[ix.as_usize()])
    }

    /// Entries whose precursor mass is within `tolerance` of `mass`
    pub fn precursor_range(&self, mass: f32, tolerance: Tolerance) -> (usize, usize) {
        tolerance_range(&self.precursor_masses, mass, tolerance)
    }
}

/// Return `(lower, upper)` such that `sorted[lower..upper]` holds exactly the
/// values inside the tolerance window around `mass`
///
/// # Invariants
///
/// * `sorted` is ascending
/// * `0 <= lower <= upper <= sorted.len()`
#[inline]
pub fn tolerance_range(sorted: &[f32], mass: f32, tolerance: Tolerance) -> (usize, usize) {
    let (lo, hi) = tolerance.bounds(mass);
    // lower_bound: first value >= lo
    let lower = sorted.partition_point(|&m| m < lo);
    // upper_bound: first value > hi
    let upper = lower + sorted[lower..].partition_point(|&m| m <= hi);
    (lower, upper)
}

/// Vectorized [`tolerance_range`]
pub fn tolerance_ranges(sorted: &[f32], masses: &[f32], tolerance: Tolerance) -> Vec<(usize, usize)> {
    masses
        .par_iter()
        .map(|&mass| tolerance_range(sorted, mass, tolerance))
        .collect()
}
