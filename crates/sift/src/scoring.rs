use crate::database::{Database, PeptideIx};
use crate::fdr::QValues;
use crate::fragment::compare_fragments_into;
use crate::mass::{ppm_difference, Loss, Tolerance};
use crate::protein_grouping::ProteinAnnotation;
use crate::search::Candidate;
use crate::spectrum::QuerySpectra;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Series {
    /// N-terminal fragments
    B,
    /// C-terminal fragments
    Y,
}

/// One matched fragment ion of a PSM
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct MatchedIon {
    /// Signed ion number, positive for b-ions and negative for y-ions
    pub fragment_type: i16,
    pub loss: Loss,
    pub query_intensity: f32,
    /// Predicted intensity, 0 when the database carries none
    pub db_intensity: f32,
    pub query_mass: f32,
    /// Theoretical fragment mass after subtracting the neutral loss
    pub db_mass: f32,
    pub query_fragment_idx: usize,
    pub db_fragment_idx: usize,
}

impl MatchedIon {
    pub fn series(&self) -> Series {
        match self.fragment_type > 0 {
            true => Series::B,
            false => Series::Y,
        }
    }

    /// Render the ion as e.g. `b4`, `y7-H2O` or `b2-NH3`
    pub fn label(&self) -> String {
        let series = match self.series() {
            Series::B => 'b',
            Series::Y => 'y',
        };
        format!(
            "{}{}{}",
            series,
            self.fragment_type.unsigned_abs(),
            self.loss.suffix()
        )
    }
}

/// Matched b- and y-ion counts for one neutral loss
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IonCounts {
    pub b: u32,
    pub y: u32,
}

#[derive(Clone, Debug, Serialize)]
/// A scored peptide-spectrum match
pub struct Psm {
    pub query_idx: usize,
    pub db_idx: PeptideIx,
    /// Shared fragment count from the search
    pub hits: u32,
    pub sequence: String,
    /// Sequence and charge, e.g. `PEPTIDEK_2`
    pub precursor: String,
    pub charge: u8,
    /// Observed precursor mass
    pub mass: f32,
    pub mz: f32,
    pub rt: f32,
    pub decoy: bool,
    pub feature_idx: Option<usize>,
    pub raw_idx: Option<usize>,
    /// Observed minus theoretical precursor mass
    pub o_mass: f32,
    pub o_mass_ppm: f32,
    /// Mean fragment mass offset over matched ions
    pub delta_m: f32,
    pub delta_m_ppm: f32,
    pub total_int: f32,
    pub matched_int: f32,
    pub matched_int_ratio: f32,
    pub int_ratio: f32,
    /// Hit counts indexed by [`Loss::index`]
    pub ion_hits: [IonCounts; 3],
    #[serde(skip_serializing)]
    pub ions: Vec<MatchedIon>,
    pub score: f64,
    pub file_id: usize,
    pub q_values: QValues,
    pub protein: Option<ProteinAnnotation>,
}

impl Psm {
    pub fn hits_for(&self, loss: Loss) -> IonCounts {
        self.ion_hits[loss.index()]
    }

    /// Number of matched ions over all losses
    pub fn n_ions(&self) -> usize {
        self.ions.len()
    }
}

pub struct Scorer<'db> {
    pub db: &'db Database,
    pub fragment_tol: Tolerance,
}

fn mean<I: Iterator<Item = f32>>(iter: I) -> f32 {
    let (sum, n) = iter.fold((0.0f64, 0usize), |(s, n), x| (s + x as f64, n + 1));
    match n {
        0 => 0.0,
        n => (sum / n as f64) as f32,
    }
}

impl<'db> Scorer<'db> {
    /// Score all candidates, preserving their order
    pub fn score(&self, queries: &QuerySpectra, candidates: &[Candidate]) -> Vec<Psm> {
        let start = Instant::now();
        let psms = candidates
            .par_iter()
            .map(|candidate| self.score_candidate(queries, candidate))
            .collect::<Vec<_>>();
        log::info!(
            "Extracted features for {} candidates in {}ms",
            psms.len(),
            start.elapsed().as_millis()
        );
        psms
    }

    /// Re-match a candidate under every neutral loss and derive its features
    pub fn score_candidate(&self, queries: &QuerySpectra, candidate: &Candidate) -> Psm {
        let ix = candidate.db_idx;
        let (query, intensities) = queries.fragments(candidate.query_idx);
        let fragments = self.db.fragments(ix);
        let types = self.db.fragment_types(ix);
        let db_intensities = self.db.fragment_intensities(ix);

        let mut ions = Vec::new();
        let mut ion_hits = [IonCounts::default(); 3];
        let mut hits = vec![0u32; fragments.len()];
        for loss in Loss::ALL {
            compare_fragments_into(query, fragments, self.fragment_tol, -loss.mass(), &mut hits);
            for (d, &h) in hits.iter().enumerate().filter(|(_, &h)| h > 0) {
                let q = h as usize - 1;
                let ion = MatchedIon {
                    fragment_type: types[d],
                    loss,
                    query_intensity: intensities[q],
                    db_intensity: db_intensities.map(|ints| ints[d]).unwrap_or(0.0),
                    query_mass: query[q],
                    db_mass: fragments[d] - loss.mass(),
                    query_fragment_idx: q,
                    db_fragment_idx: d,
                };
                match ion.series() {
                    Series::B => ion_hits[loss.index()].b += 1,
                    Series::Y => ion_hits[loss.index()].y += 1,
                }
                ions.push(ion);
            }
        }

        let mass = queries.precursor_masses[candidate.query_idx];
        let db_mass = self.db.precursor_mass(ix);
        let charge = queries.charges[candidate.query_idx];
        let sequence = self.db.sequence(ix).to_string();

        let total_int = intensities.iter().sum::<f32>();
        let matched_int = ions.iter().map(|ion| ion.query_intensity).sum::<f32>();
        let matched_int_ratio = match total_int > 0.0 {
            true => matched_int / total_int,
            false => 0.0,
        };
        let int_ratio = match db_intensities {
            Some(_) => mean(
                ions.iter()
                    .filter(|ion| ion.query_intensity > 0.0)
                    .map(|ion| ion.db_intensity / ion.query_intensity),
            ),
            None => 0.0,
        };
        let origin = queries.origin(candidate.query_idx);

        Psm {
            query_idx: candidate.query_idx,
            db_idx: ix,
            hits: candidate.hits,
            precursor: format!("{}_{}", sequence, charge),
            sequence,
            charge,
            mass,
            mz: queries.mz[candidate.query_idx],
            rt: queries.retention_time[candidate.query_idx],
            decoy: self.db.decoy(ix),
            feature_idx: origin.map(|o| o.feature_idx),
            raw_idx: origin.map(|o| o.raw_idx),
            o_mass: mass - db_mass,
            o_mass_ppm: ppm_difference(mass, db_mass),
            delta_m: mean(ions.iter().map(|ion| ion.query_mass - ion.db_mass)),
            delta_m_ppm: mean(
                ions.iter()
                    .map(|ion| ppm_difference(ion.query_mass, ion.db_mass)),
            ),
            total_int,
            matched_int,
            matched_int_ratio,
            int_ratio,
            ion_hits,
            ions,
            score: 0.0,
            file_id: 0,
            q_values: QValues::default(),
            protein: None,
        }
    }
}
