//! Score strategies and PSM pre-filters applied before FDR control

use crate::mass::Loss;
use crate::scoring::Psm;
use crate::Error;
use fnv::{FnvHashMap, FnvHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Numeric PSM features available to classifiers and as direct scores
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PsmFeature {
    Hits,
    OMass,
    OMassPpm,
    DeltaM,
    DeltaMPpm,
    AbsDeltaMPpm,
    TotalInt,
    MatchedInt,
    MatchedIntRatio,
    IntRatio,
    BHits,
    YHits,
    BH2OHits,
    YH2OHits,
    BNH3Hits,
    YNH3Hits,
    Charge,
    NAminoAcids,
    MatchedIonFraction,
    MissedCleavages,
    XTandem,
}

impl PsmFeature {
    /// Fixed feature order used for classifier input
    pub const ALL: [PsmFeature; 21] = [
        PsmFeature::Hits,
        PsmFeature::OMass,
        PsmFeature::OMassPpm,
        PsmFeature::DeltaM,
        PsmFeature::DeltaMPpm,
        PsmFeature::AbsDeltaMPpm,
        PsmFeature::TotalInt,
        PsmFeature::MatchedInt,
        PsmFeature::MatchedIntRatio,
        PsmFeature::IntRatio,
        PsmFeature::BHits,
        PsmFeature::YHits,
        PsmFeature::BH2OHits,
        PsmFeature::YH2OHits,
        PsmFeature::BNH3Hits,
        PsmFeature::YNH3Hits,
        PsmFeature::Charge,
        PsmFeature::NAminoAcids,
        PsmFeature::MatchedIonFraction,
        PsmFeature::MissedCleavages,
        PsmFeature::XTandem,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PsmFeature::Hits => "hits",
            PsmFeature::OMass => "o_mass",
            PsmFeature::OMassPpm => "o_mass_ppm",
            PsmFeature::DeltaM => "delta_m",
            PsmFeature::DeltaMPpm => "delta_m_ppm",
            PsmFeature::AbsDeltaMPpm => "abs_delta_m_ppm",
            PsmFeature::TotalInt => "total_int",
            PsmFeature::MatchedInt => "matched_int",
            PsmFeature::MatchedIntRatio => "matched_int_ratio",
            PsmFeature::IntRatio => "int_ratio",
            PsmFeature::BHits => "b_hits",
            PsmFeature::YHits => "y_hits",
            PsmFeature::BH2OHits => "b_h2o_hits",
            PsmFeature::YH2OHits => "y_h2o_hits",
            PsmFeature::BNH3Hits => "b_nh3_hits",
            PsmFeature::YNH3Hits => "y_nh3_hits",
            PsmFeature::Charge => "charge",
            PsmFeature::NAminoAcids => "n_aa",
            PsmFeature::MatchedIonFraction => "matched_ion_fraction",
            PsmFeature::MissedCleavages => "n_missed",
            PsmFeature::XTandem => "x_tandem",
        }
    }
}

impl FromStr for PsmFeature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PsmFeature::ALL
            .iter()
            .find(|feature| feature.name() == s)
            .copied()
            .ok_or_else(|| Error::Config(format!("unknown PSM feature `{}`", s)))
    }
}

/// Residues of a sequence, ignoring modification annotations
fn naked(sequence: &str) -> impl Iterator<Item = char> + '_ {
    sequence.chars().filter(|c| c.is_ascii_uppercase())
}

/// Internal K/R residues not followed by P
fn missed_cleavages(sequence: &str) -> usize {
    let residues = naked(sequence).collect::<Vec<_>>();
    residues
        .windows(2)
        .filter(|w| matches!(w[0], 'K' | 'R') && w[1] != 'P')
        .count()
}

/// ln(n!)
fn lnfact(n: u32) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

/// X!Tandem-style score, `ln(b! * y! * matched_int)` over unmodified b/y ions.
/// PSMs without matched intensity score 0.
pub fn x_tandem(psm: &Psm) -> f64 {
    let counts = psm.hits_for(Loss::None);
    let score = lnfact(counts.b) + lnfact(counts.y) + (psm.matched_int as f64).ln();
    match score.is_finite() {
        true => score,
        false => 0.0,
    }
}

impl Psm {
    pub fn feature(&self, feature: PsmFeature) -> f64 {
        let n_aa = naked(&self.sequence).count();
        match feature {
            PsmFeature::Hits => self.hits as f64,
            PsmFeature::OMass => self.o_mass as f64,
            PsmFeature::OMassPpm => self.o_mass_ppm as f64,
            PsmFeature::DeltaM => self.delta_m as f64,
            PsmFeature::DeltaMPpm => self.delta_m_ppm as f64,
            PsmFeature::AbsDeltaMPpm => self.delta_m_ppm.abs() as f64,
            PsmFeature::TotalInt => self.total_int as f64,
            PsmFeature::MatchedInt => self.matched_int as f64,
            PsmFeature::MatchedIntRatio => self.matched_int_ratio as f64,
            PsmFeature::IntRatio => self.int_ratio as f64,
            PsmFeature::BHits => self.hits_for(Loss::None).b as f64,
            PsmFeature::YHits => self.hits_for(Loss::None).y as f64,
            PsmFeature::BH2OHits => self.hits_for(Loss::H2O).b as f64,
            PsmFeature::YH2OHits => self.hits_for(Loss::H2O).y as f64,
            PsmFeature::BNH3Hits => self.hits_for(Loss::NH3).b as f64,
            PsmFeature::YNH3Hits => self.hits_for(Loss::NH3).y as f64,
            PsmFeature::Charge => self.charge as f64,
            PsmFeature::NAminoAcids => n_aa as f64,
            PsmFeature::MatchedIonFraction => match n_aa {
                0 => 0.0,
                n => self.hits as f64 / (2 * n) as f64,
            },
            PsmFeature::MissedCleavages => missed_cleavages(&self.sequence) as f64,
            PsmFeature::XTandem => x_tandem(self),
        }
    }

    /// All features, in [`PsmFeature::ALL`] order
    pub fn features(&self) -> Vec<f64> {
        PsmFeature::ALL.iter().map(|&f| self.feature(f)).collect()
    }
}

/// A trained model mapping a feature vector to a score
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f64]) -> f64;
}

/// Strategy writing `Psm::score`
pub trait ScoreFunction: Send + Sync {
    fn name(&self) -> String;
    fn score(&self, psms: &mut [Psm]);
}

pub struct XTandem;

impl ScoreFunction for XTandem {
    fn name(&self) -> String {
        "x_tandem".into()
    }

    fn score(&self, psms: &mut [Psm]) {
        psms.par_iter_mut().for_each(|psm| psm.score = x_tandem(psm));
    }
}

/// X!Tandem score mapped through its empirical CDF onto (0, 1]
pub struct Ecdf;

impl ScoreFunction for Ecdf {
    fn name(&self) -> String {
        "ecdf".into()
    }

    fn score(&self, psms: &mut [Psm]) {
        let raw = psms.par_iter().map(x_tandem).collect::<Vec<_>>();
        let mut sorted = raw.clone();
        sorted.par_sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len() as f64;
        psms.par_iter_mut().zip(raw).for_each(|(psm, s)| {
            psm.score = sorted.partition_point(|&x| x <= s) as f64 / n;
        });
    }
}

pub struct Learned(pub Box<dyn Classifier>);

impl ScoreFunction for Learned {
    fn name(&self) -> String {
        "classifier".into()
    }

    fn score(&self, psms: &mut [Psm]) {
        psms.par_iter_mut().for_each(|psm| {
            let score = self.0.predict(&psm.features());
            psm.score = match score.is_finite() {
                true => score,
                false => 0.0,
            };
        });
    }
}

/// Use one feature directly as the score
pub struct FeatureScore(pub PsmFeature);

impl ScoreFunction for FeatureScore {
    fn name(&self) -> String {
        self.0.name().into()
    }

    fn score(&self, psms: &mut [Psm]) {
        let feature = self.0;
        psms.par_iter_mut()
            .for_each(|psm| psm.score = psm.feature(feature));
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScoreMethod {
    XTandem,
    Classifier,
    Ecdf,
    Feature(PsmFeature),
}

impl FromStr for ScoreMethod {
    type Err = Error;

    /// `x_tandem`, `classifier`, `ecdf` or the name of a [`PsmFeature`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x_tandem" => Ok(ScoreMethod::XTandem),
            "classifier" => Ok(ScoreMethod::Classifier),
            "ecdf" => Ok(ScoreMethod::Ecdf),
            _ => s.parse::<PsmFeature>().map(ScoreMethod::Feature).map_err(|_| {
                Error::Config(format!(
                    "unknown score method `{}`, expected x_tandem, classifier, ecdf or a PSM feature name",
                    s
                ))
            }),
        }
    }
}

/// Resolve a configured method into a score strategy. Without a trained
/// classifier, `Classifier` falls back to [`Ecdf`].
pub fn resolve(method: ScoreMethod, classifier: Option<Box<dyn Classifier>>) -> Box<dyn ScoreFunction> {
    match (method, classifier) {
        (ScoreMethod::XTandem, _) => Box::new(XTandem),
        (ScoreMethod::Ecdf, _) => Box::new(Ecdf),
        (ScoreMethod::Feature(feature), _) => Box::new(FeatureScore(feature)),
        (ScoreMethod::Classifier, Some(classifier)) => Box::new(Learned(classifier)),
        (ScoreMethod::Classifier, None) => {
            log::warn!("no trained classifier available, falling back to ECDF-normalized x_tandem score");
            Box::new(Ecdf)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// One PSM per raw spectrum
    Single,
    /// One PSM per (feature-relabeled) query
    Multiple,
}

impl FromStr for FilterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(FilterMode::Single),
            "multiple" => Ok(FilterMode::Multiple),
            _ => Err(Error::Config(format!(
                "unsupported filter mode `{}`, expected single or multiple",
                s
            ))),
        }
    }
}

/// Indices of `psms`, best score first; stable, so earlier rows win ties
fn by_score(psms: &[Psm]) -> Vec<usize> {
    let mut order = (0..psms.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| psms[b].score.total_cmp(&psms[a].score));
    order
}

/// Keep the best-scoring PSM per query (per file). In `Single` mode, also
/// keep only the best PSM per raw spectrum when queries were selected
/// through features. Input order is preserved.
pub fn filter_score(psms: Vec<Psm>, mode: FilterMode) -> Vec<Psm> {
    let n = psms.len();
    let mut keep = vec![false; n];
    let mut queries = FnvHashSet::default();
    let mut raw = FnvHashSet::default();
    for ix in by_score(&psms) {
        let psm = &psms[ix];
        if !queries.insert((psm.file_id, psm.query_idx)) {
            continue;
        }
        if mode == FilterMode::Single {
            if let Some(raw_idx) = psm.raw_idx {
                if !raw.insert((psm.file_id, raw_idx)) {
                    continue;
                }
            }
        }
        keep[ix] = true;
    }

    let psms = psms
        .into_iter()
        .zip(keep)
        .filter_map(|(psm, keep)| keep.then_some(psm))
        .collect::<Vec<_>>();
    log::info!("- score filter kept {} of {} psms", psms.len(), n);
    psms
}

/// Keep the top-scoring PSMs per precursor (per file), ties included
pub fn filter_precursor(psms: Vec<Psm>) -> Vec<Psm> {
    let n = psms.len();
    let mut best: FnvHashMap<(usize, &str), f64> = FnvHashMap::default();
    for psm in &psms {
        let score = best
            .entry((psm.file_id, psm.precursor.as_str()))
            .or_insert(f64::MIN);
        *score = score.max(psm.score);
    }
    let keep = psms
        .iter()
        .map(|psm| best[&(psm.file_id, psm.precursor.as_str())] <= psm.score)
        .collect::<Vec<_>>();

    let psms = psms
        .into_iter()
        .zip(keep)
        .filter_map(|(psm, keep)| keep.then_some(psm))
        .collect::<Vec<_>>();
    log::info!("- precursor filter kept {} of {} psms", psms.len(), n);
    psms
}
