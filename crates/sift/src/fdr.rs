//! Target-decoy false discovery rate control
//!
//! Rows are ranked by score (decoys first at equal score), the running
//! `decoys / targets` ratio is converted into monotonic q-values, and a score
//! cutoff is chosen for a requested FDR level. The same procedure is applied
//! to aggregated analytes (precursors, sequences, proteins) for global FDR.

use crate::scoring::Psm;
use crate::Error;
use fnv::{FnvHashMap, FnvHashSet};
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Anything that takes part in target-decoy competition
pub trait Competitor {
    fn score(&self) -> f64;
    fn decoy(&self) -> bool;
    /// Receives the row-level q-value after ranking
    fn set_q_value(&mut self, _q: f64) {}
}

/// A competitor that belongs to an aggregated analyte at each [`AnalyteLevel`]
pub trait Analyte: Competitor {
    /// `None` when the row has no analyte at this level (e.g. no protein)
    fn analyte(&self, level: AnalyteLevel) -> Option<&str>;
    fn set_analyte_q(&mut self, _level: AnalyteLevel, _q: f64) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyteLevel {
    Precursor,
    Sequence,
    ProteinGroup,
    Protein,
}

impl FromStr for AnalyteLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "precursor" => Ok(Self::Precursor),
            "sequence" => Ok(Self::Sequence),
            "protein_group" => Ok(Self::ProteinGroup),
            "protein" => Ok(Self::Protein),
            _ => Err(Error::Config(format!(
                "unsupported FDR analyte level `{}`, expected one of precursor, sequence, protein_group, protein",
                s
            ))),
        }
    }
}

impl std::fmt::Display for AnalyteLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Precursor => "precursor",
            Self::Sequence => "sequence",
            Self::ProteinGroup => "protein_group",
            Self::Protein => "protein",
        };
        f.write_str(s)
    }
}

/// q-values of a PSM at every level it was filtered at
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct QValues {
    pub psm: f64,
    pub precursor: f64,
    pub sequence: f64,
    pub protein_group: f64,
    pub protein: f64,
}

impl Default for QValues {
    fn default() -> Self {
        Self {
            psm: 1.0,
            precursor: 1.0,
            sequence: 1.0,
            protein_group: 1.0,
            protein: 1.0,
        }
    }
}

impl QValues {
    pub fn set(&mut self, level: AnalyteLevel, q: f64) {
        match level {
            AnalyteLevel::Precursor => self.precursor = q,
            AnalyteLevel::Sequence => self.sequence = q,
            AnalyteLevel::ProteinGroup => self.protein_group = q,
            AnalyteLevel::Protein => self.protein = q,
        }
    }

    pub fn get(&self, level: AnalyteLevel) -> f64 {
        match level {
            AnalyteLevel::Precursor => self.precursor,
            AnalyteLevel::Sequence => self.sequence,
            AnalyteLevel::ProteinGroup => self.protein_group,
            AnalyteLevel::Protein => self.protein,
        }
    }
}

impl Competitor for Psm {
    fn score(&self) -> f64 {
        self.score
    }

    fn decoy(&self) -> bool {
        self.decoy
    }

    fn set_q_value(&mut self, q: f64) {
        self.q_values.psm = q;
    }
}

impl Analyte for Psm {
    fn analyte(&self, level: AnalyteLevel) -> Option<&str> {
        match level {
            AnalyteLevel::Precursor => Some(&self.precursor),
            AnalyteLevel::Sequence => Some(&self.sequence),
            AnalyteLevel::ProteinGroup => self.protein.as_ref().map(|p| p.protein_group.as_str()),
            AnalyteLevel::Protein => self.protein.as_ref().map(|p| p.protein.as_str()),
        }
    }

    fn set_analyte_q(&mut self, level: AnalyteLevel, q: f64) {
        self.q_values.set(level, q);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct FdrRow {
    pub score: f64,
    pub decoy: bool,
    pub target_cum: usize,
    pub decoy_cum: usize,
    /// `decoy_cum / target_cum`, infinite while no target has been seen
    pub fdr: f64,
    pub q_value: f64,
}

/// The last row (in rank order) that satisfies the requested FDR level
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Cutoff {
    pub score: f64,
    pub index: usize,
    pub targets: usize,
    pub decoys: usize,
    pub q_value: f64,
}

#[derive(Debug)]
pub struct FdrCut<T> {
    /// `None` when nothing passes (or the input was empty)
    pub cutoff: Option<Cutoff>,
    pub retained: Vec<T>,
    /// Ranked FDR table of every input row
    pub table: Vec<FdrRow>,
}

/// Descending by score; at equal score decoys rank first
fn rank_order<T: Competitor>(a: &T, b: &T) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.decoy().cmp(&a.decoy()))
}

/// Suffix minimum of `fdr`
///
/// # Invariants
/// * the result is non-decreasing: worse ranks never get better q-values
pub fn q_values(fdr: &[f64]) -> Vec<f64> {
    let mut q = vec![f64::INFINITY; fdr.len()];
    let mut q_min = f64::INFINITY;
    for (q, &fdr) in q.iter_mut().zip(fdr).rev() {
        q_min = q_min.min(fdr);
        *q = q_min;
    }
    q
}

/// Sort `items` best-first, build the FDR table and write each row's q-value
/// back through [`Competitor::set_q_value`]
pub fn rank<T: Competitor + Send>(items: &mut [T]) -> Vec<FdrRow> {
    items.par_sort_by(rank_order);

    let mut target = 0;
    let mut decoy = 0;
    let mut table = items
        .iter()
        .map(|item| {
            match item.decoy() {
                true => decoy += 1,
                false => target += 1,
            }
            let fdr = match target {
                0 => f64::INFINITY,
                _ => decoy as f64 / target as f64,
            };
            FdrRow {
                score: item.score(),
                decoy: item.decoy(),
                target_cum: target,
                decoy_cum: decoy,
                fdr,
                q_value: 1.0,
            }
        })
        .collect::<Vec<_>>();

    let fdr = table.iter().map(|row| row.fdr).collect::<Vec<_>>();
    for ((row, q), item) in table.iter_mut().zip(q_values(&fdr)).zip(items.iter_mut()) {
        row.q_value = q;
        item.set_q_value(q);
    }
    table
}

/// Choose the cutoff on a ranked table, returning it together with the
/// number of leading rows to retain
fn select(table: &[FdrRow], level: f64) -> (Option<Cutoff>, usize) {
    let cutoff_at = |index: usize| {
        let row = &table[index];
        Cutoff {
            score: row.score,
            index,
            targets: row.target_cum,
            decoys: row.decoy_cum,
            q_value: row.q_value,
        }
    };

    let (best, worst) = match (table.first(), table.last()) {
        (Some(best), Some(worst)) => (best, worst),
        _ => return (None, 0),
    };

    if worst.q_value <= level {
        info!(
            "- all {} entries pass {} FDR (worst q-value {:.4})",
            table.len(),
            level,
            worst.q_value
        );
        return (Some(cutoff_at(table.len() - 1)), table.len());
    }
    if best.q_value > level {
        info!(
            "- no entries pass {} FDR (best q-value {:.4})",
            level, best.q_value
        );
        return (None, 0);
    }

    // The best row passes and the worst fails, so a failing row exists
    // after index 0
    let first_fail = table
        .iter()
        .position(|row| row.q_value > level)
        .unwrap_or(table.len());
    let cutoff = cutoff_at(first_fail - 1);
    // Ties at the cutoff score are kept
    let retained = table.partition_point(|row| row.score >= cutoff.score);
    info!(
        "- FDR cutoff at score {:.4}: {} targets, {} decoys, {} retained",
        cutoff.score, cutoff.targets, cutoff.decoys, retained
    );
    (Some(cutoff), retained)
}

/// Rank `items` and keep every row scoring at least the cutoff score for
/// `level`. Retained rows are returned best-first.
pub fn cut_fdr<T: Competitor + Send>(mut items: Vec<T>, level: f64) -> FdrCut<T> {
    let table = rank(&mut items);
    let (cutoff, retained) = select(&table, level);
    items.truncate(retained);
    FdrCut {
        cutoff,
        retained: items,
        table,
    }
}

/// Best-scoring representative of one `(analyte, decoy)` pair
struct Aggregate {
    key: String,
    decoy: bool,
    score: f64,
    q: f64,
}

impl Competitor for Aggregate {
    fn score(&self) -> f64 {
        self.score
    }

    fn decoy(&self) -> bool {
        self.decoy
    }

    fn set_q_value(&mut self, q: f64) {
        self.q = q;
    }
}

/// FDR control at an aggregated analyte level: one row per
/// `(analyte, decoy)` with its maximum score is cut with [`cut_fdr`], and
/// every original row of a surviving analyte is kept, in input order.
///
/// Rows without an analyte at `level` never pass.
pub fn cut_global_fdr<T: Analyte + Send>(
    mut items: Vec<T>,
    level: AnalyteLevel,
    fdr: f64,
) -> FdrCut<T> {
    let mut best: FnvHashMap<(&str, bool), f64> = FnvHashMap::default();
    for item in &items {
        if let Some(analyte) = item.analyte(level) {
            let score = best.entry((analyte, item.decoy())).or_insert(f64::MIN);
            *score = score.max(item.score());
        }
    }

    let mut aggregates = best
        .into_iter()
        .map(|((key, decoy), score)| Aggregate {
            key: key.to_string(),
            decoy,
            score,
            q: 1.0,
        })
        .collect::<Vec<_>>();
    // Deterministic order among equal scores
    aggregates.sort_by(|a, b| a.key.cmp(&b.key).then(a.decoy.cmp(&b.decoy)));

    info!(
        "Global FDR at {} level over {} analytes",
        level,
        aggregates.len()
    );
    let table = rank(&mut aggregates);
    let (cutoff, passing) = select(&table, fdr);

    let q_values = aggregates
        .iter()
        .map(|agg| ((agg.key.as_str(), agg.decoy), agg.q))
        .collect::<FnvHashMap<_, _>>();
    let retained = aggregates[..passing]
        .iter()
        .map(|agg| (agg.key.clone(), agg.decoy))
        .collect::<FnvHashSet<_>>();

    let mut keep = Vec::with_capacity(items.len());
    for item in items.iter_mut() {
        let key = item.analyte(level).map(|analyte| (analyte.to_string(), item.decoy()));
        let passed = match key {
            Some((analyte, decoy)) => {
                if let Some(&q) = q_values.get(&(analyte.as_str(), decoy)) {
                    item.set_analyte_q(level, q);
                }
                retained.contains(&(analyte, decoy))
            }
            None => false,
        };
        keep.push(passed);
    }

    let retained = items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect::<Vec<_>>();
    info!("- {} rows retained at {} level", retained.len(), level);

    FdrCut {
        cutoff,
        retained,
        table,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: usize,
        score: f64,
        decoy: bool,
        analyte: Option<String>,
        q: f64,
        analyte_q: f64,
    }

    impl Competitor for Row {
        fn score(&self) -> f64 {
            self.score
        }

        fn decoy(&self) -> bool {
            self.decoy
        }

        fn set_q_value(&mut self, q: f64) {
            self.q = q;
        }
    }

    impl Analyte for Row {
        fn analyte(&self, _: AnalyteLevel) -> Option<&str> {
            self.analyte.as_deref()
        }

        fn set_analyte_q(&mut self, _: AnalyteLevel, q: f64) {
            self.analyte_q = q;
        }
    }

    fn rows(labels: &[(f64, bool)]) -> Vec<Row> {
        labels
            .iter()
            .enumerate()
            .map(|(id, &(score, decoy))| Row {
                id,
                score,
                decoy,
                analyte: None,
                q: 1.0,
                analyte_q: 1.0,
            })
            .collect()
    }

    #[quickcheck]
    fn q_values_are_monotonic(labels: Vec<(u8, bool)>) -> bool {
        let mut items = rows(
            &labels
                .iter()
                .map(|&(s, d)| (s as f64, d))
                .collect::<Vec<_>>(),
        );
        let table = rank(&mut items);
        table.windows(2).all(|w| w[0].q_value <= w[1].q_value)
            && table.iter().all(|row| row.q_value <= row.fdr)
            && items.iter().zip(&table).all(|(item, row)| item.q == row.q_value)
    }

    #[test]
    fn q_values_are_not_capped() {
        assert_eq!(
            q_values(&[f64::INFINITY, f64::INFINITY, 2.0]),
            vec![2.0, 2.0, 2.0]
        );
        // Two decoys per target never pass, even at a level of 1
        let cut = cut_fdr(rows(&[(3.0, true), (2.0, true), (1.0, false)]), 1.0);
        assert!(cut.cutoff.is_none());
        assert!(cut.retained.is_empty());
        assert_eq!(cut.table[2].q_value, 2.0);
    }

    #[test]
    fn decoys_rank_first_on_ties() {
        let mut items = rows(&[(5.0, false), (5.0, true), (6.0, false)]);
        let table = rank(&mut items);
        assert_eq!(items.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(table[1].fdr, 1.0);
        assert_eq!(table[2].fdr, 0.5);
    }

    #[test]
    fn cutoff_selection() {
        // T T T D T T D D T D
        let items = rows(&[
            (10.0, false),
            (9.0, false),
            (8.0, false),
            (7.0, true),
            (6.0, false),
            (5.0, false),
            (4.0, true),
            (3.0, true),
            (2.0, false),
            (1.0, true),
        ]);
        let cut = cut_fdr(items, 0.2);
        let cutoff = cut.cutoff.unwrap();
        // fdr: 0 0 0 .33 .25 .2 .4 .6 .5 .67
        assert_eq!(cutoff.index, 5);
        assert_eq!(cutoff.score, 5.0);
        assert_eq!((cutoff.targets, cutoff.decoys), (5, 1));
        assert_eq!(cut.retained.len(), 6);
        assert_eq!(cut.table.len(), 10);
        assert!((cut.retained[3].q - 0.2).abs() < 1E-12);
    }

    #[test]
    fn ties_at_cutoff_are_kept() {
        let items = rows(&[(3.0, false), (2.0, true), (2.0, false), (1.0, true)]);
        // ranked: T(3) D(2) T(2) D(1); fdr: 0, 1, .5, 1; q: 0, .5, .5, 1
        let cut = cut_fdr(items, 0.6);
        assert_eq!(cut.cutoff.map(|c| c.index), Some(2));
        assert_eq!(cut.retained.len(), 3);
    }

    #[test]
    fn degenerate_branches() {
        let cut = cut_fdr(rows(&[(3.0, false), (2.0, false)]), 0.01);
        assert_eq!(cut.retained.len(), 2);

        let cut = cut_fdr(rows(&[(3.0, true), (2.0, false)]), 0.5);
        assert!(cut.cutoff.is_none());
        assert!(cut.retained.is_empty());

        let cut = cut_fdr(Vec::<Row>::new(), 0.01);
        assert!(cut.cutoff.is_none());
        assert!(cut.table.is_empty());
    }

    #[test]
    fn cut_is_idempotent() {
        let labels = [
            (9.0, false),
            (8.0, false),
            (8.0, true),
            (8.0, false),
            (7.0, false),
            (6.0, true),
            (6.0, false),
            (5.0, true),
            (4.0, false),
            (3.0, true),
        ];
        for level in [0.0, 0.1, 0.25, 0.34, 0.5, 1.0] {
            let first = cut_fdr(rows(&labels), level);
            let ids = first.retained.iter().map(|r| r.id).collect::<Vec<_>>();
            let second = cut_fdr(first.retained, level);
            assert_eq!(
                ids,
                second.retained.iter().map(|r| r.id).collect::<Vec<_>>(),
                "level {}",
                level
            );
            assert_eq!(
                first.cutoff.map(|c| c.score),
                second.cutoff.map(|c| c.score)
            );
        }
    }

    #[test]
    fn global_fdr_keeps_whole_analytes() {
        let mut items = rows(&[
            (10.0, false),
            (2.0, false),
            (9.0, false),
            (1.0, true),
            (0.5, false),
            (8.0, false),
        ]);
        let analytes = ["A", "A", "B", "C", "D", "E"];
        for (item, analyte) in items.iter_mut().zip(analytes) {
            item.analyte = Some(analyte.to_string());
        }
        items[5].analyte = None;

        let cut = cut_global_fdr(items, AnalyteLevel::Precursor, 0.01);
        let ids = cut.retained.iter().map(|r| r.id).collect::<Vec<_>>();
        // Both rows of A survive, including the low-scoring one; the row
        // without an analyte never passes
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(cut.table.len(), 4);
        assert!(cut.retained.iter().all(|r| r.analyte_q == 0.0));
    }

    #[test]
    fn analyte_levels_parse() {
        assert_eq!(
            "protein_group".parse::<AnalyteLevel>().unwrap(),
            AnalyteLevel::ProteinGroup
        );
        assert!(matches!(
            "peptide".parse::<AnalyteLevel>(),
            Err(Error::Config(_))
        ));
    }
}
