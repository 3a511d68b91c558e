use crate::database::{tolerance_ranges, Database, PeptideIx};
use crate::fragment::{compare_fragments_into, count_matches};
use crate::mass::Tolerance;
use crate::spectrum::QuerySpectra;
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

/// A (query, database entry) pair sharing at least `min_frag_hits` fragments
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Candidate {
    pub query_idx: usize,
    pub db_idx: PeptideIx,
    pub hits: u32,
}

#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    /// Ordered by query, then database index
    pub candidates: Vec<Candidate>,
    /// Number of (query, database entry) pairs that were compared
    pub compared: usize,
}

pub struct Searcher<'db> {
    pub db: &'db Database,
    pub precursor_tol: Tolerance,
    pub fragment_tol: Tolerance,
    pub min_frag_hits: u32,
    /// Also compare against database fragments shifted by the precursor
    /// mass offset
    pub mirrored: bool,
    pub parallel: bool,
}

/// Reusable per-worker buffers for mirrored comparisons
#[derive(Default)]
struct Scratch {
    direct: Vec<u32>,
    shifted: Vec<u32>,
}

impl<'db> Searcher<'db> {
    pub fn search(&self, queries: &QuerySpectra) -> SearchResult {
        self.search_chunked(queries, 1, |_| {})
    }

    /// Run `n_chunks` sequential passes over the strided query partitions
    /// `k, k + n_chunks, k + 2 * n_chunks, ...`, reporting the completed
    /// fraction after each pass
    pub fn search_chunked<F: FnMut(f64)>(
        &self,
        queries: &QuerySpectra,
        n_chunks: usize,
        mut progress: F,
    ) -> SearchResult {
        let start = Instant::now();
        info!(
            "Performing search on {} query and {} db entries",
            queries.len(),
            self.db.len()
        );

        let ranges = tolerance_ranges(
            self.db.precursor_masses(),
            &queries.precursor_masses,
            self.precursor_tol,
        );
        let width = ranges.iter().map(|(lo, hi)| hi - lo).max().unwrap_or(0);
        let compared = ranges.iter().map(|(lo, hi)| hi - lo).sum::<usize>();

        if width == 0 {
            info!("No database entries within precursor tolerance of any query");
            return SearchResult::default();
        }

        // Dense hit matrix, one row per query; every worker writes only the
        // rows of the partition it was handed
        let mut frag_hits = vec![0u32; queries.len() * width];
        let n_chunks = n_chunks.max(1);

        for k in 0..n_chunks {
            if self.parallel {
                frag_hits
                    .par_chunks_mut(width)
                    .enumerate()
                    .skip(k)
                    .step_by(n_chunks)
                    .for_each_init(Scratch::default, |scratch, (i, row)| {
                        self.fill_row(queries, i, ranges[i], row, scratch)
                    });
            } else {
                let mut scratch = Scratch::default();
                frag_hits
                    .chunks_mut(width)
                    .enumerate()
                    .skip(k)
                    .step_by(n_chunks)
                    .for_each(|(i, row)| self.fill_row(queries, i, ranges[i], row, &mut scratch));
            }
            log::trace!("- finished search pass {}/{}", k + 1, n_chunks);
            progress((k + 1) as f64 / n_chunks as f64);
        }

        let min_frag_hits = self.min_frag_hits;
        let candidates = frag_hits
            .par_chunks(width)
            .enumerate()
            .flat_map_iter(|(i, row)| {
                let (lo, hi) = ranges[i];
                row[..hi - lo]
                    .iter()
                    .enumerate()
                    .filter(move |(_, &hits)| hits >= min_frag_hits)
                    .map(move |(c, &hits)| Candidate {
                        query_idx: i,
                        db_idx: PeptideIx((lo + c) as u32),
                        hits,
                    })
            })
            .collect::<Vec<_>>();

        info!(
            "Compared {} spectra and found {} psms in {}ms",
            compared,
            candidates.len(),
            start.elapsed().as_millis()
        );

        SearchResult {
            candidates,
            compared,
        }
    }

    fn fill_row(
        &self,
        queries: &QuerySpectra,
        query_idx: usize,
        (lo, hi): (usize, usize),
        row: &mut [u32],
        scratch: &mut Scratch,
    ) {
        let (query, _) = queries.fragments(query_idx);
        let query_mass = queries.precursor_masses[query_idx];
        for (cell, db_idx) in row.iter_mut().zip(lo..hi) {
            let ix = PeptideIx(db_idx as u32);
            let db = self.db.fragments(ix);
            *cell = if self.mirrored {
                let o_mass = query_mass - self.db.precursor_mass(ix);
                scratch.direct.resize(db.len(), 0);
                scratch.shifted.resize(db.len(), 0);
                compare_fragments_into(query, db, self.fragment_tol, 0.0, &mut scratch.direct);
                compare_fragments_into(query, db, self.fragment_tol, o_mass, &mut scratch.shifted);
                scratch.direct[..db.len()]
                    .iter()
                    .zip(&scratch.shifted[..db.len()])
                    .filter(|(a, b)| **a + **b > 0)
                    .count() as u32
            } else {
                count_matches(query, db, self.fragment_tol, 0.0) as u32
            };
        }
    }
}
