use super::input::Search;
use anyhow::Context;
use fnv::FnvHashMap;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sift_core::database::{Builder, Database};
use sift_core::fdr::{cut_global_fdr, rank};
use sift_core::protein_grouping::{perform_protein_grouping, ProteinMap};
use sift_core::rescore::{filter_precursor, filter_score, resolve, ScoreFunction};
use sift_core::scoring::{Psm, Scorer};
use sift_core::search::Searcher;
use sift_core::spectrum::{PrecursorFeature, QuerySpectra};
use std::path::PathBuf;
use std::time::Instant;

/// One query file: spectra plus an optional precursor feature restriction
#[derive(Deserialize)]
pub struct QueryFile {
    pub spectra: QuerySpectra,
    #[serde(default)]
    pub features: Option<Vec<PrecursorFeature>>,
}

/// Outcome of processing one query file
#[derive(Serialize, Debug)]
pub struct FileReport {
    pub path: String,
    pub file_id: usize,
    /// PSMs surviving the per-file filters
    pub psms: usize,
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Default)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
    /// PSMs passing every FDR filter
    pub psms: usize,
    pub output_paths: Vec<String>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.error.is_some())
    }
}

pub struct Runner {
    pub database: Database,
    pub proteins: Option<ProteinMap>,
    pub parameters: Search,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();
        let builder: Builder = sift_core::read_json(&parameters.database)
            .with_context(|| format!("Failed to read database from `{}`", parameters.database))?;
        let database = builder.build()?;
        info!(
            "loaded database with {} entries in {}ms",
            database.len(),
            start.elapsed().as_millis()
        );

        let proteins = match &parameters.protein_map {
            Some(path) => {
                let map: ProteinMap = sift_core::read_json(path)
                    .with_context(|| format!("Failed to read protein map from `{}`", path))?;
                map.validate()?;
                info!(
                    "loaded {} proteins and {} peptide mappings",
                    map.proteins.len(),
                    map.peptides.len()
                );
                Some(map)
            }
            None => None,
        };

        Ok(Self {
            database,
            proteins,
            parameters,
            start,
        })
    }

    // Create a path for `file_name` in the output directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    fn read_queries(&self, path: &str) -> anyhow::Result<QuerySpectra> {
        let file: QueryFile = sift_core::read_json(path)?;
        file.spectra.validate()?;
        match file.features {
            Some(features) => {
                log::trace!("- {}: restricting to {} features", path, features.len());
                Ok(file
                    .spectra
                    .select(&features, self.parameters.calibrated)?)
            }
            None => Ok(file.spectra),
        }
    }

    /// Search, score and pre-filter one query file
    pub fn process_file(
        &self,
        score_fn: &dyn ScoreFunction,
        path: &str,
        file_id: usize,
    ) -> anyhow::Result<Vec<Psm>> {
        let start = Instant::now();
        let queries = self.read_queries(path)?;
        info!("- {}: read {} spectra", path, queries.len());

        let searcher = Searcher {
            db: &self.database,
            precursor_tol: self.parameters.precursor_tol,
            fragment_tol: self.parameters.fragment_tol,
            min_frag_hits: self.parameters.min_frag_hits,
            mirrored: self.parameters.mirrored,
            parallel: true,
        };
        let result = searcher.search_chunked(&queries, self.parameters.chunks, |fraction| {
            log::trace!("- {}: {:.0}% searched", path, fraction * 100.0);
        });

        let scorer = Scorer {
            db: &self.database,
            fragment_tol: self.parameters.fragment_tol,
        };
        let mut psms = scorer.score(&queries, &result.candidates);
        psms.par_iter_mut().for_each(|psm| psm.file_id = file_id);
        score_fn.score(&mut psms);

        let psms = filter_precursor(filter_score(psms, self.parameters.filter));
        info!(
            "- {}: {} psms in {}ms",
            path,
            psms.len(),
            start.elapsed().as_millis()
        );
        Ok(psms)
    }

    /// Process query files `batch_size` at a time. A failing file is logged
    /// and reported, and never aborts its siblings.
    pub fn batch_files(
        &self,
        score_fn: &dyn ScoreFunction,
        batch_size: usize,
    ) -> (Vec<Psm>, Vec<FileReport>) {
        let mut psms = Vec::new();
        let mut reports = Vec::with_capacity(self.parameters.query_paths.len());
        for (chunk_idx, chunk) in self
            .parameters
            .query_paths
            .chunks(batch_size.max(1))
            .enumerate()
        {
            info!(
                "processing files {} .. {} ",
                batch_size * chunk_idx,
                batch_size * chunk_idx + chunk.len()
            );
            let outcomes = chunk
                .par_iter()
                .enumerate()
                .map(|(idx, path)| {
                    let file_id = chunk_idx * batch_size.max(1) + idx;
                    (path, file_id, self.process_file(score_fn, path, file_id))
                })
                .collect::<Vec<_>>();

            for (path, file_id, outcome) in outcomes {
                match outcome {
                    Ok(file_psms) => {
                        reports.push(FileReport {
                            path: path.clone(),
                            file_id,
                            psms: file_psms.len(),
                            error: None,
                        });
                        psms.extend(file_psms);
                    }
                    Err(e) => {
                        log::error!("- {}: {:#}", path, e);
                        reports.push(FileReport {
                            path: path.clone(),
                            file_id,
                            psms: 0,
                            error: Some(format!("{:#}", e)),
                        });
                    }
                }
            }
        }
        (psms, reports)
    }

    pub fn run(mut self, parallel: usize) -> anyhow::Result<RunSummary> {
        let score_fn = resolve(self.parameters.score_method, None);
        info!("scoring PSMs with `{}`", score_fn.name());

        let (mut psms, files) = self.batch_files(score_fn.as_ref(), parallel);
        let succeeded = files.iter().filter(|f| f.error.is_none()).count();
        info!(
            "searched {} of {} files, {} psms before FDR",
            succeeded,
            files.len(),
            psms.len()
        );

        // PSM-level q-values, reported alongside the aggregate levels
        rank(&mut psms);
        let cut = cut_global_fdr(
            psms,
            self.parameters.peptide_level,
            self.parameters.peptide_fdr,
        );
        let mut psms = cut.retained;

        let psms = match &self.proteins {
            Some(proteins) => {
                perform_protein_grouping(&mut psms, &proteins.peptides, &proteins.proteins);
                cut_global_fdr(
                    psms,
                    self.parameters.protein_level,
                    self.parameters.protein_fdr,
                )
                .retained
            }
            None => {
                log::warn!("no `protein_map` configured, skipping protein grouping");
                psms
            }
        };

        let mut per_file: FnvHashMap<usize, usize> = FnvHashMap::default();
        for psm in &psms {
            *per_file.entry(psm.file_id).or_default() += 1;
        }
        for report in &files {
            info!(
                "- {}: {} psms pass FDR",
                report.path,
                per_file.get(&report.file_id).copied().unwrap_or(0)
            );
        }

        let filenames = self.parameters.query_paths.clone();
        let path = self.write_psms(&psms, &filenames)?;
        self.parameters.output_paths.push(path);
        if self.parameters.annotate_matches {
            let path = self.write_matched_ions(&psms, &filenames)?;
            self.parameters.output_paths.push(path);
        }

        let path = self.make_path("results.json");
        self.parameters
            .output_paths
            .push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);
        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;

        let summary = RunSummary {
            psms: psms.len(),
            output_paths: self.parameters.output_paths.clone(),
            files,
        };
        for failure in summary.failures() {
            log::error!(
                "failed to process {}: {}",
                failure.path,
                failure.error.as_deref().unwrap_or_default()
            );
        }
        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(summary)
    }
}
