use anyhow::{ensure, Context};
use clap::ArgMatches;
use sift_core::fdr::AnalyteLevel;
use sift_core::mass::Tolerance;
use sift_core::rescore::{FilterMode, ScoreMethod};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
/// Actual search parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub database: String,
    pub protein_map: Option<String>,
    pub precursor_tol: Tolerance,
    pub fragment_tol: Tolerance,
    pub min_frag_hits: u32,
    pub mirrored: bool,
    pub score: String,
    pub filter: FilterMode,
    pub peptide_fdr: f64,
    pub protein_fdr: f64,
    pub peptide_level: AnalyteLevel,
    pub protein_level: AnalyteLevel,
    pub chunks: usize,
    pub calibrated: bool,
    pub query_paths: Vec<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub score_method: ScoreMethod,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,

    #[serde(skip_serializing)]
    pub annotate_matches: bool,
}

#[derive(Deserialize, Default)]
/// Input search parameters deserialized from JSON file
pub struct Input {
    database: Option<String>,
    protein_map: Option<String>,
    precursor_tol: Option<Tolerance>,
    fragment_tol: Option<Tolerance>,
    min_frag_hits: Option<u32>,
    mirrored: Option<bool>,
    score: Option<String>,
    filter: Option<String>,
    peptide_fdr: Option<f64>,
    protein_fdr: Option<f64>,
    peptide_level: Option<String>,
    protein_level: Option<String>,
    chunks: Option<usize>,
    calibrated: Option<bool>,
    output_directory: Option<String>,
    query_paths: Option<Vec<String>>,
    annotate_matches: Option<bool>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .expect("required parameters");
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(database) = matches.get_one::<String>("database") {
            log::trace!("overriding `database` parameter.");
            input.database = Some(database.into());
        }
        if let Some(protein_map) = matches.get_one::<String>("protein_map") {
            log::trace!("overriding `protein_map` parameter.");
            input.protein_map = Some(protein_map.into());
        }
        if let Some(query_paths) = matches.get_many::<String>("query_paths") {
            log::trace!("overriding `query_paths` parameter.");
            input.query_paths = Some(query_paths.into_iter().map(|p| p.into()).collect());
        }
        if matches.get_flag("annotate-matches") {
            input.annotate_matches = Some(true);
        }

        input.check_required()?;
        Ok(input)
    }

    fn check_required(&self) -> anyhow::Result<()> {
        ensure!(
            self.database.is_some(),
            "`database` must be set. For more information try '--help'"
        );
        ensure!(
            self.query_paths.is_some(),
            "`query_paths` must be set. For more information try '--help'"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        sift_core::read_json(path).map_err(anyhow::Error::from)
    }

    fn check_tolerance(name: &str, tolerance: &Tolerance) -> anyhow::Result<()> {
        let width = match tolerance {
            Tolerance::Ppm(ppm) => *ppm,
            Tolerance::Da(da) => *da,
        };
        ensure!(
            width >= 0.0,
            "`{}` must not be negative, got {:?}",
            name,
            tolerance
        );
        if let Tolerance::Ppm(ppm) = tolerance {
            if *ppm > 100.0 {
                log::warn!("{} of {} ppm is wider than expected", name, ppm);
            }
        }
        Ok(())
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let database = self
            .database
            .context("`database` must be set. For more information try '--help'")?;
        let query_paths = self
            .query_paths
            .context("`query_paths` must be set. For more information try '--help'")?;

        let precursor_tol = self.precursor_tol.unwrap_or(Tolerance::Ppm(20.0));
        let fragment_tol = self.fragment_tol.unwrap_or(Tolerance::Ppm(20.0));
        Self::check_tolerance("precursor_tol", &precursor_tol)?;
        Self::check_tolerance("fragment_tol", &fragment_tol)?;

        let score = self.score.unwrap_or_else(|| "x_tandem".into());
        let score_method = score.parse::<ScoreMethod>()?;
        let filter = match self.filter {
            Some(filter) => filter.parse::<FilterMode>()?,
            None => FilterMode::Multiple,
        };
        let peptide_level = match self.peptide_level {
            Some(level) => level.parse::<AnalyteLevel>()?,
            None => AnalyteLevel::Precursor,
        };
        let protein_level = match self.protein_level {
            Some(level) => level.parse::<AnalyteLevel>()?,
            None => AnalyteLevel::ProteinGroup,
        };

        let peptide_fdr = self.peptide_fdr.unwrap_or(0.01);
        let protein_fdr = self.protein_fdr.unwrap_or(0.01);
        ensure!(
            peptide_fdr > 0.0 && peptide_fdr <= 1.0,
            "`peptide_fdr` must be within (0, 1], got {}",
            peptide_fdr
        );
        ensure!(
            protein_fdr > 0.0 && protein_fdr <= 1.0,
            "`protein_fdr` must be within (0, 1], got {}",
            protein_fdr
        );

        let chunks = self.chunks.unwrap_or(100);
        ensure!(chunks > 0, "`chunks` must be at least 1");

        let min_frag_hits = self.min_frag_hits.unwrap_or(7);
        if min_frag_hits == 0 {
            log::warn!("`min_frag_hits: 0` reports every candidate within precursor tolerance");
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output directory `{}`", path.display())
                })?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            database,
            protein_map: self.protein_map,
            precursor_tol,
            fragment_tol,
            min_frag_hits,
            mirrored: self.mirrored.unwrap_or(false),
            score,
            filter,
            peptide_fdr,
            protein_fdr,
            peptide_level,
            protein_level,
            chunks,
            calibrated: self.calibrated.unwrap_or(false),
            query_paths,
            output_paths: Vec::new(),
            score_method,
            output_directory,
            annotate_matches: self.annotate_matches.unwrap_or(false),
        })
    }
}
