use sift_core::database::Builder;
use sift_core::fdr::{cut_global_fdr, AnalyteLevel};
use sift_core::mass::Tolerance;
use sift_core::protein_grouping::{perform_protein_grouping, PeptideMap, ProteinIx};
use sift_core::rescore::{filter_precursor, filter_score, resolve, FilterMode, ScoreMethod};
use sift_core::scoring::Scorer;
use sift_core::search::Searcher;
use sift_core::spectrum::QuerySpectra;

const LETTERS: [char; 6] = ['A', 'C', 'D', 'E', 'F', 'G'];

fn target_fragments(i: usize) -> Vec<f32> {
    (0..8).map(|k| 100.0 + 10.0 * i as f32 + 50.0 * k as f32).collect()
}

fn decoy_fragments(i: usize) -> Vec<f32> {
    target_fragments(i)
        .into_iter()
        .enumerate()
        .map(|(k, m)| if k < 2 { m } else { m + 7.0 })
        .collect()
}

fn types() -> Vec<i16> {
    (0..8)
        .map(|k| match k % 2 {
            0 => (k / 2 + 1) as i16,
            _ => -((k / 2 + 1) as i16),
        })
        .collect()
}

/// Six targets, each with a decoy of nearly identical precursor mass
fn builder() -> Builder {
    let mut builder = Builder::default();
    for (i, letter) in LETTERS.iter().enumerate() {
        let mass = 1000.0 + 100.0 * i as f32;
        builder.precursor_masses.extend([mass, mass + 0.005]);
        builder
            .fragment_masses
            .extend([target_fragments(i), decoy_fragments(i)]);
        builder.fragment_types.extend([types(), types()]);
        builder
            .sequences
            .extend([format!("PEPTIDE{}K", letter), format!("EDITPEP{}k", letter)]);
    }
    builder
}

/// One spectrum per target, plus one weak spectrum matching the first decoy
fn queries() -> QuerySpectra {
    let mut queries = QuerySpectra {
        offset_index: vec![0],
        ..Default::default()
    };
    let mut push = |mass: f32, fragments: Vec<f32>, intensity: f32| {
        queries.precursor_masses.push(mass);
        queries.mz.push(mass / 2.0 + 1.0);
        queries.retention_time.push(mass / 100.0);
        queries.charges.push(2);
        queries
            .fragment_intensities
            .extend(std::iter::repeat(intensity).take(fragments.len()));
        queries.fragment_masses.extend(fragments);
        queries.offset_index.push(queries.fragment_masses.len());
    };
    for i in 0..LETTERS.len() {
        push(1000.0 + 100.0 * i as f32, target_fragments(i), 10.0);
    }
    push(1000.005, decoy_fragments(0), 1.0);
    queries
}

fn peptide_map() -> PeptideMap {
    let proteins: [&[u32]; 6] = [&[0], &[0], &[0, 1], &[1], &[2], &[1, 2]];
    let mut map = PeptideMap::default();
    for (letter, proteins) in LETTERS.iter().zip(proteins) {
        let proteins = proteins.iter().map(|&p| ProteinIx(p)).collect::<Vec<_>>();
        map.insert(format!("PEPTIDE{}K", letter), proteins.clone());
        map.insert(format!("EDITPEP{}k", letter), proteins);
    }
    map
}

#[test]
fn search_score_filter_group() -> Result<(), sift_core::Error> {
    let db = builder().build()?;
    let queries = queries();
    queries.validate()?;

    let searcher = Searcher {
        db: &db,
        precursor_tol: Tolerance::Ppm(20.0),
        fragment_tol: Tolerance::Da(0.02),
        min_frag_hits: 2,
        mirrored: false,
        parallel: true,
    };
    let result = searcher.search_chunked(&queries, 4, |_| {});
    // Every query sees its target and its decoy
    assert_eq!(result.compared, 14);
    assert_eq!(result.candidates.len(), 14);

    let scorer = Scorer {
        db: &db,
        fragment_tol: Tolerance::Da(0.02),
    };
    let mut psms = scorer.score(&queries, &result.candidates);
    resolve(ScoreMethod::XTandem, None).score(&mut psms);

    let psms = filter_precursor(filter_score(psms, FilterMode::Multiple));
    assert_eq!(psms.len(), 7);
    assert_eq!(psms.iter().filter(|p| p.decoy).count(), 1);

    let cut = cut_global_fdr(psms, AnalyteLevel::Precursor, 0.01);
    let mut psms = cut.retained;
    assert_eq!(psms.len(), 6);
    assert!(psms.iter().all(|p| !p.decoy && p.q_values.precursor == 0.0));

    let proteins = vec!["sp|P1".to_string(), "sp|P2".into(), "sp|P3".into()];
    perform_protein_grouping(&mut psms, &peptide_map(), &proteins);

    let annotation = |seq: &str| {
        psms.iter()
            .find(|p| p.sequence == seq)
            .and_then(|p| p.protein.clone())
            .expect("every retained psm is annotated")
    };
    // P1 and P2 both have three peptides of support, P2 carries more evidence
    let shared = annotation("PEPTIDEDK");
    assert_eq!(shared.protein_group, "sp|P2");
    assert!(shared.razor);
    assert_eq!(annotation("PEPTIDEGK").protein_group, "sp|P2");
    let unique = annotation("PEPTIDEAK");
    assert_eq!(unique.protein, "sp|P1");
    assert!(!unique.razor);
    assert_eq!(unique.n_possible_proteins, 1);

    let cut = cut_global_fdr(psms, AnalyteLevel::ProteinGroup, 0.01);
    assert_eq!(cut.retained.len(), 6);
    assert_eq!(cut.table.len(), 3);
    assert!(cut
        .retained
        .iter()
        .all(|p| p.q_values.protein_group == 0.0));
    Ok(())
}

#[test]
fn empty_queries_flow_through() -> Result<(), sift_core::Error> {
    let db = builder().build()?;
    let queries = QuerySpectra {
        offset_index: vec![0],
        ..Default::default()
    };
    queries.validate()?;
    let searcher = Searcher {
        db: &db,
        precursor_tol: Tolerance::Ppm(20.0),
        fragment_tol: Tolerance::Da(0.02),
        min_frag_hits: 2,
        mirrored: true,
        parallel: false,
    };
    let result = searcher.search(&queries);
    assert!(result.candidates.is_empty());

    let scorer = Scorer {
        db: &db,
        fragment_tol: Tolerance::Da(0.02),
    };
    let psms = scorer.score(&queries, &result.candidates);
    let cut = cut_global_fdr(psms, AnalyteLevel::Precursor, 0.01);
    assert!(cut.retained.is_empty());
    assert!(cut.cutoff.is_none());
    Ok(())
}
