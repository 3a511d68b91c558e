use sift_cli::input::Input;
use sift_cli::runner::Runner;
use sift_core::database::Builder;
use sift_core::protein_grouping::{ProteinIx, ProteinMap};
use sift_core::spectrum::QuerySpectra;
use std::path::{Path, PathBuf};

const LETTERS: [char; 6] = ['A', 'C', 'D', 'E', 'F', 'G'];

fn fragments(i: usize) -> Vec<f32> {
    (0..8).map(|k| 100.0 + 10.0 * i as f32 + 50.0 * k as f32).collect()
}

fn builder() -> Builder {
    let types = (0..8)
        .map(|k: i16| if k % 2 == 0 { k / 2 + 1 } else { -(k / 2 + 1) })
        .collect::<Vec<_>>();
    let mut builder = Builder::default();
    for (i, letter) in LETTERS.iter().enumerate() {
        let mass = 1000.0 + 100.0 * i as f32;
        let decoy = fragments(i)
            .into_iter()
            .enumerate()
            .map(|(k, m)| if k < 2 { m } else { m + 7.0 })
            .collect();
        builder.precursor_masses.extend([mass, mass + 0.005]);
        builder.fragment_masses.extend([fragments(i), decoy]);
        builder.fragment_types.extend([types.clone(), types.clone()]);
        builder
            .sequences
            .extend([format!("PEPTIDE{}K", letter), format!("EDITPEP{}k", letter)]);
    }
    builder
}

fn queries() -> QuerySpectra {
    let mut queries = QuerySpectra {
        offset_index: vec![0],
        ..Default::default()
    };
    for i in 0..LETTERS.len() {
        let mass = 1000.0 + 100.0 * i as f32;
        queries.precursor_masses.push(mass);
        queries.mz.push(mass / 2.0 + 1.0);
        queries.retention_time.push(i as f32);
        queries.charges.push(2);
        queries.fragment_masses.extend(fragments(i));
        queries.fragment_intensities.extend([10.0; 8]);
        queries.offset_index.push(queries.fragment_masses.len());
    }
    queries
}

fn protein_map() -> ProteinMap {
    let mut map = ProteinMap {
        proteins: vec!["sp|P1".into()],
        ..Default::default()
    };
    for letter in LETTERS {
        map.peptides
            .insert(format!("PEPTIDE{}K", letter), vec![ProteinIx(0)]);
        map.peptides
            .insert(format!("EDITPEP{}k", letter), vec![ProteinIx(0)]);
    }
    map
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<String> {
    std::fs::write(path, serde_json::to_vec(value)?)?;
    Ok(path.display().to_string())
}

fn workspace(name: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("sift-{}-{}", name, std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[test]
fn failing_file_does_not_abort_batch() -> anyhow::Result<()> {
    let dir = workspace("batch")?;
    let database = write_json(&dir.join("db.json"), &builder())?;
    let protein_map = write_json(&dir.join("proteins.json"), &protein_map())?;
    let good = write_json(
        &dir.join("good.json"),
        &serde_json::json!({ "spectra": queries() }),
    )?;
    let missing = dir.join("missing.json").display().to_string();
    let output = dir.join("out");

    let parameters = serde_json::json!({
        "database": database,
        "protein_map": protein_map,
        "precursor_tol": { "ppm": 20.0 },
        "fragment_tol": { "da": 0.02 },
        "min_frag_hits": 2,
        "chunks": 3,
        "annotate_matches": true,
        "output_directory": output.display().to_string(),
        "query_paths": [good, missing],
    });
    let path = write_json(&dir.join("params.json"), &parameters)?;

    let search = Input::load(path)?.build()?;
    let summary = Runner::new(search)?.run(2)?;

    assert_eq!(summary.files.len(), 2);
    let failures = summary.failures().collect::<Vec<_>>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, missing);
    assert_eq!(summary.files[0].psms, 6);
    assert_eq!(summary.psms, 6);
    assert_eq!(summary.output_paths.len(), 3);

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(output.join("results.sift.tsv"))?;
    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let group = column("protein_group").expect("protein_group column");
    let decoy = column("decoy").expect("decoy column");
    let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 6);
    for row in &rows {
        assert_eq!(&row[group], "sp|P1");
        assert_eq!(&row[decoy], "0");
    }

    let ions = std::fs::read_to_string(output.join("matched_ions.sift.tsv"))?;
    assert!(ions.lines().count() > 1);

    let results: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output.join("results.json"))?)?;
    assert_eq!(results["min_frag_hits"], 2);
    assert_eq!(results["query_paths"].as_array().map(|a| a.len()), Some(2));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn missing_protein_map_skips_grouping() -> anyhow::Result<()> {
    let dir = workspace("no-proteins")?;
    let database = write_json(&dir.join("db.json"), &builder())?;
    let good = write_json(
        &dir.join("good.json"),
        &serde_json::json!({ "spectra": queries(), "features": null }),
    )?;
    let parameters = serde_json::json!({
        "database": database,
        "fragment_tol": { "da": 0.02 },
        "min_frag_hits": 2,
        "output_directory": dir.display().to_string(),
        "query_paths": [good],
    });
    let path = write_json(&dir.join("params.json"), &parameters)?;

    let summary = Runner::new(Input::load(path)?.build()?)?.run(1)?;
    assert_eq!(summary.failures().count(), 0);
    assert_eq!(summary.psms, 6);
    assert_eq!(summary.output_paths.len(), 2);

    let tsv = std::fs::read_to_string(dir.join("results.sift.tsv"))?;
    assert!(tsv.lines().skip(1).all(|line| line.ends_with("\t\t\t\t\t")));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn unreadable_database_is_an_error() -> anyhow::Result<()> {
    let dir = workspace("bad-db")?;
    std::fs::write(dir.join("db.json"), b"{ not json")?;
    let parameters = serde_json::json!({
        "database": dir.join("db.json").display().to_string(),
        "output_directory": dir.display().to_string(),
        "query_paths": [],
    });
    let path = write_json(&dir.join("params.json"), &parameters)?;
    assert!(Runner::new(Input::load(path)?.build()?).is_err());
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
