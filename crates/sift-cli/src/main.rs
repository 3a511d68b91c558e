use clap::{value_parser, Arg, Command, ValueHint};
use sift_cli::input::Input;
use sift_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SIFT_LOG", "error,sift=info"))
        .init();

    let matches = Command::new("sift")
        .version(clap::crate_version!())
        .about("Peptide-spectrum match search with target-decoy FDR and razor protein grouping")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("query_paths")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to query spectra files (JSON) to process. Overrides the files \
                     listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the candidate database (JSON). Overrides the database \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("protein_map")
                .short('p')
                .long("protein_map")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the peptide to protein map (JSON). Overrides the map \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where search results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of files to load and search in parallel (default = # of CPUs/2)")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("annotate-matches")
                .long("annotate-matches")
                .action(clap::ArgAction::SetTrue)
                .help("Write matched fragments output file."),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let parallel = matches
        .get_one::<u16>("batch-size")
        .copied()
        .map(usize::from)
        .unwrap_or_else(|| (num_cpus::get() / 2).max(1));

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;

    let summary = runner.run(parallel)?;
    let failed = summary.failures().count();
    if failed > 0 {
        log::warn!(
            "{} of {} files failed, {} psms reported",
            failed,
            summary.files.len(),
            summary.psms
        );
    }

    Ok(())
}
