use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilda::report::{self, SUMMARY_WORDS};
use tilda::{Corpus, Estimator, FileReporter, OutputFiles, PriorFlags, Settings};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TILDA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cli() -> Command {
    Command::new("TiLDA")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Yuta Taniguchi <yuta.taniguchi.y.t@gmail.com>")
        .about("Latent Dirichlet allocation implemented in Rust")
        .arg(Arg::new("topics")
             .long("topics")
             .value_name("NUMBER")
             .value_parser(value_parser!(usize))
             .required(true)
             .help("Set the number of topics"))
        .arg(Arg::new("iterations")
             .long("iterations")
             .value_name("NUMBER")
             .value_parser(value_parser!(usize))
             .default_value("1000")
             .help("Set the number of Gibbs sweeps"))
        .arg(Arg::new("print-interval")
             .long("print-interval")
             .value_name("NUMBER")
             .value_parser(value_parser!(usize))
             .default_value("50")
             .help("Compute the log probability every NUMBER sweeps (0 never)"))
        .arg(Arg::new("save-state-interval")
             .long("save-state-interval")
             .value_name("NUMBER")
             .value_parser(value_parser!(usize))
             .default_value("0")
             .help("Save the state every NUMBER sweeps (0 only at the end)"))
        .arg(Arg::new("symmetric")
             .long("symmetric")
             .value_name("AB")
             .value_parser(value_parser!(PriorFlags))
             .default_value("01")
             .help("Keep alpha (A) and beta (B) symmetric, e.g. 01"))
        .arg(Arg::new("optimize")
             .long("optimize")
             .value_name("AB")
             .value_parser(value_parser!(PriorFlags))
             .default_value("11")
             .help("Optimize alpha (A) and beta (B), e.g. 11"))
        .arg(Arg::new("alpha")
             .long("alpha")
             .value_name("SUM")
             .value_parser(value_parser!(f64))
             .help("Set the initial sum of alpha [default: 0.1 * topics]"))
        .arg(Arg::new("beta")
             .long("beta")
             .value_name("SUM")
             .value_parser(value_parser!(f64))
             .help("Set the initial sum of beta [default: 0.01 * vocabulary size]"))
        .arg(Arg::new("seed")
             .long("seed")
             .value_name("NUMBER")
             .value_parser(value_parser!(u64))
             .default_value("1")
             .help("Seed the random number generator"))
        .arg(Arg::new("output-dir")
             .long("output-dir")
             .value_name("DIR")
             .value_parser(value_parser!(PathBuf))
             .help("Write reports and checkpoints into DIR"))
        .arg(Arg::new("model")
             .long("model")
             .value_name("MODEL-FILE")
             .value_parser(value_parser!(PathBuf))
             .help("Write the fitted model as JSON"))
        .arg(Arg::new("resume")
             .long("resume")
             .value_name("STATE-FILE")
             .value_parser(value_parser!(PathBuf))
             .help("Start from the assignments in a saved state file"))
        .arg(Arg::new("iteration-offset")
             .long("iteration-offset")
             .value_name("NUMBER")
             .value_parser(value_parser!(usize))
             .default_value("0")
             .requires("resume")
             .help("Number of sweeps behind the resumed state"))
        .arg(Arg::new("INPUT")
             .help("Sets the corpus file to use, one document per line")
             .required(true)
             .index(1)
             .value_parser(value_parser!(PathBuf)))
        .arg_required_else_help(true)
}

fn value<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing value for `{}`", id))
}

fn settings_from(matches: &ArgMatches) -> Result<Settings> {
    Ok(Settings {
        num_topics: value(matches, "topics")?,
        num_iterations: value(matches, "iterations")?,
        print_interval: value(matches, "print-interval")?,
        save_state_interval: value(matches, "save-state-interval")?,
        symmetric: value(matches, "symmetric")?,
        optimize: value(matches, "optimize")?,
        alpha_sum: matches.get_one::<f64>("alpha").copied(),
        beta_sum: matches.get_one::<f64>("beta").copied(),
        seed: value(matches, "seed")?,
        iteration_offset: value(matches, "iteration-offset")?,
        ..Settings::default()
    })
}

// A resumed run extends the log-probability trace of the run it continues.
fn resuming(matches: &ArgMatches) -> bool {
    matches.get_one::<PathBuf>("resume").is_some()
}

fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    let input: PathBuf = value(&matches, "INPUT")?;
    let corpus = Corpus::load_text(&input)
        .with_context(|| format!("failed to load corpus from {}", input.display()))?;
    let settings = settings_from(&matches)?;
    settings.validate(&corpus)?;

    let files = match matches.get_one::<PathBuf>("output-dir") {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let options = dir.join("options.txt");
            if let Err(e) = report::write_options(&options, &input, &corpus, &settings) {
                warn!(error = %e, "run metadata skipped");
            }
            OutputFiles::in_directory(dir)
        }
        None => OutputFiles::default(),
    };

    let append_log_prob = resuming(&matches);
    let mut estimator = Estimator::new(&corpus, settings)?;
    if let Some(state) = matches.get_one::<PathBuf>("resume") {
        info!(state = %state.display(), "resuming");
        let z = report::read_state(state, &corpus)?;
        estimator.initialize(Some(z))?;
    }

    let mut reporter = FileReporter::new(files, append_log_prob);
    let model = estimator.run(&mut reporter)?;

    for line in report::topic_summary(&corpus, estimator.word_topic(), SUMMARY_WORDS) {
        println!("{}", line);
    }

    if let Some(fp) = matches.get_one::<PathBuf>("model") {
        let file = File::create(fp).with_context(|| format!("failed to create {}", fp.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &model)
            .with_context(|| format!("failed to write {}", fp.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn arguments_map_onto_settings() {
        let matches = cli()
            .try_get_matches_from([
                "tilda", "--topics", "7", "--iterations", "20", "--save-state-interval", "5",
                "--symmetric", "11", "--optimize", "10", "--beta", "0.5", "corpus.txt",
            ])
            .unwrap();
        let settings = settings_from(&matches).unwrap();
        assert_eq!(settings.num_topics, 7);
        assert_eq!(settings.num_iterations, 20);
        assert_eq!(settings.save_state_interval, 5);
        assert_eq!(settings.symmetric, PriorFlags::new(true, true));
        assert_eq!(settings.optimize, PriorFlags::new(true, false));
        assert_eq!(settings.alpha_sum, None);
        assert_eq!(settings.beta_sum, Some(0.5));
        assert_eq!(settings.print_interval, 50);
    }

    #[test]
    fn resume_without_offset_extends_trace() {
        let matches = cli()
            .try_get_matches_from(["tilda", "--topics", "3", "--resume", "out/state.txt.gz", "corpus.txt"])
            .unwrap();
        assert_eq!(settings_from(&matches).unwrap().iteration_offset, 0);
        assert!(resuming(&matches));

        let matches = cli().try_get_matches_from(["tilda", "--topics", "3", "corpus.txt"]).unwrap();
        assert!(!resuming(&matches));
    }

    #[test]
    fn malformed_flags_are_rejected() {
        let result = cli().try_get_matches_from(["tilda", "--topics", "3", "--optimize", "1", "corpus.txt"]);
        assert!(result.is_err());
        let result = cli().try_get_matches_from(["tilda", "--topics", "3", "--iteration-offset", "4", "corpus.txt"]);
        assert!(result.is_err());
    }
}
