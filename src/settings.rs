use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::corpus::Corpus;
use crate::error::{LdaError, Result};

/// A pair of switches, one per Dirichlet prior.
///
/// Written on the command line as two characters, `alpha` first: `"01"`
/// means "off for α (topic-document), on for β (word-topic)".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorFlags {
    pub alpha: bool,
    pub beta: bool,
}

impl PriorFlags {
    pub fn new(alpha: bool, beta: bool) -> PriorFlags {
        PriorFlags { alpha, beta }
    }
}

impl FromStr for PriorFlags {
    type Err = ParsePriorFlagsError;

    fn from_str(s: &str) -> std::result::Result<PriorFlags, ParsePriorFlagsError> {
        fn flag(c: u8) -> std::result::Result<bool, ParsePriorFlagsError> {
            match c {
                b'0' => Ok(false),
                b'1' => Ok(true),
                _ => Err(ParsePriorFlagsError),
            }
        }
        match s.as_bytes() {
            [a, b] => Ok(PriorFlags::new(flag(*a)?, flag(*b)?)),
            _ => Err(ParsePriorFlagsError),
        }
    }
}

impl fmt::Display for PriorFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.alpha as u8, self.beta as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePriorFlagsError;

impl fmt::Display for ParsePriorFlagsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        "expected two characters, each `0` or `1`".fmt(f)
    }
}

impl std::error::Error for ParsePriorFlagsError {}

/// Settings for a sampling run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Number of topics T.
    pub num_topics: usize,
    /// Number of Gibbs sweeps over the corpus.
    pub num_iterations: usize,
    /// Compute the log probability every this many sweeps; 0 disables it.
    pub print_interval: usize,
    /// Checkpoint every this many sweeps; 0 writes a single unsuffixed
    /// checkpoint at the end. Must divide `num_iterations`.
    pub save_state_interval: usize,
    /// Keep the prior uniform and optimize only its total mass.
    pub symmetric: PriorFlags,
    /// Re-estimate the prior after every sweep.
    pub optimize: PriorFlags,
    /// Initial total mass of α. Defaults to 0.1 T.
    pub alpha_sum: Option<f64>,
    /// Initial total mass of β. Defaults to 0.01 W.
    pub beta_sum: Option<f64>,
    /// Fixed-point iterations per optimization call.
    pub optimize_iterations: usize,
    pub seed: u64,
    /// Sweeps already done by a previous run whose state is being resumed.
    pub iteration_offset: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_topics: 10,
            num_iterations: 1000,
            print_interval: 50,
            save_state_interval: 0,
            symmetric: PriorFlags::new(false, true),
            optimize: PriorFlags::new(true, true),
            alpha_sum: None,
            beta_sum: None,
            optimize_iterations: 5,
            seed: 1,
            iteration_offset: 0,
        }
    }
}

impl Settings {
    pub fn alpha_sum(&self) -> f64 {
        self.alpha_sum.unwrap_or(0.1 * self.num_topics as f64)
    }

    pub fn beta_sum(&self, vocab_size: usize) -> f64 {
        self.beta_sum.unwrap_or(0.01 * vocab_size as f64)
    }

    /// Checks the settings against the corpus they will be run on.
    pub fn validate(&self, corpus: &Corpus) -> Result<()> {
        if self.num_topics == 0 {
            return Err(LdaError::Config("the number of topics must be positive".into()));
        }
        if self.save_state_interval != 0 && self.num_iterations % self.save_state_interval != 0 {
            return Err(LdaError::Config(format!(
                "save-state interval {} does not divide {} iterations",
                self.save_state_interval, self.num_iterations
            )));
        }
        if corpus.vocab_size() == 0 || corpus.num_tokens() == 0 {
            return Err(LdaError::Config("the corpus contains no tokens".into()));
        }
        check_token_count(corpus.num_tokens())?;
        for (name, sum) in &[
            ("alpha", self.alpha_sum()),
            ("beta", self.beta_sum(corpus.vocab_size())),
        ] {
            if !(sum.is_finite() && *sum > 0.0) {
                return Err(LdaError::Config(format!(
                    "{} must be a positive finite number, got {}",
                    name, sum
                )));
            }
        }
        Ok(())
    }
}

// Counts are kept as u32, so no cell, word frequency or document length may
// exceed u32::MAX. The total token count bounds all of them.
fn check_token_count(num_tokens: usize) -> Result<()> {
    if u32::try_from(num_tokens).is_err() {
        return Err(LdaError::Config(format!(
            "{} tokens exceed the supported maximum of {}",
            num_tokens,
            u32::MAX
        )));
    }
    Ok(())
}

/// Destinations of the reports written during and after a run. A `None`
/// disables that report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputFiles {
    pub state: Option<PathBuf>,
    pub alpha: Option<PathBuf>,
    pub beta: Option<PathBuf>,
    pub topic_words: Option<PathBuf>,
    pub topic_summary: Option<PathBuf>,
    pub document_topics: Option<PathBuf>,
    pub log_prob: Option<PathBuf>,
}

impl OutputFiles {
    /// The full set of reports under `dir`, with their conventional names.
    pub fn in_directory<P: AsRef<Path>>(dir: P) -> OutputFiles {
        let dir = dir.as_ref();
        OutputFiles {
            state: Some(dir.join("state.txt.gz")),
            alpha: Some(dir.join("alpha.txt")),
            beta: Some(dir.join("beta.txt")),
            topic_words: Some(dir.join("topic_words.txt.gz")),
            topic_summary: Some(dir.join("topic_summary.txt.gz")),
            document_topics: Some(dir.join("doc_topics.txt.gz")),
            log_prob: Some(dir.join("log_prob.txt")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Corpus {
        Corpus::new(vec![vec![0, 1, 0, 2, 1]], 3).unwrap()
    }

    #[test]
    fn parse_prior_flags() {
        assert_eq!("01".parse::<PriorFlags>(), Ok(PriorFlags::new(false, true)));
        assert_eq!("10".parse::<PriorFlags>(), Ok(PriorFlags::new(true, false)));
        assert_eq!(PriorFlags::new(true, true).to_string(), "11");
        for bad in &["", "1", "012", "2a", "ab", "1 "] {
            assert_eq!(bad.parse::<PriorFlags>(), Err(ParsePriorFlagsError), "{:?}", bad);
        }
    }

    #[test]
    fn default_prior_sums_scale_with_dimensions() {
        let settings = Settings {
            num_topics: 20,
            ..Settings::default()
        };
        assert_eq!(settings.alpha_sum(), 2.0);
        assert_eq!(settings.beta_sum(500), 5.0);

        let settings = Settings {
            alpha_sum: Some(0.5),
            beta_sum: Some(0.03),
            ..Settings::default()
        };
        assert_eq!(settings.alpha_sum(), 0.5);
        assert_eq!(settings.beta_sum(500), 0.03);
    }

    #[test]
    fn save_state_interval_must_divide_iterations() {
        let settings = Settings {
            num_iterations: 10,
            save_state_interval: 3,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(&corpus()), Err(LdaError::Config(_))));

        let settings = Settings {
            num_iterations: 10,
            save_state_interval: 5,
            ..Settings::default()
        };
        settings.validate(&corpus()).unwrap();

        let settings = Settings {
            num_iterations: 10,
            save_state_interval: 0,
            ..Settings::default()
        };
        settings.validate(&corpus()).unwrap();
    }

    #[test]
    fn degenerate_settings_are_rejected() {
        let zero_topics = Settings {
            num_topics: 0,
            ..Settings::default()
        };
        assert!(zero_topics.validate(&corpus()).is_err());

        let negative_beta = Settings {
            beta_sum: Some(-1.0),
            ..Settings::default()
        };
        assert!(negative_beta.validate(&corpus()).is_err());

        let empty = Corpus::new(vec![vec![], vec![]], 3).unwrap();
        assert!(Settings::default().validate(&empty).is_err());
    }

    #[test]
    fn token_count_must_fit_the_count_range() {
        check_token_count(u32::MAX as usize).unwrap();
        if let Some(too_many) = (u32::MAX as usize).checked_add(1) {
            assert!(matches!(check_token_count(too_many), Err(LdaError::Config(_))));
        }
    }

    #[test]
    fn output_files_in_directory() {
        let files = OutputFiles::in_directory("/tmp/run");
        assert_eq!(files.state, Some(PathBuf::from("/tmp/run/state.txt.gz")));
        assert_eq!(files.log_prob, Some(PathBuf::from("/tmp/run/log_prob.txt")));
        assert_eq!(OutputFiles::default().alpha, None);
    }
}
