//! Collapsed Gibbs sampler for LDA.
//!
//! The sampler owns the topic assignment of every token and the two count
//! tables summarizing it. Each sweep removes one token at a time from the
//! tables, draws a new topic from
//!
//! ```text
//! p(z_di = j | rest) ∝ (N_wj + β_w) / (N_.j + Σβ) · (N_jd + α_j) / (N_.d + Σα)
//! ```
//!
//! and puts it back, so the tables always describe the current assignment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::corpus::Corpus;
use crate::count_model::CountModel;
use crate::error::{LdaError, Result};
use crate::math::Categorical;
use crate::report::{Checkpoint, ModelView, Reporter};
use crate::settings::Settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    /// Number of sweeps completed in this run.
    Sampling(usize),
    Finalized,
}

/// Summary of a finished run, serializable as the model file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub settings: Settings,
    pub num_docs: usize,
    pub vocab_size: usize,
    pub num_tokens: usize,
    /// Total sweeps including those of resumed runs.
    pub iterations: usize,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    /// Tokens assigned to each topic.
    pub topic_totals: Vec<u32>,
    pub log_prob: Option<f64>,
}

pub struct Estimator<'a> {
    corpus: &'a Corpus,
    settings: Settings,
    rng: StdRng,
    // z[d][i]
    assignments: Vec<Vec<usize>>,
    // rows: word types, columns: topics, prior: β
    word_topic: CountModel,
    // rows: topics, columns: documents, prior: α
    topic_document: CountModel,
    phase: Phase,
    weights: Vec<f64>,
    last_log_prob: Option<f64>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Estimator<'a> {
    pub fn new(corpus: &'a Corpus, settings: Settings) -> Result<Estimator<'a>> {
        settings.validate(corpus)?;

        let num_topics = settings.num_topics;
        let word_topic = CountModel::new(
            corpus.vocab_size(),
            num_topics,
            settings.beta_sum(corpus.vocab_size()),
        );
        let topic_document = CountModel::new(num_topics, corpus.num_docs(), settings.alpha_sum());
        let rng = StdRng::seed_from_u64(settings.seed);

        Ok(Estimator {
            corpus,
            settings,
            rng,
            assignments: Vec::with_capacity(corpus.num_docs()),
            word_topic,
            topic_document,
            phase: Phase::Uninitialized,
            weights: vec![0.0; num_topics],
            last_log_prob: None,
            cancel: None,
        })
    }

    /// Stops `run` after the sweep in progress once `flag` is set.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn assignments(&self) -> &[Vec<usize>] {
        &self.assignments
    }

    pub fn alpha(&self) -> &[f64] {
        self.topic_document.prior()
    }

    pub fn beta(&self) -> &[f64] {
        self.word_topic.prior()
    }

    pub fn word_topic(&self) -> &CountModel {
        &self.word_topic
    }

    pub fn topic_document(&self) -> &CountModel {
        &self.topic_document
    }

    pub fn view(&self) -> ModelView<'_> {
        ModelView {
            corpus: self.corpus,
            word_topic: &self.word_topic,
            topic_document: &self.topic_document,
        }
    }

    /// Assigns every token a topic and fills the count tables.
    ///
    /// Without `initial`, topics are drawn token by token from the
    /// conditional given the tokens placed so far. With `initial`, those
    /// assignments are used as they are, e.g. to resume from a saved state.
    pub fn initialize(&mut self, initial: Option<Vec<Vec<usize>>>) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            return Err(LdaError::Invariant(format!(
                "initialize called in phase {:?}",
                self.phase
            )));
        }
        info!(
            docs = self.corpus.num_docs(),
            vocab = self.corpus.vocab_size(),
            topics = self.settings.num_topics,
            tokens = self.corpus.num_tokens(),
            "initializing"
        );

        match initial {
            None => self.draw_initial_assignments(),
            Some(z) => {
                self.check_assignments(&z)?;
                for (d, (doc, z_d)) in self.corpus.documents().iter().zip(&z).enumerate() {
                    for (&w, &j) in doc.iter().zip(z_d) {
                        self.word_topic.increment(w, j, false);
                        self.topic_document.increment(j, d, false);
                    }
                }
                self.assignments = z;
            }
        }

        let max_len = u32::try_from(self.corpus.max_document_length()).map_err(|_| {
            LdaError::Config(format!(
                "document of {} tokens exceeds the count range",
                self.corpus.max_document_length()
            ))
        })?;
        self.word_topic.initialize_histograms(&self.corpus.word_counts())?;
        self.topic_document
            .initialize_histograms(&vec![max_len; self.settings.num_topics])?;

        self.phase = Phase::Initialized;
        Ok(())
    }

    fn draw_initial_assignments(&mut self) {
        let Estimator {
            corpus,
            rng,
            assignments,
            word_topic,
            topic_document,
            weights,
            ..
        } = self;

        for (d, doc) in corpus.documents().iter().enumerate() {
            let mut z_d = Vec::with_capacity(doc.len());
            for &w in doc {
                let j = draw_topic(word_topic, topic_document, weights, w, d, rng);
                word_topic.increment(w, j, false);
                topic_document.increment(j, d, false);
                z_d.push(j);
            }
            assignments.push(z_d);
        }
    }

    fn check_assignments(&self, z: &[Vec<usize>]) -> Result<()> {
        if z.len() != self.corpus.num_docs() {
            return Err(LdaError::Config(format!(
                "initial assignments cover {} documents, corpus has {}",
                z.len(),
                self.corpus.num_docs()
            )));
        }
        for (d, (doc, z_d)) in self.corpus.documents().iter().zip(z).enumerate() {
            if doc.len() != z_d.len() {
                return Err(LdaError::Config(format!(
                    "initial assignments for document {} have {} tokens, expected {}",
                    d,
                    z_d.len(),
                    doc.len()
                )));
            }
            if let Some(&j) = z_d.iter().find(|&&j| j >= self.settings.num_topics) {
                return Err(LdaError::Config(format!(
                    "topic {} in document {} is out of range for {} topics",
                    j, d, self.settings.num_topics
                )));
            }
        }
        Ok(())
    }

    /// Resamples the topic of every token once, in corpus order.
    pub fn sweep(&mut self) -> Result<()> {
        let done = match self.phase {
            Phase::Initialized => 0,
            Phase::Sampling(s) => s,
            phase => {
                return Err(LdaError::Invariant(format!("sweep called in phase {:?}", phase)));
            }
        };

        let Estimator {
            corpus,
            rng,
            assignments,
            word_topic,
            topic_document,
            weights,
            ..
        } = self;

        for (d, (doc, z_d)) in corpus.documents().iter().zip(assignments.iter_mut()).enumerate() {
            for (&w, z_di) in doc.iter().zip(z_d.iter_mut()) {
                let old = *z_di;
                word_topic.decrement(w, old, true);
                topic_document.decrement(old, d, true);

                let new = draw_topic(word_topic, topic_document, weights, w, d, rng);

                *z_di = new;
                word_topic.increment(w, new, true);
                topic_document.increment(new, d, true);
            }
        }

        self.phase = Phase::Sampling(done + 1);
        Ok(())
    }

    /// Re-estimates the priors selected by `settings.optimize`.
    pub fn optimize_priors(&mut self) -> Result<()> {
        let n = self.settings.optimize_iterations;
        let Settings {
            symmetric, optimize, ..
        } = self.settings;

        if optimize.alpha {
            if symmetric.alpha {
                self.topic_document.optimize_sum(n)?;
            } else {
                self.topic_document.optimize_asymmetric(n)?;
            }
        }
        if optimize.beta {
            if symmetric.beta {
                self.word_topic.optimize_sum(n)?;
            } else {
                self.word_topic.optimize_asymmetric(n)?;
            }
        }
        debug!(
            alpha_sum = self.topic_document.prior_sum(),
            beta_sum = self.word_topic.prior_sum(),
            "optimized priors"
        );
        Ok(())
    }

    /// Log joint probability of the words and the current assignment,
    /// computed by re-adding every token through the predictive
    /// distribution. The count tables are rebuilt in the process and end up
    /// exactly as they were.
    pub fn log_prob(&mut self) -> Result<f64> {
        match self.phase {
            Phase::Initialized | Phase::Sampling(_) => {}
            phase => {
                return Err(LdaError::Invariant(format!("log_prob called in phase {:?}", phase)));
            }
        }

        self.word_topic.reset_counts();
        self.topic_document.reset_counts();

        let mut log_prob = 0.0;
        for (d, (doc, z_d)) in self.corpus.documents().iter().zip(&self.assignments).enumerate() {
            for (&w, &j) in doc.iter().zip(z_d) {
                log_prob += f64::ln(self.word_topic.score(w, j) * self.topic_document.score(j, d));
                self.word_topic.increment(w, j, false);
                self.topic_document.increment(j, d, false);
            }
        }

        self.last_log_prob = Some(log_prob);
        Ok(log_prob)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Runs all configured sweeps and finalizes.
    ///
    /// Initializes with random assignments unless `initialize` was called
    /// already.
    pub fn run<R: Reporter + ?Sized>(&mut self, reporter: &mut R) -> Result<FittedModel> {
        if self.phase == Phase::Uninitialized {
            self.initialize(None)?;
        }

        let start = Instant::now();
        let offset = self.settings.iteration_offset;
        let mut cancelled = false;

        for s in 1..=self.settings.num_iterations {
            if self.is_cancelled() {
                warn!(completed = s - 1, "sampling cancelled");
                cancelled = true;
                break;
            }

            self.sweep()?;
            debug!(iteration = offset + s, "sweep done");

            self.optimize_priors()?;

            let print_interval = self.settings.print_interval;
            if print_interval != 0 && s % print_interval == 0 {
                let log_prob = self.log_prob()?;
                info!(iteration = offset + s, log_prob, "sampling");
                reporter.log_prob(offset + s, log_prob, &self.view());
            }

            let save_interval = self.settings.save_state_interval;
            if save_interval != 0 && s % save_interval == 0 {
                reporter.checkpoint(&self.checkpoint(offset + s, true), self.corpus);
            }
        }

        info!(elapsed = ?start.elapsed(), "sampling finished");
        self.finalize(reporter, cancelled)
    }

    fn checkpoint(&self, iteration: usize, suffixed: bool) -> Checkpoint {
        Checkpoint {
            iteration,
            suffixed,
            assignments: self.assignments.clone(),
            alpha: self.alpha().to_vec(),
            beta: self.beta().to_vec(),
        }
    }

    /// Writes the final checkpoint and reports.
    ///
    /// The unsuffixed checkpoint is written when no periodic checkpoints were
    /// requested, or when the run was cut short.
    pub fn finalize<R: Reporter + ?Sized>(
        &mut self,
        reporter: &mut R,
        cancelled: bool,
    ) -> Result<FittedModel> {
        let completed = match self.phase {
            Phase::Initialized => 0,
            Phase::Sampling(s) => s,
            phase => {
                return Err(LdaError::Invariant(format!("finalize called in phase {:?}", phase)));
            }
        };
        let iterations = self.settings.iteration_offset + completed;

        if self.settings.save_state_interval == 0 || cancelled {
            reporter.checkpoint(&self.checkpoint(iterations, false), self.corpus);
        }
        reporter.finish(&self.view());

        self.phase = Phase::Finalized;
        Ok(FittedModel {
            settings: self.settings.clone(),
            num_docs: self.corpus.num_docs(),
            vocab_size: self.corpus.vocab_size(),
            num_tokens: self.corpus.num_tokens(),
            iterations,
            alpha: self.alpha().to_vec(),
            beta: self.beta().to_vec(),
            topic_totals: (0..self.settings.num_topics)
                .map(|j| self.word_topic.marginal(j))
                .collect(),
            log_prob: self.last_log_prob,
        })
    }
}

fn draw_topic<R: Rng + ?Sized>(
    word_topic: &CountModel,
    topic_document: &CountModel,
    weights: &mut [f64],
    w: usize,
    d: usize,
    rng: &mut R,
) -> usize {
    let mut sum = 0.0;
    for (j, weight) in weights.iter_mut().enumerate() {
        *weight = word_topic.score(w, j) * topic_document.score(j, d);
        sum += *weight;
    }
    Categorical::new(weights, sum).sample(rng)
}
