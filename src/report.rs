//! Reports and checkpoints.
//!
//! The sampler hands a [`Reporter`] everything worth persisting; what gets
//! written where is up to the reporter. [`FileReporter`] writes the plain
//! text files described by [`OutputFiles`]. A file whose name ends in `.gz`
//! is gzip-compressed.
//!
//! A report that cannot be written is logged and skipped. It never stops
//! the sampler.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::corpus::Corpus;
use crate::count_model::CountModel;
use crate::error::{LdaError, Result};
use crate::settings::{OutputFiles, Settings};

/// Number of words per topic in summaries.
pub const SUMMARY_WORDS: usize = 10;

/// Read-only access to the fitted tables.
#[derive(Clone, Copy)]
pub struct ModelView<'a> {
    pub corpus: &'a Corpus,
    pub word_topic: &'a CountModel,
    pub topic_document: &'a CountModel,
}

/// Snapshot of the chain taken between sweeps.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    /// Absolute iteration number, including resumed iterations.
    pub iteration: usize,
    /// Periodic checkpoints carry their iteration in the file name.
    pub suffixed: bool,
    pub assignments: Vec<Vec<usize>>,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
}

pub trait Reporter {
    fn log_prob(&mut self, _iteration: usize, _log_prob: f64, _view: &ModelView<'_>) {}
    fn checkpoint(&mut self, _checkpoint: &Checkpoint, _corpus: &Corpus) {}
    fn finish(&mut self, _view: &ModelView<'_>) {}
}

impl Reporter for () {}

pub struct FileReporter {
    files: OutputFiles,
    append_log_prob: bool,
}

impl FileReporter {
    /// With `append_log_prob`, an existing log-probability trace is extended
    /// instead of replaced, as when resuming a run.
    pub fn new(files: OutputFiles, append_log_prob: bool) -> FileReporter {
        FileReporter {
            files,
            append_log_prob,
        }
    }

    fn attempt<F>(what: &str, path: &Path, write: F)
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if let Err(e) = write(path) {
            warn!(report = what, error = %e, "report skipped");
        }
    }
}

impl Reporter for FileReporter {
    fn log_prob(&mut self, _iteration: usize, log_prob: f64, view: &ModelView<'_>) {
        for line in topic_summary(view.corpus, view.word_topic, SUMMARY_WORDS) {
            info!("{}", line);
        }
        if let Some(ref path) = self.files.log_prob {
            let append = self.append_log_prob;
            FileReporter::attempt("log probability", path, |p| append_log_prob(p, log_prob, append));
            // Later ticks of this run always extend the file
            self.append_log_prob = true;
        }
    }

    fn checkpoint(&mut self, checkpoint: &Checkpoint, corpus: &Corpus) {
        let name = |path: &PathBuf| -> PathBuf {
            if checkpoint.suffixed {
                suffixed(path, checkpoint.iteration)
            } else {
                path.clone()
            }
        };
        info!(iteration = checkpoint.iteration, "saving state");

        if let Some(ref path) = self.files.state {
            FileReporter::attempt("state", &name(path), |p| {
                write_state(p, corpus, &checkpoint.assignments)
            });
        }
        if let Some(ref path) = self.files.alpha {
            FileReporter::attempt("alpha", &name(path), |p| write_param(p, &checkpoint.alpha));
        }
        if let Some(ref path) = self.files.beta {
            FileReporter::attempt("beta", &name(path), |p| write_param(p, &checkpoint.beta));
        }
    }

    fn finish(&mut self, view: &ModelView<'_>) {
        if let Some(ref path) = self.files.document_topics {
            FileReporter::attempt("document topics", path, |p| {
                write_document_topics(p, view.topic_document)
            });
        }
        if let Some(ref path) = self.files.topic_words {
            FileReporter::attempt("topic words", path, |p| {
                write_topic_words(p, view.corpus, view.word_topic)
            });
        }
        if let Some(ref path) = self.files.topic_summary {
            FileReporter::attempt("topic summary", path, |p| {
                write_topic_summary(p, view.corpus, view.word_topic, SUMMARY_WORDS)
            });
        }
    }
}

/// Tags a file name with an iteration number, keeping a trailing `.gz`
/// last: `beta.txt` becomes `beta.txt.50`, `state.txt.gz` becomes
/// `state.txt.50.gz`.
pub fn suffixed(path: &Path, iteration: usize) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match name.strip_suffix(".gz") {
        Some(stem) => format!("{}.{}.gz", stem, iteration),
        None => format!("{}.{}", name, iteration),
    };
    path.with_file_name(name)
}

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn create(path: &Path, append: bool) -> io::Result<Output> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        let file = BufWriter::new(file);
        if is_gzip(path) {
            Ok(Output::Gzip(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(Output::Plain(file))
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

fn with_output<F>(path: &Path, append: bool, body: F) -> Result<()>
where
    F: FnOnce(&mut Output) -> io::Result<()>,
{
    let io = |e| LdaError::io(path, e);
    let mut out = Output::create(path, append).map_err(io)?;
    body(&mut out).map_err(io)?;
    out.finish().map_err(io)
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| LdaError::io(path, e))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// One line per token: `doc pos typeindex type topic`.
pub fn write_state(path: &Path, corpus: &Corpus, z: &[Vec<usize>]) -> Result<()> {
    with_output(path, false, |out| {
        writeln!(out, "#doc pos typeindex type topic")?;
        for (d, (doc, z_d)) in corpus.documents().iter().zip(z).enumerate() {
            for (i, (&w, &j)) in doc.iter().zip(z_d).enumerate() {
                writeln!(out, "{} {} {} {} {}", d, i, w, corpus.word(w), j)?;
            }
        }
        Ok(())
    })
}

/// Reads assignments written by [`write_state`] back, checking them against
/// `corpus`.
pub fn read_state(path: &Path, corpus: &Corpus) -> Result<Vec<Vec<usize>>> {
    let mut z: Vec<Vec<usize>> = corpus.documents().iter().map(|doc| Vec::with_capacity(doc.len())).collect();
    let parse_error = |line: usize, message: String| LdaError::Parse {
        path: path.to_owned(),
        line,
        message,
    };

    for (n, line) in open_input(path)?.lines().enumerate() {
        let line = line.map_err(|e| LdaError::io(path, e))?;
        let line_no = n + 1;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(parse_error(line_no, format!("expected 5 fields, found {}", fields.len())));
        }
        let number = |i: usize| {
            fields[i]
                .parse::<usize>()
                .map_err(|e| parse_error(line_no, format!("field {}: {}", i + 1, e)))
        };
        let (d, pos, w, j) = (number(0)?, number(1)?, number(2)?, number(4)?);

        match corpus.documents().get(d).and_then(|doc| doc.get(pos)) {
            Some(&expected) if expected == w && z[d].len() == pos => z[d].push(j),
            _ => {
                return Err(parse_error(
                    line_no,
                    format!("token ({}, {}) with word {} does not match the corpus", d, pos, w),
                ))
            }
        }
    }
    Ok(z)
}

/// One value per line.
pub fn write_param(path: &Path, param: &[f64]) -> Result<()> {
    with_output(path, false, |out| {
        for value in param {
            writeln!(out, "{}", value)?;
        }
        Ok(())
    })
}

fn append_log_prob(path: &Path, log_prob: f64, append: bool) -> Result<()> {
    with_output(path, append, |out| writeln!(out, "{}", log_prob))
}

/// For every topic, all words with nonzero probability ranked by
/// `score(word, topic)`.
pub fn write_topic_words(path: &Path, corpus: &Corpus, word_topic: &CountModel) -> Result<()> {
    with_output(path, false, |out| {
        writeln!(out, "#topic typeindex type proportion")?;
        for j in 0..word_topic.cols() {
            for (w, prob) in word_topic.ranked_rows(j) {
                if prob <= 0.0 {
                    break;
                }
                writeln!(out, "{} {} {} {}", j, w, corpus.word(w), prob)?;
            }
        }
        Ok(())
    })
}

/// `Topic j: w1 w2 ...` lines with the `num_words` most probable words.
pub fn topic_summary(corpus: &Corpus, word_topic: &CountModel, num_words: usize) -> Vec<String> {
    (0..word_topic.cols())
        .map(|j| {
            let words: Vec<String> = word_topic
                .ranked_rows(j)
                .into_iter()
                .take(num_words)
                .take_while(|&(_, prob)| prob > 0.0)
                .map(|(w, _)| corpus.word(w).into_owned())
                .collect();
            format!("Topic {}: {}", j, words.join(" "))
        })
        .collect()
}

pub fn write_topic_summary(
    path: &Path,
    corpus: &Corpus,
    word_topic: &CountModel,
    num_words: usize,
) -> Result<()> {
    with_output(path, false, |out| {
        for line in topic_summary(corpus, word_topic, num_words) {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    })
}

/// For every document, its topics ranked by `score(topic, doc)`.
pub fn write_document_topics(path: &Path, topic_document: &CountModel) -> Result<()> {
    with_output(path, false, |out| {
        writeln!(out, "#doc topic proportion ...")?;
        for d in 0..topic_document.cols() {
            write!(out, "{}", d)?;
            for (j, prob) in topic_document.ranked_rows(d) {
                write!(out, " {} {}", j, prob)?;
            }
            writeln!(out)?;
        }
        Ok(())
    })
}

/// Run metadata, written once before sampling.
pub fn write_options(path: &Path, source: &Path, corpus: &Corpus, settings: &Settings) -> Result<()> {
    with_output(path, false, |out| {
        writeln!(out, "Corpus = {}", source.display())?;
        writeln!(out, "# documents = {}", corpus.num_docs())?;
        writeln!(out, "# word types = {}", corpus.vocab_size())?;
        writeln!(out, "# tokens = {}", corpus.num_tokens())?;
        writeln!(out, "T = {}", settings.num_topics)?;
        writeln!(out, "# iterations = {}", settings.num_iterations)?;
        writeln!(out, "Iteration offset = {}", settings.iteration_offset)?;
        writeln!(out, "Print interval = {}", settings.print_interval)?;
        writeln!(out, "Save state interval = {}", settings.save_state_interval)?;
        writeln!(out, "Symmetric alpha = {}", settings.symmetric.alpha)?;
        writeln!(out, "Symmetric beta = {}", settings.symmetric.beta)?;
        writeln!(out, "Optimize alpha = {}", settings.optimize.alpha)?;
        writeln!(out, "Optimize beta = {}", settings.optimize.beta)?;
        writeln!(out, "Alpha sum = {}", settings.alpha_sum())?;
        writeln!(out, "Beta sum = {}", settings.beta_sum(corpus.vocab_size()))?;
        writeln!(out, "Seed = {}", settings.seed)?;
        writeln!(out, "Date = {}", chrono::Local::now().to_rfc2822())?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus() -> Corpus {
        let mut vocab = crate::corpus::Vocabulary::new();
        let docs = vec![
            "health brocolli good good".split(' ').map(|w| vocab.intern(w)).collect(),
            "mother brother mother".split(' ').map(|w| vocab.intern(w)).collect(),
        ];
        Corpus::with_vocabulary(docs, vocab).unwrap()
    }

    // Topic 0 holds the first document, topic 1 the second
    fn fitted(corpus: &Corpus) -> (Vec<Vec<usize>>, CountModel, CountModel) {
        let z = vec![vec![0, 0, 0, 0], vec![1, 1, 1]];
        let mut word_topic = CountModel::new(corpus.vocab_size(), 2, 0.05);
        let mut topic_document = CountModel::new(2, corpus.num_docs(), 0.2);
        for (d, (doc, z_d)) in corpus.documents().iter().zip(&z).enumerate() {
            for (&w, &j) in doc.iter().zip(z_d) {
                word_topic.increment(w, j, false);
                topic_document.increment(j, d, false);
            }
        }
        (z, word_topic, topic_document)
    }

    #[test]
    fn suffixed_names() {
        assert_eq!(suffixed(Path::new("out/beta.txt"), 50), PathBuf::from("out/beta.txt.50"));
        assert_eq!(
            suffixed(Path::new("out/state.txt.gz"), 120),
            PathBuf::from("out/state.txt.120.gz")
        );
    }

    #[test]
    fn state_file_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus();
        let (z, _, _) = fitted(&corpus);

        for name in &["state.txt", "state.txt.gz"] {
            let path = dir.path().join(name);
            write_state(&path, &corpus, &z).unwrap();
            assert_eq!(read_state(&path, &corpus).unwrap(), z);
        }

        let text = fs::read_to_string(dir.path().join("state.txt")).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("#doc pos typeindex type topic"));
        assert_eq!(lines.next(), Some("0 0 0 health 0"));
        assert_eq!(text.lines().last(), Some("1 2 3 mother 1"));
    }

    #[test]
    fn state_file_must_match_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.txt");
        fs::write(&path, "#doc pos typeindex type topic\n0 0 1 brocolli 0\n").unwrap();
        assert!(matches!(read_state(&path, &corpus()), Err(LdaError::Parse { line: 2, .. })));

        fs::write(&path, "0 0 0 health\n").unwrap();
        assert!(matches!(read_state(&path, &corpus()), Err(LdaError::Parse { line: 1, .. })));
    }

    #[test]
    fn topic_summary_ranks_words() {
        let corpus = corpus();
        let (_, word_topic, _) = fitted(&corpus);
        // health and brocolli tie in topic 0
        let summary = topic_summary(&corpus, &word_topic, 2);
        assert_eq!(summary, vec!["Topic 0: good health", "Topic 1: mother brother"]);
    }

    #[test]
    fn file_reporter_writes_every_report() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus();
        let (z, word_topic, topic_document) = fitted(&corpus);
        let view = ModelView {
            corpus: &corpus,
            word_topic: &word_topic,
            topic_document: &topic_document,
        };
        let files = OutputFiles::in_directory(dir.path());
        let mut reporter = FileReporter::new(files.clone(), false);

        reporter.log_prob(5, -12.5, &view);
        reporter.log_prob(10, -11.0, &view);
        let checkpoint = Checkpoint {
            iteration: 10,
            suffixed: true,
            assignments: z.clone(),
            alpha: topic_document.prior().to_vec(),
            beta: word_topic.prior().to_vec(),
        };
        reporter.checkpoint(&checkpoint, &corpus);
        reporter.finish(&view);

        assert_eq!(fs::read_to_string(dir.path().join("log_prob.txt")).unwrap(), "-12.5\n-11\n");
        assert_eq!(fs::read_to_string(dir.path().join("alpha.txt.10")).unwrap(), "0.1\n0.1\n");
        assert_eq!(read_state(&dir.path().join("state.txt.10.gz"), &corpus).unwrap(), z);
        for path in &[files.topic_words, files.topic_summary, files.document_topics] {
            assert!(path.as_ref().unwrap().exists());
        }
        assert!(!dir.path().join("alpha.txt").exists());
    }

    #[test]
    fn resumed_trace_is_extended() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus();
        let (_, word_topic, topic_document) = fitted(&corpus);
        let view = ModelView {
            corpus: &corpus,
            word_topic: &word_topic,
            topic_document: &topic_document,
        };
        let path = dir.path().join("log_prob.txt");
        fs::write(&path, "-20\n").unwrap();

        let files = OutputFiles {
            log_prob: Some(path.clone()),
            ..OutputFiles::default()
        };
        FileReporter::new(files, true).log_prob(1, -19.0, &view);
        assert_eq!(fs::read_to_string(&path).unwrap(), "-20\n-19\n");
    }

    #[test]
    fn failed_report_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus();
        let (z, word_topic, _) = fitted(&corpus);
        let files = OutputFiles {
            state: Some(dir.path().join("missing").join("state.txt")),
            beta: Some(dir.path().join("beta.txt")),
            ..OutputFiles::default()
        };
        let checkpoint = Checkpoint {
            iteration: 3,
            suffixed: false,
            assignments: z,
            alpha: vec![],
            beta: word_topic.prior().to_vec(),
        };
        FileReporter::new(files, false).checkpoint(&checkpoint, &corpus);
        assert!(dir.path().join("beta.txt").exists());
    }
}
