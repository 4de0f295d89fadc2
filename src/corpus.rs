use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{LdaError, Result};

/// Word types of a corpus, indexed densely in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new() -> Vocabulary {
        Vocabulary::default()
    }

    /// Returns the index of `word`, assigning the next free one if unseen.
    pub fn intern(&mut self, word: &str) -> usize {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len();
        self.words.push(word.to_owned());
        self.ids.insert(word.to_owned(), id);
        id
    }

    pub fn id(&self, word: &str) -> Option<usize> {
        self.ids.get(word).cloned()
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(|w| w.as_str())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Tokenized documents over a fixed vocabulary of `vocab_size` word types.
#[derive(Clone, Debug, PartialEq)]
pub struct Corpus {
    docs: Vec<Vec<usize>>,
    vocab_size: usize,
    vocabulary: Option<Vocabulary>,
}

impl Corpus {
    pub fn new(docs: Vec<Vec<usize>>, vocab_size: usize) -> Result<Corpus> {
        for (d, doc) in docs.iter().enumerate() {
            if let Some(&w) = doc.iter().find(|&&w| w >= vocab_size) {
                return Err(LdaError::Config(format!(
                    "document {} contains word index {} outside a vocabulary of {}",
                    d, w, vocab_size
                )));
            }
        }
        Ok(Corpus {
            docs,
            vocab_size,
            vocabulary: None,
        })
    }

    pub fn with_vocabulary(docs: Vec<Vec<usize>>, vocabulary: Vocabulary) -> Result<Corpus> {
        let mut corpus = Corpus::new(docs, vocabulary.len())?;
        corpus.vocabulary = Some(vocabulary);
        Ok(corpus)
    }

    /// Reads one document per line, tokens separated by whitespace.
    ///
    /// Blank lines are kept as empty documents so that document indices match
    /// line numbers.
    pub fn load_text<P: AsRef<Path>>(path: P) -> Result<Corpus> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LdaError::io(path, e))?;
        let file = BufReader::new(file);

        let mut vocabulary = Vocabulary::new();
        let mut docs = Vec::new();
        for line in file.lines() {
            let line = line.map_err(|e| LdaError::io(path, e))?;
            let doc: Vec<usize> = line.split_whitespace().map(|token| vocabulary.intern(token)).collect();
            docs.push(doc);
        }
        Corpus::with_vocabulary(docs, vocabulary)
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn num_tokens(&self) -> usize {
        self.docs.iter().map(|doc| doc.len()).sum()
    }

    pub fn documents(&self) -> &[Vec<usize>] {
        &self.docs
    }

    pub fn document(&self, d: usize) -> &[usize] {
        &self.docs[d]
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.vocabulary.as_ref()
    }

    /// The word string for index `w`, or the index itself without a vocabulary.
    pub fn word(&self, w: usize) -> Cow<'_, str> {
        match self.vocabulary.as_ref().and_then(|v| v.word(w)) {
            Some(word) => Cow::Borrowed(word),
            None => Cow::Owned(w.to_string()),
        }
    }

    /// Number of occurrences of each word type.
    pub fn word_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.vocab_size];
        for &w in self.docs.iter().flatten() {
            counts[w] += 1;
        }
        counts
    }

    pub fn max_document_length(&self) -> usize {
        self.docs.iter().map(|doc| doc.len()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn vocabulary_interns_in_first_seen_order() {
        let mut vocab = Vocabulary::new();
        assert_eq!(vocab.intern("brocolli"), 0);
        assert_eq!(vocab.intern("mother"), 1);
        assert_eq!(vocab.intern("brocolli"), 0);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.word(1), Some("mother"));
        assert_eq!(vocab.id("brother"), None);
    }

    #[test]
    fn out_of_range_word_is_rejected() {
        let err = Corpus::new(vec![vec![0, 1], vec![3]], 3).unwrap_err();
        assert!(matches!(err, LdaError::Config(_)));
    }

    #[test]
    fn corpus_statistics() {
        let corpus = Corpus::new(vec![vec![0, 1, 0, 2, 1], vec![2], vec![]], 4).unwrap();
        assert_eq!(corpus.num_docs(), 3);
        assert_eq!(corpus.num_tokens(), 6);
        assert_eq!(corpus.word_counts(), vec![2, 2, 2, 0]);
        assert_eq!(corpus.max_document_length(), 5);
        assert_eq!(corpus.word(3), "3");
    }

    #[test]
    fn load_text_builds_vocabulary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "brocolli is good to eat").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "my mother likes  good brocolli").unwrap();

        let corpus = Corpus::load_text(file.path()).unwrap();
        assert_eq!(corpus.num_docs(), 3);
        assert_eq!(corpus.vocab_size(), 8);
        assert_eq!(corpus.document(0), &[0, 1, 2, 3, 4]);
        assert!(corpus.document(1).is_empty());
        assert_eq!(corpus.document(2), &[5, 6, 7, 2, 0]);
        assert_eq!(corpus.word(6), "mother");
    }

    #[test]
    fn load_text_reports_missing_file() {
        let err = Corpus::load_text("/nonexistent/corpus.txt").unwrap_err();
        assert!(matches!(err, LdaError::Io { .. }));
    }
}
